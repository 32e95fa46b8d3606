use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use futures::stream::{self, Stream, StreamExt};
use std::fs::{self, File, OpenOptions};
use std::io::{self, SeekFrom, Write};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const ARCHIVE_FORMAT: &str = "%Y%m%d-%H%M%S";
const FOLLOW_POLL: Duration = Duration::from_millis(250);
const READ_CHUNK: usize = 8 * 1024;

/// A log line attributed to the process that wrote it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedLine {
	pub source: String,
	pub line: String,
}

/// `[yyyy-MM-dd HH:mm:ss]`
pub fn timestamp_prefix<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
	Tz::Offset: std::fmt::Display,
{
	format!("[{}]", at.format(TIMESTAMP_FORMAT))
}

pub fn parse_timestamp(line: &str) -> Option<NaiveDateTime> {
	if !line.starts_with('[') || line.as_bytes().get(20) != Some(&b']') {
		return None;
	}
	let stamp = line.get(1..20)?;
	NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()
}

/// Append a supervisor line (`[ts] [procward] msg`) to a process log.
pub fn append_marker(log_path: &Path, message: &str) -> io::Result<()> {
	if let Some(dir) = log_path.parent() {
		fs::create_dir_all(dir)?;
	}
	let mut file = OpenOptions::new().create(true).append(true).open(log_path)?;
	let line = format!("{} [procward] {}\n", timestamp_prefix(&Local::now()), message);
	file.write_all(line.as_bytes())
}

// ── Rotation ────────────────────────────────────────────────────────────────

/// Move the active log aside if it has grown past `max_size`, leaving a fresh
/// empty file in its place. Returns the archive path when a rotation happened.
pub fn rotate_if_needed(log_path: &Path, max_size: u64) -> io::Result<Option<PathBuf>> {
	let len = match fs::metadata(log_path) {
		Ok(meta) => meta.len(),
		Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
		Err(e) => return Err(e),
	};
	if len <= max_size {
		return Ok(None);
	}

	let archive = archive_path(log_path, &Local::now());
	fs::rename(log_path, &archive)?;
	File::create(log_path)?;
	tracing::info!("rotated {} -> {}", log_path.display(), archive.display());
	Ok(Some(archive))
}

pub fn archive_path<Tz: TimeZone>(log_path: &Path, at: &DateTime<Tz>) -> PathBuf
where
	Tz::Offset: std::fmt::Display,
{
	let dir = log_path.parent().unwrap_or_else(|| Path::new("."));
	let stem = log_stem(log_path);
	let stamp = at.format(ARCHIVE_FORMAT).to_string();

	let candidate = dir.join(format!("{}.{}.log", stem, stamp));
	if !candidate.exists() {
		return candidate;
	}
	let mut n = 1;
	loop {
		let candidate = dir.join(format!("{}.{}-{}.log", stem, stamp, n));
		if !candidate.exists() {
			return candidate;
		}
		n += 1;
	}
}

/// Rotated archives belonging to `log_path`, oldest first.
pub fn archives(log_path: &Path) -> Vec<PathBuf> {
	let dir = log_path.parent().unwrap_or_else(|| Path::new("."));
	let prefix = format!("{}.", log_stem(log_path));

	let entries = match fs::read_dir(dir) {
		Ok(e) => e,
		Err(_) => return Vec::new(),
	};

	let mut found: Vec<PathBuf> = entries
		.flatten()
		.map(|entry| entry.path())
		.filter(|path| {
			let name = path.file_name().unwrap_or_default().to_string_lossy();
			name.strip_prefix(&prefix)
				.and_then(|rest| rest.strip_suffix(".log"))
				.is_some_and(is_archive_stamp)
		})
		.collect();
	found.sort();
	found
}

// `YYYYmmdd-HHMMSS` with an optional `-N` collision counter.
fn is_archive_stamp(s: &str) -> bool {
	let bytes = s.as_bytes();
	if bytes.len() < 15 {
		return false;
	}
	let stamp_ok = bytes[..15]
		.iter()
		.enumerate()
		.all(|(i, b)| if i == 8 { *b == b'-' } else { b.is_ascii_digit() });
	let counter_ok = match &bytes[15..] {
		[] => true,
		[b'-', rest @ ..] => !rest.is_empty() && rest.iter().all(|b| b.is_ascii_digit()),
		_ => false,
	};
	stamp_ok && counter_ok
}

/// Remove the active log and every archive. Missing files are not an error.
pub fn remove_logs(log_path: &Path) -> io::Result<()> {
	for archive in archives(log_path) {
		remove_if_exists(&archive)?;
	}
	remove_if_exists(log_path)
}

pub(crate) fn remove_if_exists(path: &Path) -> io::Result<()> {
	match fs::remove_file(path) {
		Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
		_ => Ok(()),
	}
}

fn log_stem(log_path: &Path) -> String {
	log_path
		.file_stem()
		.unwrap_or_default()
		.to_string_lossy()
		.to_string()
}

// ── Tail / merge ────────────────────────────────────────────────────────────

pub fn tail(log_path: &Path, count: usize) -> io::Result<Vec<String>> {
	let bytes = fs::read(log_path)?;
	Ok(tail_lines(&String::from_utf8_lossy(&bytes), count))
}

pub fn tail_lines(content: &str, count: usize) -> Vec<String> {
	let lines: Vec<&str> = content.lines().collect();
	let start = lines.len().saturating_sub(count);
	lines[start..].iter().map(|l| l.to_string()).collect()
}

/// Merge per-process line sets into one chronological list using each line's
/// leading timestamp. Untimestamped lines travel with the line before them.
///
/// Background children write straight into their log, so only marker lines
/// carry a timestamp. Their output sorts by the last marker above it (usually
/// `started`), not by when it was written.
pub fn merge_chronological(sources: Vec<(String, Vec<String>)>) -> Vec<TaggedLine> {
	let mut keyed: Vec<(Option<NaiveDateTime>, TaggedLine)> = Vec::new();

	for (source, lines) in sources {
		let mut last: Option<NaiveDateTime> = None;
		for line in lines {
			if let Some(ts) = parse_timestamp(&line) {
				last = Some(ts);
			}
			keyed.push((last, TaggedLine { source: source.clone(), line }));
		}
	}

	keyed.sort_by_key(|(ts, _)| *ts);
	keyed.into_iter().map(|(_, line)| line).collect()
}

// ── Follow ──────────────────────────────────────────────────────────────────

struct Follower {
	path: PathBuf,
	file: tokio::fs::File,
	pos: u64,
	ino: u64,
	pending: Vec<u8>,
	buf: Vec<u8>,
	missing: bool,
}

impl Follower {
	async fn open(path: &Path, from_end: bool) -> io::Result<Self> {
		let mut file = tokio::fs::File::open(path).await?;
		let pos = if from_end {
			file.seek(SeekFrom::End(0)).await?
		} else {
			0
		};
		let ino = file.metadata().await?.ino();
		Ok(Self {
			path: path.to_path_buf(),
			file,
			pos,
			ino,
			pending: Vec::new(),
			buf: vec![0u8; READ_CHUNK],
			missing: false,
		})
	}

	async fn next_chunk(&mut self) -> io::Result<String> {
		loop {
			let n = self.file.read(&mut self.buf).await?;
			if n > 0 {
				self.pos += n as u64;
				self.pending.extend_from_slice(&self.buf[..n]);
				if let Some(text) = take_utf8(&mut self.pending) {
					return Ok(text);
				}
				continue;
			}

			if self.replaced().await? {
				let pending = std::mem::take(&mut self.pending);
				*self = Follower::open(&self.path, false).await?;
				self.pending = pending;
				continue;
			}
			tokio::time::sleep(FOLLOW_POLL).await;
		}
	}

	// Rotated (new inode) or truncated (shorter than what we've read). A path
	// gone for two polls in a row was deleted, not rotated.
	async fn replaced(&mut self) -> io::Result<bool> {
		match tokio::fs::metadata(&self.path).await {
			Ok(meta) => {
				self.missing = false;
				Ok(meta.ino() != self.ino || meta.len() < self.pos)
			}
			Err(e) if e.kind() == io::ErrorKind::NotFound && !self.missing => {
				self.missing = true;
				Ok(false)
			}
			Err(e) => Err(e),
		}
	}
}

/// Split off the longest valid UTF-8 prefix, keeping an incomplete trailing
/// code point for the next read.
fn take_utf8(pending: &mut Vec<u8>) -> Option<String> {
	let valid = match std::str::from_utf8(pending) {
		Ok(s) => s.len(),
		Err(e) if e.error_len().is_some() => {
			let text = String::from_utf8_lossy(pending).into_owned();
			pending.clear();
			return Some(text);
		}
		Err(e) => e.valid_up_to(),
	};
	if valid == 0 {
		return None;
	}
	let rest = pending.split_off(valid);
	let head = std::mem::replace(pending, rest);
	String::from_utf8(head).ok()
}

/// Stream text appended to `log_path` from now on. The stream is endless; it
/// stops when dropped or after yielding a read error, which includes the log
/// being deleted.
pub async fn follow(log_path: PathBuf) -> io::Result<impl Stream<Item = io::Result<String>>> {
	let follower = Follower::open(&log_path, true).await?;
	Ok(stream::unfold(Some(follower), |state| async move {
		let mut follower = state?;
		match follower.next_chunk().await {
			Ok(text) => Some((Ok(text), Some(follower))),
			Err(e) => Some((Err(e), None)),
		}
	}))
}

fn tag_lines<S>(source: String, chunks: S) -> impl Stream<Item = io::Result<TaggedLine>>
where
	S: Stream<Item = io::Result<String>>,
{
	chunks
		.scan(String::new(), move |carry, chunk| {
			let out = match chunk {
				Ok(text) => {
					carry.push_str(&text);
					let mut lines = Vec::new();
					while let Some(idx) = carry.find('\n') {
						let line: String = carry.drain(..=idx).collect();
						lines.push(Ok(TaggedLine {
							source: source.clone(),
							line: line.trim_end_matches(&['\n', '\r'][..]).to_string(),
						}));
					}
					lines
				}
				Err(e) => vec![Err(e)],
			};
			futures::future::ready(Some(out))
		})
		.flat_map(stream::iter)
}

/// Follow several logs at once, yielding complete lines in arrival order.
/// Sources whose log cannot be opened are skipped with a warning.
pub async fn follow_all(
	sources: Vec<(String, PathBuf)>,
) -> impl Stream<Item = io::Result<TaggedLine>> {
	let mut streams = Vec::new();
	for (source, path) in sources {
		match follow(path.clone()).await {
			Ok(chunks) => streams.push(Box::pin(tag_lines(source, chunks))),
			Err(e) => tracing::warn!("cannot follow {} ({}): {}", source, path.display(), e),
		}
	}
	stream::select_all(streams)
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::Utc;

	#[test]
	fn test_parse_timestamp() {
		let ts = parse_timestamp("[2026-02-14 09:47:03] hello").unwrap();
		assert_eq!(ts.to_string(), "2026-02-14 09:47:03");
		assert_eq!(parse_timestamp("hello"), None);
		assert_eq!(parse_timestamp("[2026-02-14] short"), None);
		assert_eq!(parse_timestamp("[not a timestamp at all]"), None);
	}

	#[test]
	fn test_timestamp_prefix() {
		let at = Utc.with_ymd_and_hms(2026, 2, 14, 9, 5, 0).unwrap();
		assert_eq!(timestamp_prefix(&at), "[2026-02-14 09:05:00]");
	}

	#[test]
	fn test_tail_lines() {
		let content = "a\nb\nc\nd\n";
		assert_eq!(tail_lines(content, 2), vec!["c", "d"]);
		assert_eq!(tail_lines(content, 10), vec!["a", "b", "c", "d"]);
		assert!(tail_lines(content, 0).is_empty());
	}

	#[test]
	fn test_archive_stamp() {
		assert!(is_archive_stamp("20260214-094703"));
		assert!(is_archive_stamp("20260214-094703-2"));
		assert!(!is_archive_stamp("20260214-094703-"));
		assert!(!is_archive_stamp("20260214"));
		assert!(!is_archive_stamp("worker"));
	}

	#[test]
	fn test_merge_orders_by_timestamp() {
		let merged = merge_chronological(vec![
			(
				"a".into(),
				vec![
					"[2026-02-14 09:00:02] a1".into(),
					"  continuation".into(),
					"[2026-02-14 09:00:04] a2".into(),
				],
			),
			(
				"b".into(),
				vec!["[2026-02-14 09:00:01] b1".into(), "[2026-02-14 09:00:03] b2".into()],
			),
		]);
		let lines: Vec<&str> = merged.iter().map(|t| t.line.as_str()).collect();
		assert_eq!(
			lines,
			vec![
				"[2026-02-14 09:00:01] b1",
				"[2026-02-14 09:00:02] a1",
				"  continuation",
				"[2026-02-14 09:00:03] b2",
				"[2026-02-14 09:00:04] a2",
			]
		);
		assert_eq!(merged[2].source, "a");
	}

	#[test]
	fn test_merge_untimestamped_first() {
		let merged = merge_chronological(vec![
			("a".into(), vec!["[2026-02-14 09:00:00] stamped".into()]),
			("b".into(), vec!["raw output".into()]),
		]);
		assert_eq!(merged[0].line, "raw output");
	}

	#[test]
	fn test_take_utf8_keeps_partial_code_point() {
		let mut pending = "hé".as_bytes().to_vec();
		let tail = pending.pop().unwrap();
		assert_eq!(take_utf8(&mut pending).as_deref(), Some("h"));
		assert_eq!(pending.len(), 1);
		pending.push(tail);
		assert_eq!(take_utf8(&mut pending).as_deref(), Some("é"));
		assert!(pending.is_empty());
	}

	// --- Rotation and follow ---

	fn temp_dir(name: &str) -> PathBuf {
		let dir = std::env::temp_dir().join(format!("procward-logs-{}-{}", name, std::process::id()));
		let _ = fs::remove_dir_all(&dir);
		fs::create_dir_all(&dir).unwrap();
		dir
	}

	async fn collect_until<S>(stream: S, needle: &str) -> Option<String>
	where
		S: Stream<Item = io::Result<String>>,
	{
		let mut stream = Box::pin(stream);
		let mut seen = String::new();
		let read = async {
			while let Some(Ok(chunk)) = stream.next().await {
				seen.push_str(&chunk);
				if seen.contains(needle) {
					return true;
				}
			}
			false
		};
		match tokio::time::timeout(Duration::from_secs(5), read).await {
			Ok(true) => Some(seen),
			_ => None,
		}
	}

	#[test]
	fn test_rotate_leaves_empty_active_file() {
		let dir = temp_dir("rotate");
		let log = dir.join("worker.log");
		fs::write(&log, "abc").unwrap();
		assert_eq!(rotate_if_needed(&log, 4).unwrap(), None);

		fs::write(&log, "grown past the limit\n").unwrap();
		let archive = rotate_if_needed(&log, 4).unwrap().expect("rotated");
		assert_eq!(fs::metadata(&log).unwrap().len(), 0);
		assert_eq!(fs::read_to_string(&archive).unwrap(), "grown past the limit\n");
		assert_eq!(archives(&log), vec![archive]);

		let _ = fs::remove_dir_all(&dir);
	}

	#[tokio::test]
	async fn test_follow_reopens_after_rotation() {
		let dir = temp_dir("follow-rotate");
		let log = dir.join("worker.log");
		fs::write(&log, "before rotation, long enough to rotate\n").unwrap();

		let stream = follow(log.clone()).await.unwrap();
		rotate_if_needed(&log, 4).unwrap().expect("rotated");
		append_marker(&log, "after-rotation").unwrap();

		let seen = collect_until(stream, "after-rotation").await.expect("follower saw the new file");
		assert!(!seen.contains("before rotation"));

		let _ = fs::remove_dir_all(&dir);
	}

	#[tokio::test]
	async fn test_follow_reopens_after_truncation() {
		let dir = temp_dir("follow-truncate");
		let log = dir.join("worker.log");
		fs::write(&log, "").unwrap();

		let stream = follow(log.clone()).await.unwrap();
		let mut stream = Box::pin(stream);
		append_marker(&log, "first").unwrap();
		let first = tokio::time::timeout(Duration::from_secs(5), stream.next()).await.unwrap();
		assert!(first.unwrap().unwrap().contains("first"));

		fs::write(&log, "x\n").unwrap();
		let seen = collect_until(stream, "x\n").await.expect("follower restarted from the top");
		assert_eq!(seen, "x\n");

		let _ = fs::remove_dir_all(&dir);
	}

	#[tokio::test]
	async fn test_follow_ends_when_log_deleted() {
		let dir = temp_dir("follow-delete");
		let log = dir.join("worker.log");
		fs::write(&log, "").unwrap();

		let stream = follow(log.clone()).await.unwrap();
		let mut stream = Box::pin(stream);
		fs::remove_file(&log).unwrap();

		let first = tokio::time::timeout(Duration::from_secs(5), stream.next())
			.await
			.expect("stream did not stall");
		let err = first.expect("an error item").unwrap_err();
		assert_eq!(err.kind(), io::ErrorKind::NotFound);
		assert!(stream.next().await.is_none());

		let _ = fs::remove_dir_all(&dir);
	}

	#[test]
	fn test_merge_raw_output_sorts_by_preceding_marker() {
		let merged = merge_chronological(vec![
			(
				"bg".into(),
				vec![
					"[2026-02-14 09:00:00] [procward] started (pid 10)".into(),
					"written at 09:00:05".into(),
				],
			),
			("fg".into(), vec!["[2026-02-14 09:00:03] stamped".into()]),
		]);
		let lines: Vec<&str> = merged.iter().map(|t| t.line.as_str()).collect();
		assert_eq!(
			lines,
			vec![
				"[2026-02-14 09:00:00] [procward] started (pid 10)",
				"written at 09:00:05",
				"[2026-02-14 09:00:03] stamped",
			]
		);
	}
}

use chrono::Local;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::logs;

/// Shared append handle for a process log. Every line written through it gets
/// the timestamp prefix used by the chronological merge.
#[derive(Clone)]
pub struct LogSink {
	writer: Arc<Mutex<LogWriter>>,
}

struct LogWriter {
	file: Option<File>,
	path: PathBuf,
}

impl LogSink {
	pub fn open(log_path: &Path) -> io::Result<Self> {
		if let Some(dir) = log_path.parent() {
			fs::create_dir_all(dir)?;
		}
		let file = OpenOptions::new().create(true).append(true).open(log_path)?;
		Ok(Self {
			writer: Arc::new(Mutex::new(LogWriter {
				file: Some(file),
				path: log_path.to_path_buf(),
			})),
		})
	}

	pub async fn write_line(&self, data: &[u8]) {
		let mut writer = self.writer.lock().await;
		writer.write_line(data);
	}

	pub async fn flush(&self) {
		let mut writer = self.writer.lock().await;
		writer.flush();
	}
}

impl LogWriter {
	fn write_line(&mut self, data: &[u8]) {
		let Some(ref mut file) = self.file else {
			return;
		};
		let mut line = logs::timestamp_prefix(&Local::now()).into_bytes();
		line.push(b' ');
		line.extend_from_slice(data);
		if !data.ends_with(b"\n") {
			line.push(b'\n');
		}

		if let Err(e) = file.write_all(&line) {
			// Stop logging; the child keeps running.
			tracing::warn!("log write to {} failed: {}", self.path.display(), e);
			self.file = None;
		}
	}

	fn flush(&mut self) {
		if let Some(ref mut file) = self.file {
			let _ = file.flush();
			let _ = file.sync_data();
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn prefixes_and_terminates_lines() {
		let dir = std::env::temp_dir().join(format!("procward-sink-{}", std::process::id()));
		let path = dir.join("sink.log");
		let sink = LogSink::open(&path).unwrap();
		sink.write_line(b"first\n").await;
		sink.write_line(b"no newline").await;
		sink.flush().await;

		let content = std::fs::read_to_string(&path).unwrap();
		let lines: Vec<&str> = content.lines().collect();
		assert_eq!(lines.len(), 2);
		assert!(logs::parse_timestamp(lines[0]).is_some());
		assert!(lines[0].ends_with(" first"));
		assert!(lines[1].ends_with(" no newline"));

		let _ = std::fs::remove_dir_all(&dir);
	}
}

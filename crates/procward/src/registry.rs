use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::logs;
use crate::record::{validate_name, ProcessRecord};

const RECORD_EXT: &str = "json";

/// One JSON file per managed process. Writes go through a temp file and a
/// rename, so readers never observe a partial record. Concurrent writers are
/// last-writer-wins.
#[derive(Debug, Clone)]
pub struct Registry {
	dir: PathBuf,
}

impl Registry {
	pub fn new(dir: impl Into<PathBuf>) -> Self {
		Self { dir: dir.into() }
	}

	pub fn dir(&self) -> &Path {
		&self.dir
	}

	fn record_path(&self, name: &str) -> PathBuf {
		self.dir.join(format!("{}.{}", name, RECORD_EXT))
	}

	fn default_log_path(&self, name: &str) -> PathBuf {
		self.dir.join(format!("{}.log", name))
	}

	pub fn save(&self, record: &ProcessRecord) -> Result<()> {
		validate_name(&record.name)?;
		fs::create_dir_all(&self.dir)?;

		let data = serde_json::to_vec_pretty(record).map_err(io::Error::other)?;
		let target = self.record_path(&record.name);
		let tmp = self
			.dir
			.join(format!(".{}.{}.tmp", record.name, std::process::id()));

		let written = File::create(&tmp).and_then(|mut file| {
			file.write_all(&data)?;
			file.sync_all()
		});
		if let Err(e) = written.and_then(|_| fs::rename(&tmp, &target)) {
			let _ = fs::remove_file(&tmp);
			return Err(e.into());
		}
		Ok(())
	}

	pub fn fetch(&self, name: &str) -> Result<Option<ProcessRecord>> {
		validate_name(name)?;
		let data = match fs::read(self.record_path(name)) {
			Ok(d) => d,
			Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
			Err(e) => return Err(e.into()),
		};
		let record: ProcessRecord =
			serde_json::from_slice(&data).map_err(|e| Error::corrupt(name, e))?;
		if record.name != name {
			return Err(Error::corrupt(
				name,
				format!("file holds record for {:?}", record.name),
			));
		}
		Ok(Some(record))
	}

	/// Every readable record, oldest start first; never-started records last.
	/// Corrupt files are logged and skipped.
	pub fn fetch_all(&self) -> Result<Vec<ProcessRecord>> {
		let entries = match fs::read_dir(&self.dir) {
			Ok(e) => e,
			Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
			Err(e) => return Err(e.into()),
		};

		let mut records = Vec::new();
		for entry in entries.flatten() {
			let path = entry.path();
			if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
				continue;
			}
			let name = path
				.file_stem()
				.unwrap_or_default()
				.to_string_lossy()
				.to_string();
			if validate_name(&name).is_err() {
				continue;
			}
			match self.fetch(&name) {
				Ok(Some(record)) => records.push(record),
				Ok(None) => {}
				Err(e) => tracing::warn!("skipping {}: {}", path.display(), e),
			}
		}

		records.sort_by(|a, b| {
			let key = |r: &ProcessRecord| (r.started_at().is_none(), r.started_at());
			key(a).cmp(&key(b)).then_with(|| a.name.cmp(&b.name))
		});
		Ok(records)
	}

	/// Delete the record file and its logs. Absent files are fine.
	pub fn remove(&self, name: &str) -> Result<()> {
		validate_name(name)?;
		let log_path = match self.fetch(name) {
			Ok(Some(record)) => record.log_path,
			_ => self.default_log_path(name),
		};
		logs::remove_if_exists(&self.record_path(name))?;
		logs::remove_logs(&log_path)?;
		Ok(())
	}
}

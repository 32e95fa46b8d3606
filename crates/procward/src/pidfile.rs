use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::launcher;

/// Holds the monitor's PID file for as long as it lives.
#[derive(Debug)]
pub struct PidGuard {
	path: PathBuf,
	pid: u32,
}

pub fn read_pid(path: &Path) -> Option<u32> {
	fs::read_to_string(path)
		.ok()
		.and_then(|s| s.trim().parse().ok())
}

impl PidGuard {
	/// Claim `path` for the current process. Returns `Ok(None)` if another live
	/// process already holds it; a stale file is taken over.
	pub fn acquire(path: &Path) -> io::Result<Option<Self>> {
		let own = std::process::id();
		if let Some(existing) = read_pid(path) {
			if existing != own && launcher::is_alive(existing) {
				return Ok(None);
			}
		}

		if let Some(dir) = path.parent() {
			fs::create_dir_all(dir)?;
		}
		let tmp = path.with_extension(format!("pid.{}", own));
		fs::write(&tmp, own.to_string())?;
		fs::rename(&tmp, path)?;

		Ok(Some(Self {
			path: path.to_path_buf(),
			pid: own,
		}))
	}
}

impl Drop for PidGuard {
	fn drop(&mut self) {
		if read_pid(&self.path) == Some(self.pid) {
			let _ = fs::remove_file(&self.path);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn temp_pid_path(name: &str) -> PathBuf {
		std::env::temp_dir()
			.join(format!("procward-pid-{}-{}", std::process::id(), name))
			.join("monitor.pid")
	}

	#[test]
	fn acquire_writes_and_drop_removes() {
		let path = temp_pid_path("lifecycle");
		{
			let guard = PidGuard::acquire(&path).unwrap();
			assert!(guard.is_some());
			assert_eq!(read_pid(&path), Some(std::process::id()));
		}
		assert!(!path.exists());
	}

	#[test]
	fn live_holder_blocks_second_instance() {
		let path = temp_pid_path("held");
		fs::create_dir_all(path.parent().unwrap()).unwrap();
		// pid 1 is always alive
		fs::write(&path, "1").unwrap();
		assert!(PidGuard::acquire(&path).unwrap().is_none());
		let _ = fs::remove_dir_all(path.parent().unwrap());
	}

	#[test]
	fn stale_file_is_taken_over() {
		let path = temp_pid_path("stale");
		fs::create_dir_all(path.parent().unwrap()).unwrap();
		fs::write(&path, format!("{}", i32::MAX)).unwrap();
		let guard = PidGuard::acquire(&path).unwrap();
		assert!(guard.is_some());
		drop(guard);
		let _ = fs::remove_dir_all(path.parent().unwrap());
	}
}

use std::path::PathBuf;

pub const APP_NAME: &str = "procward";

/// On-disk layout. The log directory doubles as the registry directory.
#[derive(Debug, Clone)]
pub struct Paths {
	pub base_dir: PathBuf,
}

impl Paths {
	pub fn new(base_dir: impl Into<PathBuf>) -> Self {
		Self {
			base_dir: base_dir.into(),
		}
	}

	/// Resolve the per-user base directory: `PROCWARD_HOME`, then the XDG state dir.
	pub fn from_env() -> Self {
		if let Ok(dir) = std::env::var("PROCWARD_HOME") {
			return Self::new(dir);
		}
		Self::new(state_dir())
	}

	pub fn log_dir(&self) -> PathBuf {
		self.base_dir.join("logs")
	}

	pub fn registry_dir(&self) -> PathBuf {
		self.log_dir()
	}

	pub fn monitor_pid_path(&self) -> PathBuf {
		self.base_dir.join("monitor.pid")
	}

	pub fn log_path(&self, name: &str) -> PathBuf {
		self.log_dir().join(format!("{}.log", name))
	}
}

pub fn state_dir() -> PathBuf {
	if let Ok(dir) = std::env::var("XDG_STATE_HOME") {
		PathBuf::from(dir).join(APP_NAME)
	} else if let Some(home) = home_dir() {
		home.join(".local").join("state").join(APP_NAME)
	} else {
		PathBuf::from("/tmp").join(APP_NAME)
	}
}

pub fn config_dir() -> PathBuf {
	if let Ok(dir) = std::env::var("XDG_CONFIG_HOME") {
		PathBuf::from(dir).join(APP_NAME)
	} else if let Some(home) = home_dir() {
		home.join(".config").join(APP_NAME)
	} else {
		PathBuf::from("/tmp").join(APP_NAME).join("config")
	}
}

fn home_dir() -> Option<PathBuf> {
	std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn layout_under_base() {
		let paths = Paths::new("/tmp/pw-base");
		assert_eq!(paths.log_dir(), PathBuf::from("/tmp/pw-base/logs"));
		assert_eq!(paths.registry_dir(), paths.log_dir());
		assert_eq!(paths.monitor_pid_path(), PathBuf::from("/tmp/pw-base/monitor.pid"));
		assert_eq!(paths.log_path("api"), PathBuf::from("/tmp/pw-base/logs/api.log"));
	}
}

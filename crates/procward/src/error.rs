use std::io;

/// Errors surfaced by the supervision engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
	/// No record exists for the given name or index.
	#[error("{0}: not found")]
	NotFound(String),

	/// The command could not be spawned or its pid could not be determined.
	#[error("{name}: launch failed: {reason}")]
	LaunchFailure { name: String, reason: String },

	/// A record file exists but cannot be parsed.
	#[error("{name}: corrupt record: {reason}")]
	CorruptRecord { name: String, reason: String },

	#[error("{name}: already running (pid {pid})")]
	AlreadyRunning { name: String, pid: u32 },

	#[error("{0}: not running")]
	NotRunning(String),

	#[error("invalid process name {0:?}")]
	InvalidName(String),

	#[error("invalid command: {0}")]
	InvalidCommand(String),

	#[error("io error: {0}")]
	Io(#[from] io::Error),
}

impl Error {
	/// Policy violations that callers report as information rather than failure.
	pub fn is_noop(&self) -> bool {
		matches!(self, Error::AlreadyRunning { .. } | Error::NotRunning(_))
	}

	pub(crate) fn launch(name: &str, reason: impl ToString) -> Self {
		Error::LaunchFailure {
			name: name.to_string(),
			reason: reason.to_string(),
		}
	}

	pub(crate) fn corrupt(name: &str, reason: impl ToString) -> Self {
		Error::CorruptRecord {
			name: name.to_string(),
			reason: reason.to_string(),
		}
	}
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn noop_errors() {
		assert!(Error::NotRunning("web".into()).is_noop());
		assert!(Error::AlreadyRunning { name: "web".into(), pid: 7 }.is_noop());
		assert!(!Error::NotFound("web".into()).is_noop());
		assert!(!Error::launch("web", "boom").is_noop());
	}

	#[test]
	fn messages_name_the_process() {
		assert_eq!(Error::NotFound("api".into()).to_string(), "api: not found");
		assert_eq!(
			Error::AlreadyRunning { name: "api".into(), pid: 42 }.to_string(),
			"api: already running (pid 42)"
		);
	}
}

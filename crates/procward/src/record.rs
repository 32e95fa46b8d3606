use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Observable status as written to the record file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
	Stopped,
	Running,
	Error,
}

impl std::fmt::Display for Status {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Status::Stopped => write!(f, "stopped"),
			Status::Running => write!(f, "running"),
			Status::Error => write!(f, "error"),
		}
	}
}

/// Lifecycle state. A pid and start time exist only while running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
	Stopped,
	Running { pid: u32, started_at: DateTime<Utc> },
	Error,
}

impl ProcessState {
	pub fn is_running(&self) -> bool {
		matches!(self, ProcessState::Running { .. })
	}

	pub fn status(&self) -> Status {
		match self {
			ProcessState::Stopped => Status::Stopped,
			ProcessState::Running { .. } => Status::Running,
			ProcessState::Error => Status::Error,
		}
	}

	pub fn pid(&self) -> Option<u32> {
		match self {
			ProcessState::Running { pid, .. } => Some(*pid),
			_ => None,
		}
	}

	pub fn started_at(&self) -> Option<DateTime<Utc>> {
		match self {
			ProcessState::Running { started_at, .. } => Some(*started_at),
			_ => None,
		}
	}
}

/// Durable description of one managed process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RecordFile", into = "RecordFile")]
pub struct ProcessRecord {
	pub name: String,
	pub command: String,
	pub restart_policy: bool,
	pub log_path: PathBuf,
	pub state: ProcessState,
}

impl ProcessRecord {
	pub fn new(name: &str, command: &str, restart_policy: bool, log_path: PathBuf) -> Self {
		Self {
			name: name.to_string(),
			command: command.to_string(),
			restart_policy,
			log_path,
			state: ProcessState::Stopped,
		}
	}

	pub fn pid(&self) -> Option<u32> {
		self.state.pid()
	}

	pub fn started_at(&self) -> Option<DateTime<Utc>> {
		self.state.started_at()
	}

	pub fn status(&self) -> Status {
		self.state.status()
	}
}

// Flat on-disk shape. Kept private so the pid/startTime pairing is checked
// on every load.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordFile {
	name: String,
	command: String,
	pid: Option<u32>,
	start_time: Option<DateTime<Utc>>,
	restart_policy: bool,
	log_path: PathBuf,
	status: Status,
}

impl TryFrom<RecordFile> for ProcessRecord {
	type Error = String;

	fn try_from(file: RecordFile) -> std::result::Result<Self, Self::Error> {
		let live = match (file.pid, file.start_time) {
			(Some(pid), Some(started_at)) => Some((pid, started_at)),
			(None, None) => None,
			_ => return Err("pid and startTime must be set together".to_string()),
		};
		let state = match (file.status, live) {
			(Status::Running, Some((pid, started_at))) => ProcessState::Running { pid, started_at },
			(Status::Running, None) => return Err("running record without pid".to_string()),
			(Status::Stopped, _) => ProcessState::Stopped,
			(Status::Error, _) => ProcessState::Error,
		};
		Ok(ProcessRecord {
			name: file.name,
			command: file.command,
			restart_policy: file.restart_policy,
			log_path: file.log_path,
			state,
		})
	}
}

impl From<ProcessRecord> for RecordFile {
	fn from(record: ProcessRecord) -> Self {
		RecordFile {
			pid: record.state.pid(),
			start_time: record.state.started_at(),
			status: record.state.status(),
			name: record.name,
			command: record.command,
			restart_policy: record.restart_policy,
			log_path: record.log_path,
		}
	}
}

/// Reject names that would escape the registry directory or collide with
/// the `all` / index selectors.
pub fn validate_name(name: &str) -> Result<()> {
	let bad = name.is_empty()
		|| name.starts_with('.')
		|| name.contains('/')
		|| name.contains('\0')
		|| name.eq_ignore_ascii_case("all")
		|| name.chars().all(|c| c.is_ascii_digit());
	if bad {
		return Err(Error::InvalidName(name.to_string()));
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	fn running() -> ProcessRecord {
		let mut record = ProcessRecord::new("api", "sleep 10", true, "/tmp/api.log".into());
		record.state = ProcessState::Running {
			pid: 4242,
			started_at: "2026-02-14T09:30:00Z".parse().unwrap(),
		};
		record
	}

	#[test]
	fn writes_flat_camel_case_json() {
		let json = serde_json::to_value(running()).unwrap();
		assert_eq!(json["name"], "api");
		assert_eq!(json["pid"], 4242);
		assert_eq!(json["startTime"], "2026-02-14T09:30:00Z");
		assert_eq!(json["restartPolicy"], true);
		assert_eq!(json["logPath"], "/tmp/api.log");
		assert_eq!(json["status"], "running");
	}

	#[test]
	fn stopped_record_has_null_pid() {
		let record = ProcessRecord::new("api", "sleep 10", false, "/tmp/api.log".into());
		let json = serde_json::to_value(&record).unwrap();
		assert!(json["pid"].is_null());
		assert!(json["startTime"].is_null());
		assert_eq!(json["status"], "stopped");
	}

	#[test]
	fn rejects_half_set_pair() {
		let raw = r#"{"name":"a","command":"x","pid":12,"startTime":null,
			"restartPolicy":false,"logPath":"/tmp/a.log","status":"stopped"}"#;
		assert!(serde_json::from_str::<ProcessRecord>(raw).is_err());
	}

	#[test]
	fn rejects_running_without_pid() {
		let raw = r#"{"name":"a","command":"x","pid":null,"startTime":null,
			"restartPolicy":false,"logPath":"/tmp/a.log","status":"running"}"#;
		assert!(serde_json::from_str::<ProcessRecord>(raw).is_err());
	}

	#[test]
	fn stale_pair_on_stopped_record_is_dropped() {
		let raw = r#"{"name":"a","command":"x","pid":12,"startTime":"2026-02-14T09:30:00Z",
			"restartPolicy":false,"logPath":"/tmp/a.log","status":"error"}"#;
		let record: ProcessRecord = serde_json::from_str(raw).unwrap();
		assert_eq!(record.state, ProcessState::Error);
		assert_eq!(record.pid(), None);
	}

	#[test]
	fn name_validation() {
		assert!(validate_name("web").is_ok());
		assert!(validate_name("my-app.v2").is_ok());
		assert!(validate_name("").is_err());
		assert!(validate_name("../etc").is_err());
		assert!(validate_name("a/b").is_err());
		assert!(validate_name(".hidden").is_err());
		assert!(validate_name("ALL").is_err());
		assert!(validate_name("12").is_err());
	}
}

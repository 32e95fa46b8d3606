use chrono::{DateTime, Utc};

use crate::error::Error;
use crate::record::{ProcessRecord, ProcessState};

/// Something that happened to a managed process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
	/// A fresh launch succeeded (explicit start).
	Launched { pid: u32, started_at: DateTime<Utc> },
	/// Stop-then-start collapsed into a single update (explicit restart or
	/// monitor relaunch of a crashed process).
	Restarted { pid: u32, started_at: DateTime<Utc> },
	/// Operator asked for a stop.
	Stopped,
	/// The process was found dead and will not be relaunched.
	Exited,
	/// A launch or relaunch attempt failed.
	LaunchFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
	AlreadyRunning { pid: u32 },
	NotRunning,
}

impl Rejection {
	pub fn into_error(self, name: &str) -> Error {
		match self {
			Rejection::AlreadyRunning { pid } => Error::AlreadyRunning {
				name: name.to_string(),
				pid,
			},
			Rejection::NotRunning => Error::NotRunning(name.to_string()),
		}
	}
}

pub fn transition(state: &ProcessState, event: Event) -> Result<ProcessState, Rejection> {
	match (state, event) {
		(ProcessState::Running { pid, .. }, Event::Launched { .. }) => {
			Err(Rejection::AlreadyRunning { pid: *pid })
		}
		(_, Event::Launched { pid, started_at }) | (_, Event::Restarted { pid, started_at }) => {
			Ok(ProcessState::Running { pid, started_at })
		}
		(ProcessState::Running { .. }, Event::Stopped | Event::Exited) => Ok(ProcessState::Stopped),
		(_, Event::Stopped | Event::Exited) => Err(Rejection::NotRunning),
		(_, Event::LaunchFailed) => Ok(ProcessState::Error),
	}
}

/// What one supervision tick should do with a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
	/// Not running; the monitor leaves stopped and errored records alone.
	Skip,
	Keep,
	Relaunch,
	MarkStopped,
}

pub fn reconcile(record: &ProcessRecord, alive: bool) -> Action {
	if !record.state.is_running() {
		return Action::Skip;
	}
	match (alive, record.restart_policy) {
		(true, _) => Action::Keep,
		(false, true) => Action::Relaunch,
		(false, false) => Action::MarkStopped,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn now() -> DateTime<Utc> {
		"2026-02-14T09:30:00Z".parse().unwrap()
	}

	fn running(pid: u32) -> ProcessState {
		ProcessState::Running { pid, started_at: now() }
	}

	#[test]
	fn start_from_stopped_or_error() {
		let event = Event::Launched { pid: 10, started_at: now() };
		assert_eq!(transition(&ProcessState::Stopped, event), Ok(running(10)));
		assert_eq!(transition(&ProcessState::Error, event), Ok(running(10)));
	}

	#[test]
	fn start_while_running_is_rejected() {
		let event = Event::Launched { pid: 11, started_at: now() };
		assert_eq!(
			transition(&running(10), event),
			Err(Rejection::AlreadyRunning { pid: 10 })
		);
	}

	#[test]
	fn restart_is_a_self_transition() {
		let event = Event::Restarted { pid: 11, started_at: now() };
		assert_eq!(transition(&running(10), event), Ok(running(11)));
	}

	#[test]
	fn stop_only_from_running() {
		assert_eq!(transition(&running(10), Event::Stopped), Ok(ProcessState::Stopped));
		assert_eq!(transition(&ProcessState::Stopped, Event::Stopped), Err(Rejection::NotRunning));
		assert_eq!(transition(&ProcessState::Error, Event::Exited), Err(Rejection::NotRunning));
	}

	#[test]
	fn failed_launch_is_error() {
		assert_eq!(transition(&running(10), Event::LaunchFailed), Ok(ProcessState::Error));
		assert_eq!(transition(&ProcessState::Stopped, Event::LaunchFailed), Ok(ProcessState::Error));
	}

	#[test]
	fn reconcile_decisions() {
		let mut record = ProcessRecord::new("api", "sleep 1", true, "/tmp/api.log".into());
		assert_eq!(reconcile(&record, false), Action::Skip);

		record.state = running(10);
		assert_eq!(reconcile(&record, true), Action::Keep);
		assert_eq!(reconcile(&record, false), Action::Relaunch);

		record.restart_policy = false;
		assert_eq!(reconcile(&record, false), Action::MarkStopped);

		record.state = ProcessState::Error;
		assert_eq!(reconcile(&record, false), Action::Skip);
	}
}

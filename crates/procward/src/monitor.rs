use chrono::{Duration as ChronoDuration, Utc};
use tokio::time::{interval, MissedTickBehavior};

use crate::error::{Error, Result};
use crate::launcher;
use crate::lifecycle::{self, Action, Event};
use crate::logs;
use crate::pidfile::PidGuard;
use crate::record::ProcessRecord;
use crate::supervisor::Supervisor;
use crate::usage::UsageSampler;

/// sysinfo reports start times with one-second resolution.
const START_TIME_SLACK_SECS: i64 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
	Alive,
	Restarted { old_pid: u32, new_pid: u32 },
	MarkedStopped,
	RelaunchFailed,
	/// The record changed under us (or was not running); nothing done.
	Skipped,
}

#[derive(Debug, Default)]
pub struct TickReport {
	pub outcomes: Vec<(String, TickOutcome)>,
	pub errors: Vec<(String, Error)>,
}

impl TickReport {
	pub fn outcome(&self, name: &str) -> Option<&TickOutcome> {
		self.outcomes.iter().find(|(n, _)| n == name).map(|(_, o)| o)
	}
}

/// Periodic reconciliation of recorded state against the process table.
pub struct Monitor {
	supervisor: Supervisor,
}

impl Monitor {
	pub fn new(supervisor: Supervisor) -> Self {
		Self { supervisor }
	}

	pub fn supervisor(&self) -> &Supervisor {
		&self.supervisor
	}

	/// One pass over every record. A failure on one record is reported and
	/// does not affect the others.
	pub async fn tick(&self) -> Result<TickReport> {
		let mut report = TickReport::default();
		for record in self.supervisor.registry().fetch_all()? {
			let alive = record.pid().is_some_and(launcher::is_alive);
			let action = lifecycle::reconcile(&record, alive);
			tracing::debug!("{}: pid {:?} alive={} -> {:?}", record.name, record.pid(), alive, action);
			let name = record.name.clone();
			match self.apply(record, action).await {
				Ok(outcome) => report.outcomes.push((name, outcome)),
				Err(e) => {
					tracing::warn!("{}: supervision failed: {}", name, e);
					report.errors.push((name, e));
				}
			}
		}
		Ok(report)
	}

	async fn apply(&self, record: ProcessRecord, action: Action) -> Result<TickOutcome> {
		match action {
			Action::Skip => Ok(TickOutcome::Skipped),
			Action::Keep => Ok(TickOutcome::Alive),
			Action::Relaunch | Action::MarkStopped => {
				// Re-read: an operator may have stopped or restarted it meanwhile.
				let Some(latest) = self.supervisor.registry().fetch(&record.name)? else {
					return Ok(TickOutcome::Skipped);
				};
				if !latest.state.is_running() || latest.pid() != record.pid() {
					return Ok(TickOutcome::Skipped);
				}
				if action == Action::Relaunch {
					self.relaunch(latest).await
				} else {
					self.mark_stopped(latest)
				}
			}
		}
	}

	fn mark_stopped(&self, mut record: ProcessRecord) -> Result<TickOutcome> {
		record.state = lifecycle::transition(&record.state, Event::Exited)
			.map_err(|r| r.into_error(&record.name))?;
		self.supervisor.registry().save(&record)?;
		let _ = logs::append_marker(&record.log_path, "exited, restart disabled");
		tracing::info!("{}: exited, marked stopped", record.name);
		Ok(TickOutcome::MarkedStopped)
	}

	async fn relaunch(&self, mut record: ProcessRecord) -> Result<TickOutcome> {
		let old_pid = record.pid().unwrap_or_default();
		let _ = logs::append_marker(&record.log_path, &format!("crashed (pid {}), restarting", old_pid));

		let (event, outcome) = match self.supervisor.spawn(&record).await {
			Ok(new_pid) => (
				Event::Restarted { pid: new_pid, started_at: Utc::now() },
				TickOutcome::Restarted { old_pid, new_pid },
			),
			Err(_) => (Event::LaunchFailed, TickOutcome::RelaunchFailed),
		};
		record.state = lifecycle::transition(&record.state, event)
			.map_err(|r| r.into_error(&record.name))?;
		self.supervisor.registry().save(&record)?;

		if let TickOutcome::Restarted { new_pid, .. } = outcome {
			tracing::info!("{}: relaunched (pid {} -> {})", record.name, old_pid, new_pid);
		}
		Ok(outcome)
	}

	/// Startup pass: relaunch every record still marked running whose process
	/// is gone or whose pid now belongs to something newer. Restart policy is
	/// not consulted; these were running when supervision last stopped.
	pub async fn recover(&self) -> Result<TickReport> {
		let mut report = TickReport::default();
		let records: Vec<ProcessRecord> = self
			.supervisor
			.registry()
			.fetch_all()?
			.into_iter()
			.filter(|r| r.state.is_running())
			.collect();
		let live: Vec<u32> = records
			.iter()
			.filter_map(|r| r.pid())
			.filter(|pid| launcher::is_alive(*pid))
			.collect();
		let usage = UsageSampler::new().sample(&live).await;

		for record in records {
			let (Some(pid), Some(started_at)) = (record.pid(), record.started_at()) else {
				continue;
			};
			let alive = live.contains(&pid);
			let reused = alive
				&& usage
					.get(&pid)
					.and_then(|u| u.started_at)
					.is_some_and(|os_start| os_start > started_at + ChronoDuration::seconds(START_TIME_SLACK_SECS));
			if alive && !reused {
				report.outcomes.push((record.name, TickOutcome::Alive));
				continue;
			}
			if reused {
				tracing::warn!("{}: pid {} was reused by another process", record.name, pid);
			}

			let name = record.name.clone();
			match self.relaunch(record).await {
				Ok(outcome) => report.outcomes.push((name, outcome)),
				Err(e) => {
					tracing::warn!("{}: recovery failed: {}", name, e);
					report.errors.push((name, e));
				}
			}
		}
		Ok(report)
	}

	/// Run until interrupted. Returns `Ok(false)` without doing anything if
	/// another monitor already holds the pid file.
	pub async fn run(&self) -> Result<bool> {
		let pid_path = self.supervisor.paths().monitor_pid_path();
		let Some(_guard) = PidGuard::acquire(&pid_path)? else {
			tracing::warn!("monitor already running ({})", pid_path.display());
			return Ok(false);
		};

		let recovered = self.recover().await?;
		tracing::info!(
			"monitor started, {} record(s) checked on startup",
			recovered.outcomes.len() + recovered.errors.len()
		);

		let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
		let mut ticker = interval(self.supervisor.config().monitor_interval());
		ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

		loop {
			tokio::select! {
				_ = ticker.tick() => {
					if let Err(e) = self.tick().await {
						tracing::error!("tick failed: {}", e);
					}
				}
				_ = tokio::signal::ctrl_c() => break,
				_ = sigterm.recv() => break,
			}
		}
		tracing::info!("monitor shutting down");
		Ok(true)
	}
}

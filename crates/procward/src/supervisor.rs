use chrono::Utc;
use futures::Stream;
use std::io;

use crate::command;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::launcher;
use crate::lifecycle::{self, Event};
use crate::logs::{self, TaggedLine};
use crate::paths::Paths;
use crate::record::{validate_name, ProcessRecord, ProcessState};
use crate::registry::Registry;
use crate::usage::{ResourceUsage, UsageSampler};

/// Which records a command applies to: a name, a 1-based position in the
/// listing order, or everything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
	All,
	Index(usize),
	Name(String),
}

impl Target {
	pub fn parse(s: &str) -> Self {
		if s.eq_ignore_ascii_case("all") {
			Target::All
		} else if let Ok(index) = s.parse::<usize>() {
			Target::Index(index)
		} else {
			Target::Name(s.to_string())
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
	Stop,
	Restart,
	Delete,
}

/// Outcome of a command applied to one or more records. One failure never
/// stops the rest.
#[derive(Debug, Default)]
pub struct BatchReport {
	pub succeeded: Vec<String>,
	/// Policy no-ops such as stopping something already stopped.
	pub skipped: Vec<Error>,
	pub failed: Vec<Error>,
}

impl BatchReport {
	pub fn is_ok(&self) -> bool {
		self.failed.is_empty()
	}
}

/// A record joined with what the OS currently says about it.
#[derive(Debug, Clone)]
pub struct ProcessView {
	pub record: ProcessRecord,
	pub alive: bool,
	pub usage: Option<ResourceUsage>,
}

/// Immediate, operator-driven actions over the registry and launcher.
pub struct Supervisor {
	registry: Registry,
	paths: Paths,
	config: Config,
}

impl Supervisor {
	pub fn new(paths: Paths, config: Config) -> Self {
		Self {
			registry: Registry::new(paths.registry_dir()),
			paths,
			config,
		}
	}

	/// Paths from `PROCWARD_HOME` or the XDG state dir, config from disk.
	pub fn from_env() -> Self {
		Self::new(Paths::from_env(), crate::config::load_config())
	}

	pub fn registry(&self) -> &Registry {
		&self.registry
	}

	pub fn paths(&self) -> &Paths {
		&self.paths
	}

	pub fn config(&self) -> &Config {
		&self.config
	}

	/// Fetch a record, failing with `NotFound` when absent.
	pub fn get(&self, name: &str) -> Result<ProcessRecord> {
		self.registry
			.fetch(name)?
			.ok_or_else(|| Error::NotFound(name.to_string()))
	}

	pub fn resolve(&self, target: &Target) -> Result<Vec<String>> {
		match target {
			Target::Name(name) => Ok(vec![name.clone()]),
			Target::All => Ok(self.registry.fetch_all()?.into_iter().map(|r| r.name).collect()),
			Target::Index(index) => {
				let records = self.registry.fetch_all()?;
				index
					.checked_sub(1)
					.and_then(|i| records.into_iter().nth(i))
					.map(|r| vec![r.name])
					.ok_or_else(|| Error::NotFound(format!("#{}", index)))
			}
		}
	}

	// ── start ───────────────────────────────────────────────────────────────

	/// Launch `command` under `name` (or a name derived from the executable).
	/// In foreground mode this blocks until the child exits and returns the
	/// final record.
	pub async fn start(
		&self,
		name: Option<&str>,
		command: &str,
		restart_policy: bool,
		foreground: bool,
	) -> Result<ProcessRecord> {
		let command = command.trim();
		if command.is_empty() {
			return Err(Error::InvalidCommand("empty command".into()));
		}
		let name = match name {
			Some(n) => n.to_string(),
			None => command::derive_name(command)?,
		};
		validate_name(&name)?;

		let mut record = match self.registry.fetch(&name)? {
			Some(mut existing) => {
				if let Some(pid) = existing.pid() {
					if launcher::is_alive(pid) {
						return Err(Error::AlreadyRunning { name, pid });
					}
					existing.state = ProcessState::Stopped;
				}
				existing.command = command.to_string();
				existing.restart_policy = restart_policy;
				existing
			}
			None => ProcessRecord::new(&name, command, restart_policy, self.paths.log_path(&name)),
		};

		if foreground {
			return self.run_attached(record).await;
		}

		match self.spawn(&record).await {
			Ok(pid) => {
				let event = Event::Launched { pid, started_at: Utc::now() };
				record.state = lifecycle::transition(&record.state, event)
					.map_err(|r| r.into_error(&name))?;
				self.registry.save(&record)?;
				tracing::info!("{}: started (pid {})", name, pid);
				Ok(record)
			}
			Err(e) => {
				self.mark_failed(&mut record)?;
				Err(e)
			}
		}
	}

	async fn run_attached(&self, mut record: ProcessRecord) -> Result<ProcessRecord> {
		let argv = command::tokenize(&record.command)?;
		self.prepare_log(&record);

		let attached = match launcher::launch_attached(&argv, &record.log_path) {
			Ok(a) => a,
			Err(e) => {
				let _ = logs::append_marker(&record.log_path, &format!("launch failed: {}", e));
				self.mark_failed(&mut record)?;
				return Err(Error::launch(&record.name, e));
			}
		};
		let pid = attached
			.pid()
			.ok_or_else(|| Error::launch(&record.name, "pid unavailable"))?;

		let event = Event::Launched { pid, started_at: Utc::now() };
		record.state = lifecycle::transition(&record.state, event)
			.map_err(|r| r.into_error(&record.name))?;
		self.registry.save(&record)?;
		let _ = logs::append_marker(&record.log_path, &format!("started attached (pid {})", pid));
		tracing::info!("{}: running attached (pid {})", record.name, pid);

		let exit = attached.run(self.config.stop_grace()).await?;
		let note = if exit.interrupted {
			format!("interrupted, exited with {}", exit.status)
		} else {
			format!("exited with {}", exit.status)
		};
		let _ = logs::append_marker(&record.log_path, &note);
		tracing::info!("{}: {}", record.name, note);

		// Someone else may have taken the record over while we were attached.
		let mut latest = self.registry.fetch(&record.name)?.unwrap_or(record);
		if latest.pid() == Some(pid) {
			latest.state = ProcessState::Stopped;
			self.registry.save(&latest)?;
		}
		Ok(latest)
	}

	// ── stop / restart / delete ─────────────────────────────────────────────

	pub async fn stop(&self, name: &str) -> Result<ProcessRecord> {
		let mut record = self.get(name)?;
		let pid = record.pid();
		record.state = lifecycle::transition(&record.state, Event::Stopped)
			.map_err(|r| r.into_error(name))?;

		// Persist first so a concurrent monitor tick does not relaunch what we
		// are about to kill.
		self.registry.save(&record)?;
		if let Some(pid) = pid {
			launcher::shutdown(pid, self.config.stop_grace()).await;
		}
		let _ = logs::append_marker(&record.log_path, "stopped");
		tracing::info!("{}: stopped", name);
		Ok(record)
	}

	/// Stop-then-start written as a single record update.
	pub async fn restart(&self, name: &str) -> Result<ProcessRecord> {
		let mut record = self.get(name)?;
		if let Some(pid) = record.pid() {
			launcher::shutdown(pid, self.config.stop_grace()).await;
		}

		match self.spawn(&record).await {
			Ok(pid) => {
				let event = Event::Restarted { pid, started_at: Utc::now() };
				record.state = lifecycle::transition(&record.state, event)
					.map_err(|r| r.into_error(name))?;
				self.registry.save(&record)?;
				tracing::info!("{}: restarted (pid {})", name, pid);
				Ok(record)
			}
			Err(e) => {
				self.mark_failed(&mut record)?;
				Err(e)
			}
		}
	}

	/// Stop the process if it is alive, then drop its record and logs.
	pub async fn delete(&self, name: &str) -> Result<()> {
		let record = self.get(name)?;
		if let Some(pid) = record.pid() {
			let mut stopped = record.clone();
			stopped.state = ProcessState::Stopped;
			self.registry.save(&stopped)?;
			launcher::shutdown(pid, self.config.stop_grace()).await;
		}
		self.registry.remove(name)?;
		tracing::info!("{}: deleted", name);
		Ok(())
	}

	/// Apply `op` to every record `target` selects.
	pub async fn apply(&self, op: Op, target: &Target) -> Result<BatchReport> {
		let names = self.resolve(target)?;
		let mut report = BatchReport::default();

		for name in names {
			let result = match op {
				Op::Stop => self.stop(&name).await.map(|_| ()),
				Op::Restart => self.restart(&name).await.map(|_| ()),
				Op::Delete => self.delete(&name).await,
			};
			match result {
				Ok(()) => report.succeeded.push(name),
				Err(e) if e.is_noop() => report.skipped.push(e),
				Err(e) => {
					tracing::warn!("{:?} {} failed: {}", op, name, e);
					report.failed.push(e);
				}
			}
		}
		Ok(report)
	}

	// ── list / logs ─────────────────────────────────────────────────────────

	pub async fn list(&self) -> Result<Vec<ProcessView>> {
		let records = self.registry.fetch_all()?;
		let live: Vec<u32> = records
			.iter()
			.filter_map(|r| r.pid())
			.filter(|pid| launcher::is_alive(*pid))
			.collect();
		let usage = UsageSampler::new().sample(&live).await;

		Ok(records
			.into_iter()
			.map(|record| {
				let alive = record.pid().is_some_and(|pid| live.contains(&pid));
				let usage = record.pid().and_then(|pid| usage.get(&pid).copied());
				ProcessView { record, alive, usage }
			})
			.collect())
	}

	/// Last `count` lines of one process's log.
	pub fn tail(&self, name: &str, count: usize) -> Result<Vec<String>> {
		let record = self.get(name)?;
		match logs::tail(&record.log_path, count) {
			Ok(lines) => Ok(lines),
			Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
			Err(e) => Err(e.into()),
		}
	}

	/// Last `count` lines of every log, merged by timestamp.
	pub fn tail_all(&self, count: usize) -> Result<Vec<TaggedLine>> {
		let mut sources = Vec::new();
		for record in self.registry.fetch_all()? {
			match logs::tail(&record.log_path, count) {
				Ok(lines) => sources.push((record.name, lines)),
				Err(e) if e.kind() == io::ErrorKind::NotFound => {}
				Err(e) => return Err(e.into()),
			}
		}
		Ok(logs::merge_chronological(sources))
	}

	pub async fn follow(&self, name: &str) -> Result<impl Stream<Item = io::Result<String>>> {
		let record = self.get(name)?;
		Ok(logs::follow(record.log_path).await?)
	}

	pub async fn follow_all(&self) -> Result<impl Stream<Item = io::Result<TaggedLine>>> {
		let sources = self
			.registry
			.fetch_all()?
			.into_iter()
			.map(|r| (r.name, r.log_path))
			.collect();
		Ok(logs::follow_all(sources).await)
	}

	// ── shared launch plumbing (also used by the monitor) ───────────────────

	fn prepare_log(&self, record: &ProcessRecord) {
		if let Err(e) = logs::rotate_if_needed(&record.log_path, self.config.logs.max_size_bytes) {
			tracing::warn!("{}: log rotation failed: {}", record.name, e);
		}
	}

	/// Rotate the log if needed, then launch the record's command detached.
	pub(crate) async fn spawn(&self, record: &ProcessRecord) -> Result<u32> {
		self.prepare_log(record);
		match launcher::launch_background(&record.command, &record.log_path).await {
			Ok(pid) => {
				let _ = logs::append_marker(&record.log_path, &format!("started (pid {})", pid));
				Ok(pid)
			}
			Err(e) => {
				let _ = logs::append_marker(&record.log_path, &format!("launch failed: {}", e));
				tracing::warn!("{}: launch failed: {}", record.name, e);
				Err(Error::launch(&record.name, e))
			}
		}
	}

	fn mark_failed(&self, record: &mut ProcessRecord) -> Result<()> {
		record.state = lifecycle::transition(&record.state, Event::LaunchFailed)
			.map_err(|r| r.into_error(&record.name))?;
		self.registry.save(record)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn target_parsing() {
		assert_eq!(Target::parse("all"), Target::All);
		assert_eq!(Target::parse("ALL"), Target::All);
		assert_eq!(Target::parse("2"), Target::Index(2));
		assert_eq!(Target::parse("web"), Target::Name("web".into()));
	}
}

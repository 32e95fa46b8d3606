use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::paths;

// ── Global config (~/.config/procward/config.toml) ──────────────────────────

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
	#[serde(default)]
	pub monitor: MonitorConfig,
	#[serde(default)]
	pub logs: LogsConfig,
	#[serde(default)]
	pub stop: StopConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
	#[serde(default = "default_interval")]
	pub interval_secs: u64,
}

impl Default for MonitorConfig {
	fn default() -> Self {
		Self { interval_secs: default_interval() }
	}
}

fn default_interval() -> u64 { 5 }

#[derive(Debug, Clone, Deserialize)]
pub struct LogsConfig {
	#[serde(default = "default_max_size")]
	pub max_size_bytes: u64,
}

impl Default for LogsConfig {
	fn default() -> Self {
		Self { max_size_bytes: default_max_size() }
	}
}

fn default_max_size() -> u64 { 5 * 1024 * 1024 }

#[derive(Debug, Clone, Deserialize)]
pub struct StopConfig {
	#[serde(default = "default_grace")]
	pub grace_secs: u64,
}

impl Default for StopConfig {
	fn default() -> Self {
		Self { grace_secs: default_grace() }
	}
}

fn default_grace() -> u64 { 3 }

impl Config {
	pub fn monitor_interval(&self) -> Duration {
		Duration::from_secs(self.monitor.interval_secs.max(1))
	}

	pub fn stop_grace(&self) -> Duration {
		Duration::from_secs(self.stop.grace_secs)
	}
}

pub fn load_config() -> Config {
	load_config_from(&paths::config_dir().join("config.toml"))
}

pub fn load_config_from(path: &Path) -> Config {
	if path.exists() {
		match std::fs::read_to_string(path) {
			Ok(content) => match toml::from_str(&content) {
				Ok(config) => return config,
				Err(e) => tracing::warn!("failed to parse {}: {}", path.display(), e),
			},
			Err(e) => tracing::warn!("failed to read {}: {}", path.display(), e),
		}
	}
	Config::default()
}

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Point-in-time resource usage of one process.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceUsage {
	pub cpu_percent: f32,
	pub memory_bytes: u64,
	/// OS start time, one-second resolution.
	pub started_at: Option<DateTime<Utc>>,
}

/// Samples the native process table.
pub struct UsageSampler {
	system: System,
}

impl Default for UsageSampler {
	fn default() -> Self {
		Self::new()
	}
}

impl UsageSampler {
	pub fn new() -> Self {
		Self { system: System::new() }
	}

	fn refresh(&mut self, pids: &[Pid]) {
		self.system.refresh_processes_specifics(
			ProcessesToUpdate::Some(pids),
			true,
			ProcessRefreshKind::nothing().with_cpu().with_memory(),
		);
	}

	/// CPU needs two samples; this waits the minimum interval between them.
	pub async fn sample(&mut self, pids: &[u32]) -> HashMap<u32, ResourceUsage> {
		if pids.is_empty() {
			return HashMap::new();
		}
		let sys_pids: Vec<Pid> = pids.iter().map(|p| Pid::from_u32(*p)).collect();
		self.refresh(&sys_pids);
		tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
		self.refresh(&sys_pids);

		let mut result = HashMap::new();
		for pid in pids {
			if let Some(process) = self.system.process(Pid::from_u32(*pid)) {
				result.insert(
					*pid,
					ResourceUsage {
						cpu_percent: process.cpu_usage(),
						memory_bytes: process.memory(),
						started_at: DateTime::from_timestamp(process.start_time() as i64, 0),
					},
				);
			}
		}
		result
	}
}

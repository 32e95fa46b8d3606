use chrono::Utc;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use owo_colors::OwoColorize;
use procward::logs::TaggedLine;
use procward::{BatchReport, Error, Monitor, Op, ProcessView, Status, Supervisor, Target};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pw", version, about = "Single-host process supervisor")]
struct Cli {
	#[command(subcommand)]
	command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
	/// Launch a command under supervision
	Start {
		command: String,
		#[arg(short, long)]
		name: Option<String>,
		/// Leave the process stopped if it exits
		#[arg(long)]
		no_restart: bool,
		/// Run attached to this terminal until it exits
		#[arg(long)]
		watch: bool,
	},
	Stop { target: String },
	Restart { target: String },
	Delete { target: String },
	#[command(alias = "ls")]
	List,
	Logs {
		target: Option<String>,
		#[arg(short, long, default_value_t = 50)]
		lines: usize,
		#[arg(short, long)]
		follow: bool,
	},
	/// Run the supervision loop until interrupted
	Monitor,
}

#[tokio::main]
async fn main() {
	let cli = Cli::parse();

	let default_level = if matches!(cli.command, Cmd::Monitor) { "info" } else { "warn" };
	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
		)
		.with_writer(std::io::stderr)
		.init();

	let sup = Supervisor::from_env();
	let code = match cli.command {
		Cmd::Start { command, name, no_restart, watch } => {
			cmd_start(&sup, name.as_deref(), &command, !no_restart, watch).await
		}
		Cmd::Stop { target } => cmd_batch(&sup, Op::Stop, &target).await,
		Cmd::Restart { target } => cmd_batch(&sup, Op::Restart, &target).await,
		Cmd::Delete { target } => cmd_batch(&sup, Op::Delete, &target).await,
		Cmd::List => cmd_list(&sup).await,
		Cmd::Logs { target, lines, follow } => cmd_logs(&sup, target.as_deref(), lines, follow).await,
		Cmd::Monitor => cmd_monitor(sup).await,
	};
	std::process::exit(code);
}

fn report_error(e: &Error) -> i32 {
	if e.is_noop() {
		eprintln!("{} {}", "note:".yellow(), e);
		0
	} else {
		eprintln!("{} {}", "error:".red().bold(), e);
		1
	}
}

async fn cmd_start(sup: &Supervisor, name: Option<&str>, command: &str, restart: bool, watch: bool) -> i32 {
	match sup.start(name, command, restart, watch).await {
		Ok(record) if watch => {
			eprintln!("{} {} finished", "○".dimmed(), record.name.bold());
			0
		}
		Ok(record) => {
			let pid = record.pid().map(|p| p.to_string()).unwrap_or_else(|| "-".into());
			eprintln!("{} {} started (pid {})", "●".green(), record.name.bold(), pid);
			0
		}
		Err(e) => report_error(&e),
	}
}

async fn cmd_batch(sup: &Supervisor, op: Op, target: &str) -> i32 {
	let report = match sup.apply(op, &Target::parse(target)).await {
		Ok(r) => r,
		Err(e) => return report_error(&e),
	};
	print_batch(op, &report);
	if report.is_ok() { 0 } else { 1 }
}

fn print_batch(op: Op, report: &BatchReport) {
	let verb = match op {
		Op::Stop => "stopped",
		Op::Restart => "restarted",
		Op::Delete => "deleted",
	};
	for name in &report.succeeded {
		eprintln!("{} {} {}", "●".green(), name.bold(), verb);
	}
	for e in &report.skipped {
		eprintln!("{} {}", "note:".yellow(), e);
	}
	for e in &report.failed {
		eprintln!("{} {}", "error:".red().bold(), e);
	}
}

async fn cmd_list(sup: &Supervisor) -> i32 {
	let views = match sup.list().await {
		Ok(v) => v,
		Err(e) => return report_error(&e),
	};
	if views.is_empty() {
		eprintln!("{}", "no processes".dimmed());
		return 0;
	}

	let width = views.iter().map(|v| v.record.name.len()).max().unwrap_or(0);
	for (i, view) in views.iter().enumerate() {
		print_process_line(i + 1, view, width);
	}
	0
}

fn print_process_line(index: usize, view: &ProcessView, name_width: usize) {
	let record = &view.record;
	let (circle, label) = match (record.status(), view.alive) {
		(Status::Running, true) => ("●".green().to_string(), "running".green().to_string()),
		(Status::Running, false) => ("●".yellow().to_string(), "dead".yellow().to_string()),
		(Status::Stopped, _) => ("○".dimmed().to_string(), "stopped".dimmed().to_string()),
		(Status::Error, _) => ("●".red().to_string(), "error".red().to_string()),
	};
	let pid = record.pid().map(|p| p.to_string()).unwrap_or_else(|| "-".into());
	let uptime = record
		.started_at()
		.filter(|_| view.alive)
		.map(|t| format_uptime((Utc::now() - t).num_seconds().max(0) as u64))
		.unwrap_or_else(|| "-".into());
	let (cpu, mem) = match view.usage {
		Some(u) => (format!("{:.1}%", u.cpu_percent), format_bytes(u.memory_bytes)),
		None => ("-".into(), "-".into()),
	};
	let restart = if record.restart_policy { "" } else { " no-restart" };

	println!(
		"{:>2} {} {:<width$} {:<8} {:<8} {:<7} {:<6} {:<8} {}{}",
		index,
		circle,
		record.name,
		label,
		pid,
		uptime,
		cpu,
		mem,
		record.command.dimmed(),
		restart.dimmed(),
		width = name_width
	);
}

async fn cmd_logs(sup: &Supervisor, target: Option<&str>, lines: usize, follow: bool) -> i32 {
	let name = match target.map(Target::parse) {
		None | Some(Target::All) => None,
		Some(t) => match sup.resolve(&t) {
			Ok(mut names) => names.pop(),
			Err(e) => return report_error(&e),
		},
	};

	let printed = match &name {
		Some(n) => sup.tail(n, lines).map(|ls| ls.iter().for_each(|l| println!("{}", l))),
		None => sup.tail_all(lines).map(|ls| ls.iter().for_each(print_tagged)),
	};
	if let Err(e) = printed {
		return report_error(&e);
	}
	if !follow {
		return 0;
	}

	let result = match &name {
		Some(n) => match sup.follow(n).await {
			Ok(stream) => {
				let mut stream = Box::pin(stream);
				while let Some(chunk) = stream.next().await {
					match chunk {
						Ok(text) => print!("{}", text),
						Err(e) => return report_error(&Error::from(e)),
					}
				}
				Ok(())
			}
			Err(e) => Err(e),
		},
		None => match sup.follow_all().await {
			Ok(stream) => {
				let mut stream = Box::pin(stream);
				while let Some(line) = stream.next().await {
					match line {
						Ok(tagged) => print_tagged(&tagged),
						Err(e) => return report_error(&Error::from(e)),
					}
				}
				Ok(())
			}
			Err(e) => Err(e),
		},
	};
	match result {
		Ok(()) => 0,
		Err(e) => report_error(&e),
	}
}

fn print_tagged(tagged: &TaggedLine) {
	println!("{} {}", format!("{} |", tagged.source).cyan(), tagged.line);
}

async fn cmd_monitor(sup: Supervisor) -> i32 {
	let monitor = Monitor::new(sup);
	match monitor.run().await {
		Ok(true) => 0,
		Ok(false) => {
			eprintln!("{} monitor already running", "note:".yellow());
			0
		}
		Err(e) => report_error(&e),
	}
}

fn format_uptime(secs: u64) -> String {
	if secs < 60 {
		format!("{}s", secs)
	} else if secs < 3600 {
		let m = secs / 60;
		let s = secs % 60;
		if s == 0 { format!("{}m", m) } else { format!("{}m{}s", m, s) }
	} else if secs < 86400 {
		let h = secs / 3600;
		let m = (secs % 3600) / 60;
		if m == 0 { format!("{}h", h) } else { format!("{}h{}m", h, m) }
	} else {
		let d = secs / 86400;
		let h = (secs % 86400) / 3600;
		if h == 0 { format!("{}d", d) } else { format!("{}d{}h", d, h) }
	}
}

fn format_bytes(bytes: u64) -> String {
	const MIB: u64 = 1024 * 1024;
	if bytes >= 1024 * MIB {
		format!("{:.1}G", bytes as f64 / (1024 * MIB) as f64)
	} else if bytes >= MIB {
		format!("{:.1}M", bytes as f64 / MIB as f64)
	} else {
		format!("{}K", bytes / 1024)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn uptime_formatting() {
		assert_eq!(format_uptime(42), "42s");
		assert_eq!(format_uptime(120), "2m");
		assert_eq!(format_uptime(3725), "1h2m");
		assert_eq!(format_uptime(90000), "1d1h");
	}

	#[test]
	fn byte_formatting() {
		assert_eq!(format_bytes(2048), "2K");
		assert_eq!(format_bytes(3 * 1024 * 1024), "3.0M");
	}

	#[test]
	fn cli_parses_start_flags() {
		let cli = Cli::parse_from(["pw", "start", "sleep 5", "-n", "nap", "--no-restart"]);
		match cli.command {
			Cmd::Start { command, name, no_restart, watch } => {
				assert_eq!(command, "sleep 5");
				assert_eq!(name.as_deref(), Some("nap"));
				assert!(no_restart);
				assert!(!watch);
			}
			other => panic!("unexpected {:?}", other),
		}
	}
}

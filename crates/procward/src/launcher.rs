use nix::errno::Errno;
use nix::sys::signal::{kill as send_signal, killpg, Signal};
use nix::unistd::Pid;
use std::fs::OpenOptions;
use std::future::Future;
use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};

use crate::output::LogSink;

const EXIT_POLL: Duration = Duration::from_millis(50);

/// Spawn `sh -c <command>` in its own session with stdout and stderr appended
/// to `log_path`. The child outlives the caller; while the caller's runtime is
/// alive it is reaped on exit so liveness checks never see a zombie.
pub async fn launch_background(command: &str, log_path: &Path) -> io::Result<u32> {
	if let Some(dir) = log_path.parent() {
		std::fs::create_dir_all(dir)?;
	}
	let log = OpenOptions::new().create(true).append(true).open(log_path)?;
	let log_err = log.try_clone()?;

	let mut cmd = Command::new("sh");
	cmd.args(["-c", command])
		.stdin(Stdio::null())
		.stdout(Stdio::from(log))
		.stderr(Stdio::from(log_err));
	// SAFETY: setsid is async-signal-safe and touches no parent state.
	unsafe {
		cmd.pre_exec(|| nix::unistd::setsid().map(|_| ()).map_err(io::Error::from));
	}

	let mut child = cmd.spawn()?;
	let pid = child
		.id()
		.ok_or_else(|| io::Error::other("spawned process has no pid"))?;

	tokio::spawn(async move {
		let _ = child.wait().await;
	});

	Ok(pid)
}

/// A foreground child whose output is mirrored to the terminal and the log.
pub struct Attached {
	child: Child,
	sink: LogSink,
}

#[derive(Debug)]
pub struct AttachedExit {
	pub status: ExitStatus,
	pub interrupted: bool,
}

/// Spawn `argv` as a direct child in its own process group, so that Ctrl-C
/// reaches it only through [`Attached::run`].
pub fn launch_attached(argv: &[String], log_path: &Path) -> io::Result<Attached> {
	let (program, args) = argv
		.split_first()
		.ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command"))?;
	let sink = LogSink::open(log_path)?;

	let child = Command::new(program)
		.args(args)
		.stdin(Stdio::null())
		.stdout(Stdio::piped())
		.stderr(Stdio::piped())
		.process_group(0)
		.spawn()?;

	Ok(Attached { child, sink })
}

impl Attached {
	pub fn pid(&self) -> Option<u32> {
		self.child.id()
	}

	/// Block until the child exits. Ctrl-C is forwarded as SIGINT; a child still
	/// alive after `grace` is killed. Returns once the child is reaped and both
	/// output streams are drained.
	pub async fn run(mut self, grace: Duration) -> io::Result<AttachedExit> {
		let pid = self.child.id();
		let out_task = self
			.child
			.stdout
			.take()
			.map(|s| tokio::spawn(tee(s, tokio::io::stdout(), self.sink.clone())));
		let err_task = self
			.child
			.stderr
			.take()
			.map(|s| tokio::spawn(tee(s, tokio::io::stderr(), self.sink.clone())));

		let (status, interrupted) = tokio::select! {
			status = self.child.wait() => (status?, false),
			_ = interrupt_requested(tokio::signal::ctrl_c()) => {
				tracing::info!("interrupt received, forwarding to child");
				(self.interrupt(pid, grace).await?, true)
			}
		};

		for task in [out_task, err_task].into_iter().flatten() {
			let _ = task.await;
		}
		self.sink.flush().await;

		Ok(AttachedExit { status, interrupted })
	}

	async fn interrupt(&mut self, pid: Option<u32>, grace: Duration) -> io::Result<ExitStatus> {
		if let Some(pid) = pid {
			signal_group(pid, Signal::SIGINT);
		}
		match tokio::time::timeout(grace, self.child.wait()).await {
			Ok(status) => status,
			Err(_) => {
				tracing::warn!("child ignored interrupt for {}s, killing", grace.as_secs());
				self.child.kill().await?;
				self.child.wait().await
			}
		}
	}
}

/// Resolves once `signal` reports an interrupt. If the listener could not be
/// installed it never resolves, leaving the child to exit on its own.
async fn interrupt_requested<F>(signal: F)
where
	F: Future<Output = io::Result<()>>,
{
	if let Err(e) = signal.await {
		tracing::warn!("cannot listen for Ctrl-C: {}", e);
		std::future::pending::<()>().await;
	}
}

async fn tee<R, W>(reader: R, mut terminal: W, sink: LogSink)
where
	R: AsyncRead + Unpin,
	W: AsyncWrite + Unpin,
{
	let mut reader = BufReader::new(reader);
	let mut line = Vec::new();
	loop {
		line.clear();
		match reader.read_until(b'\n', &mut line).await {
			Ok(0) => break,
			Ok(_) => {
				let _ = terminal.write_all(&line).await;
				let _ = terminal.flush().await;
				sink.write_line(&line).await;
			}
			Err(_) => break,
		}
	}
}

fn to_pid(pid: u32) -> Option<Pid> {
	match i32::try_from(pid) {
		Ok(raw) if raw > 0 => Some(Pid::from_raw(raw)),
		_ => None,
	}
}

/// Signal-0 check. A process we may not signal still counts as alive.
pub fn is_alive(pid: u32) -> bool {
	let Some(pid) = to_pid(pid) else {
		return false;
	};
	match send_signal(pid, None) {
		Ok(()) => true,
		Err(Errno::EPERM) => true,
		Err(_) => false,
	}
}

/// Ask the process (and the group it leads, if any) to exit. Does not wait.
pub fn terminate(pid: u32) {
	signal_group(pid, Signal::SIGTERM);
}

pub fn kill(pid: u32) {
	signal_group(pid, Signal::SIGKILL);
}

fn signal_group(pid: u32, signal: Signal) {
	let Some(pid) = to_pid(pid) else {
		return;
	};
	if killpg(pid, signal).is_err() {
		let _ = send_signal(pid, signal);
	}
}

/// Poll until `pid` is gone or `timeout` passes. Returns whether it exited.
pub async fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
	let deadline = tokio::time::Instant::now() + timeout;
	loop {
		if !is_alive(pid) {
			return true;
		}
		if tokio::time::Instant::now() >= deadline {
			return false;
		}
		tokio::time::sleep(EXIT_POLL).await;
	}
}

/// SIGTERM, wait up to `grace`, then SIGKILL.
pub async fn shutdown(pid: u32, grace: Duration) {
	if !is_alive(pid) {
		return;
	}
	terminate(pid);
	if wait_for_exit(pid, grace).await {
		return;
	}
	tracing::warn!("pid {} ignored SIGTERM for {}s, sending SIGKILL", pid, grace.as_secs());
	kill(pid);
	wait_for_exit(pid, Duration::from_secs(1)).await;
}

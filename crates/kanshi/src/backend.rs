//! The OS-facing half of the supervisor: spawning, reading, terminating and
//! reaping. [`TokioBackend`] is the real one; tests plug in their own.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::AsyncRead;
use tokio::process::{Child, Command};
use tracing::debug;

use crate::types::{ExitInfo, StreamKind};

/// Everything needed to launch one child.
#[derive(Debug, Clone, Default)]
pub struct LaunchSpec {
	pub program: PathBuf,
	pub args: Vec<String>,
	/// `None` inherits the caller's current directory.
	pub working_dir: Option<PathBuf>,
	pub env: HashMap<String, String>,
	pub capture_stderr: bool,
}

impl LaunchSpec {
	pub fn new(program: impl Into<PathBuf>) -> Self {
		Self {
			program: program.into(),
			capture_stderr: true,
			..Default::default()
		}
	}

	pub fn args<I, S>(mut self, args: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.args = args.into_iter().map(Into::into).collect();
		self
	}

	pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
		let dir = dir.into();
		self.working_dir = if dir.as_os_str().is_empty() { None } else { Some(dir) };
		self
	}

	pub fn env(mut self, key: impl Into<String>, val: impl Into<String>) -> Self {
		self.env.insert(key.into(), val.into());
		self
	}
}

pub type OutputStream = Box<dyn AsyncRead + Send + Unpin>;

/// A freshly launched child and the read ends of its redirected streams.
/// The parent's copies of the write ends are already closed.
pub struct Spawned<C> {
	pub child: C,
	pub pid: u32,
	pub streams: Vec<(StreamKind, OutputStream)>,
}

pub trait Backend: Send + Sync + 'static {
	type Child: ChildProcess;

	fn spawn(&self, spec: &LaunchSpec) -> io::Result<Spawned<Self::Child>>;
}

pub trait ChildProcess: Send + 'static {
	/// Unconditionally terminate the child (and anything it started in its
	/// process group). Does not wait.
	fn terminate(&mut self) -> io::Result<()>;

	/// Resolves once the child has exited and been reaped.
	fn wait(&mut self) -> impl Future<Output = io::Result<ExitInfo>> + Send;
}

/// Launches children with `tokio::process`. Each child gets null stdin,
/// piped stdout (and stderr unless disabled), its own process group on Unix
/// and no console window on Windows.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioBackend;

pub struct TokioChild {
	child: Child,
	pid: u32,
}

impl Backend for TokioBackend {
	type Child = TokioChild;

	fn spawn(&self, spec: &LaunchSpec) -> io::Result<Spawned<TokioChild>> {
		let mut cmd = Command::new(&spec.program);
		cmd.args(&spec.args)
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(if spec.capture_stderr { Stdio::piped() } else { Stdio::null() })
			.kill_on_drop(true);

		if let Some(dir) = &spec.working_dir {
			cmd.current_dir(dir);
		}
		for (key, val) in &spec.env {
			cmd.env(key, val);
		}

		#[cfg(unix)]
		cmd.process_group(0);

		#[cfg(windows)]
		{
			const CREATE_NO_WINDOW: u32 = 0x0800_0000;
			cmd.creation_flags(CREATE_NO_WINDOW);
		}

		// The read ends are close-on-exec; spawn closes our copies of the
		// write ends, so EOF arrives once the child side is gone.
		let mut child = cmd.spawn()?;
		let pid = child.id().unwrap_or(0);

		let mut streams: Vec<(StreamKind, OutputStream)> = Vec::with_capacity(2);
		if let Some(stdout) = child.stdout.take() {
			streams.push((StreamKind::Stdout, Box::new(stdout)));
		}
		if let Some(stderr) = child.stderr.take() {
			streams.push((StreamKind::Stderr, Box::new(stderr)));
		}

		debug!(pid, program = %spec.program.display(), "spawned");
		Ok(Spawned {
			child: TokioChild { child, pid },
			pid,
			streams,
		})
	}
}

impl ChildProcess for TokioChild {
	fn terminate(&mut self) -> io::Result<()> {
		if self.pid != 0 {
			#[cfg(unix)]
			kill_process_group(self.pid);
		}
		match self.child.start_kill() {
			Ok(()) => Ok(()),
			// already reaped
			Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
			Err(e) => Err(e),
		}
	}

	fn wait(&mut self) -> impl Future<Output = io::Result<ExitInfo>> + Send {
		async move {
			let status = self.child.wait().await?;
			Ok(ExitInfo::from(status))
		}
	}
}

impl Drop for TokioChild {
	fn drop(&mut self) {
		// kill_on_drop only reaches the leader
		if self.pid != 0 && matches!(self.child.try_wait(), Ok(None)) {
			#[cfg(unix)]
			kill_process_group(self.pid);
		}
	}
}

/// SIGKILL every process in the group led by `pid`.
#[cfg(unix)]
pub fn kill_process_group(pid: u32) {
	use nix::sys::signal::{killpg, Signal};
	use nix::unistd::Pid;
	let pgid = Pid::from_raw(pid as i32);
	if let Err(e) = killpg(pgid, Signal::SIGKILL) {
		debug!(pid, "killpg: {}", e);
	}
}

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of the child owned by a [`Supervisor`](crate::Supervisor).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RunState {
	Idle,
	Running { pid: u32 },
	Stopping,
	Exited { exit: ExitInfo },
}

impl RunState {
	pub fn is_running(&self) -> bool {
		matches!(self, RunState::Running { .. })
	}

	pub fn pid(&self) -> Option<u32> {
		match self {
			RunState::Running { pid } => Some(*pid),
			_ => None,
		}
	}
}

impl fmt::Display for RunState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			RunState::Idle => write!(f, "idle"),
			RunState::Running { pid } => write!(f, "running (pid {})", pid),
			RunState::Stopping => write!(f, "stopping"),
			RunState::Exited { exit } => write!(f, "exited ({})", exit),
		}
	}
}

/// How a child process ended. On Unix a process killed by a signal has no
/// exit code but carries the signal number instead.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExitInfo {
	pub code: Option<i32>,
	pub signal: Option<i32>,
}

impl ExitInfo {
	pub fn success(&self) -> bool {
		self.code == Some(0)
	}
}

impl From<std::process::ExitStatus> for ExitInfo {
	fn from(status: std::process::ExitStatus) -> Self {
		#[cfg(unix)]
		let signal = {
			use std::os::unix::process::ExitStatusExt;
			status.signal()
		};
		#[cfg(not(unix))]
		let signal = None;

		Self {
			code: status.code(),
			signal,
		}
	}
}

impl fmt::Display for ExitInfo {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match (self.code, self.signal) {
			(Some(code), _) => write!(f, "exit {}", code),
			(None, Some(sig)) => write!(f, "signal {}", sig),
			(None, None) => write!(f, "unknown status"),
		}
	}
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
	Stdout,
	Stderr,
}

impl fmt::Display for StreamKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			StreamKind::Stdout => write!(f, "stdout"),
			StreamKind::Stderr => write!(f, "stderr"),
		}
	}
}

/// One decoded line of child output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogLine {
	/// Position in the supervisor's output, counted from the last `clear_log`.
	pub seq: u64,
	pub stream: StreamKind,
	/// Line text without the trailing `\n` / `\r\n`.
	pub text: String,
	/// False for a final fragment flushed when the stream closed, or for a
	/// fragment split off because it exceeded the line length limit.
	pub terminated: bool,
	/// The bytes were not valid UTF-8 and were decoded with the legacy encoding.
	pub legacy_decoded: bool,
}

/// Result of [`Supervisor::stop`](crate::Supervisor::stop).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
	/// Nothing was running.
	NotRunning,
	/// The child had already exited on its own before `stop`.
	AlreadyExited(ExitInfo),
	/// The child exited within the grace window without being terminated.
	Exited(ExitInfo),
	/// The child was terminated by the supervisor.
	Killed(ExitInfo),
	/// The child did not report an exit within the bounded window; its tasks
	/// were aborted and its handles dropped.
	TimedOut,
}

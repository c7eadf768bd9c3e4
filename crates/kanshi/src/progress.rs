//! User-facing connection state derived from supervisor events.
//!
//! The policy never looks at the clock or the child itself: every input is
//! passed in, which keeps it deterministic. Output-driven and timer-driven
//! advancement can be enabled independently.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

use crate::classify::{Classification, PatternSet};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConnState {
	Disconnected,
	Connecting,
	Verifying,
	Connected,
	Disconnecting,
	Failed,
}

impl ConnState {
	/// States in which a child is expected to be running.
	pub fn is_active(&self) -> bool {
		matches!(
			self,
			ConnState::Connecting | ConnState::Verifying | ConnState::Connected | ConnState::Disconnecting
		)
	}
}

impl fmt::Display for ConnState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			ConnState::Disconnected => "Disconnected",
			ConnState::Connecting => "Connecting",
			ConnState::Verifying => "Verifying",
			ConnState::Connected => "Connected",
			ConnState::Disconnecting => "Disconnecting",
			ConnState::Failed => "Failed",
		};
		f.write_str(s)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionReason {
	UserConnect,
	UserDisconnect,
	Output(Classification),
	Elapsed,
	TimedOut,
	/// The child exited while the connection was supposed to be up.
	PrematureExit,
	/// The program could not be started at all.
	LaunchFailed,
	Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
	pub from: ConnState,
	pub to: ConnState,
	pub reason: TransitionReason,
}

impl fmt::Display for Transition {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} -> {} ({:?})", self.from, self.to, self.reason)
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyConfig {
	/// Advance on classified output lines.
	#[serde(default = "default_true")]
	pub follow_output: bool,
	/// Connecting -> Verifying after this long, regardless of output.
	#[serde(default)]
	pub verify_after_ms: Option<u64>,
	/// Verifying -> Connected after this long, regardless of output.
	#[serde(default)]
	pub connect_after_ms: Option<u64>,
	/// Give up if not Connected this long after the connect request.
	#[serde(default)]
	pub connect_timeout_ms: Option<u64>,
	#[serde(default)]
	pub patterns: PatternSet,
}

impl Default for PolicyConfig {
	fn default() -> Self {
		Self {
			follow_output: true,
			verify_after_ms: None,
			connect_after_ms: None,
			connect_timeout_ms: Some(30_000),
			patterns: PatternSet::default(),
		}
	}
}

impl PolicyConfig {
	/// Purely timer-driven: 2 s to Verifying, 1.5 s more to Connected.
	pub fn timed() -> Self {
		Self {
			follow_output: false,
			verify_after_ms: Some(2000),
			connect_after_ms: Some(1500),
			connect_timeout_ms: None,
			patterns: PatternSet::default(),
		}
	}
}

fn default_true() -> bool { true }

#[derive(Debug, Clone)]
pub struct ConnectionPolicy {
	config: PolicyConfig,
	state: ConnState,
	phase_started: Option<Instant>,
	connect_started: Option<Instant>,
}

impl ConnectionPolicy {
	pub fn new(config: PolicyConfig) -> Self {
		Self {
			config,
			state: ConnState::Disconnected,
			phase_started: None,
			connect_started: None,
		}
	}

	pub fn state(&self) -> ConnState {
		self.state
	}

	pub fn config(&self) -> &PolicyConfig {
		&self.config
	}

	pub fn begin_connect(&mut self, now: Instant) -> Option<Transition> {
		match self.state {
			ConnState::Disconnected | ConnState::Failed => {
				self.connect_started = Some(now);
				self.go(ConnState::Connecting, TransitionReason::UserConnect, now)
			}
			_ => None,
		}
	}

	pub fn begin_disconnect(&mut self, now: Instant) -> Option<Transition> {
		match self.state {
			ConnState::Connecting | ConnState::Verifying | ConnState::Connected => {
				self.go(ConnState::Disconnecting, TransitionReason::UserDisconnect, now)
			}
			_ => None,
		}
	}

	pub fn observe(&mut self, class: Classification, now: Instant) -> Option<Transition> {
		if !self.config.follow_output {
			return None;
		}
		let reason = TransitionReason::Output(class);
		match (class, self.state) {
			(Classification::Failure, ConnState::Connecting | ConnState::Verifying | ConnState::Connected) => {
				self.go(ConnState::Failed, reason, now)
			}
			(Classification::Success, ConnState::Connecting | ConnState::Verifying) => {
				self.go(ConnState::Connected, reason, now)
			}
			(Classification::Progress, ConnState::Connecting) => self.go(ConnState::Verifying, reason, now),
			_ => None,
		}
	}

	/// Apply timers. Returns at most one transition per call.
	pub fn tick(&mut self, now: Instant) -> Option<Transition> {
		let in_phase = self
			.phase_started
			.map(|t| now.saturating_duration_since(t))
			.unwrap_or_default();

		match self.state {
			ConnState::Connecting if elapsed(self.config.verify_after_ms, in_phase) => {
				return self.go(ConnState::Verifying, TransitionReason::Elapsed, now);
			}
			ConnState::Verifying if elapsed(self.config.connect_after_ms, in_phase) => {
				return self.go(ConnState::Connected, TransitionReason::Elapsed, now);
			}
			_ => {}
		}

		if matches!(self.state, ConnState::Connecting | ConnState::Verifying) {
			let since_connect = self
				.connect_started
				.map(|t| now.saturating_duration_since(t))
				.unwrap_or_default();
			if elapsed(self.config.connect_timeout_ms, since_connect) {
				return self.go(ConnState::Failed, TransitionReason::TimedOut, now);
			}
		}
		None
	}

	/// The supervisor reported that the child is gone without being asked.
	pub fn child_exited(&mut self, now: Instant) -> Option<Transition> {
		match self.state {
			ConnState::Connecting | ConnState::Verifying | ConnState::Connected => {
				self.go(ConnState::Failed, TransitionReason::PrematureExit, now)
			}
			ConnState::Disconnecting => self.go(ConnState::Disconnected, TransitionReason::Stopped, now),
			_ => None,
		}
	}

	/// The supervisor could not start the child for a pending connect.
	pub fn launch_failed(&mut self, now: Instant) -> Option<Transition> {
		match self.state {
			ConnState::Connecting => self.go(ConnState::Failed, TransitionReason::LaunchFailed, now),
			_ => None,
		}
	}

	/// The supervisor finished a `stop`. A failure stays visible.
	pub fn stopped(&mut self, now: Instant) -> Option<Transition> {
		match self.state {
			ConnState::Disconnected | ConnState::Failed => None,
			_ => self.go(ConnState::Disconnected, TransitionReason::Stopped, now),
		}
	}

	fn go(&mut self, to: ConnState, reason: TransitionReason, now: Instant) -> Option<Transition> {
		let from = self.state;
		self.state = to;
		self.phase_started = Some(now);
		if !matches!(to, ConnState::Connecting | ConnState::Verifying) {
			self.connect_started = None;
		}
		Some(Transition { from, to, reason })
	}
}

fn elapsed(limit_ms: Option<u64>, in_phase: Duration) -> bool {
	limit_ms.is_some_and(|ms| in_phase >= Duration::from_millis(ms))
}

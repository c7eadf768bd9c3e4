use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::backend::{Backend, ChildProcess, LaunchSpec, TokioBackend};
use crate::cmdline;
use crate::config::SupervisorConfig;
use crate::decode::TextDecoder;
use crate::error::LaunchError;
use crate::framing::LineFramer;
use crate::output::{DecodedLine, OutputBuffer};
use crate::types::*;

/// Owns at most one child process and captures its output.
///
/// `start`, `is_running` and the `consume_*` methods return promptly. Only
/// `stop` blocks, and never for longer than the configured bound. Dropping
/// the supervisor kills the child.
pub struct Supervisor<B: Backend = TokioBackend> {
	backend: B,
	config: SupervisorConfig,
	decoder: TextDecoder,
	output: OutputBuffer,
	shared: Arc<Mutex<Shared>>,
	run: Option<ActiveRun>,
}

struct Shared {
	state: RunState,
	/// The readers of the latest child are done, or were given up on.
	settled: bool,
	generation: u64,
}

struct ActiveRun {
	pid: u32,
	program: PathBuf,
	kill: watch::Sender<bool>,
	waiter: JoinHandle<WaitOutcome>,
	readers: Vec<AbortHandle>,
}

struct WaitOutcome {
	exit: Option<ExitInfo>,
	killed: bool,
}

impl Supervisor<TokioBackend> {
	pub fn new(config: SupervisorConfig) -> Self {
		Self::with_backend(TokioBackend, config)
	}
}

impl Default for Supervisor<TokioBackend> {
	fn default() -> Self {
		Self::new(SupervisorConfig::default())
	}
}

impl<B: Backend> Supervisor<B> {
	pub fn with_backend(backend: B, config: SupervisorConfig) -> Self {
		let decoder = TextDecoder::for_label(&config.legacy_encoding);
		let output = OutputBuffer::new(config.max_lines);
		Self {
			backend,
			config,
			decoder,
			output,
			shared: Arc::new(Mutex::new(Shared {
				state: RunState::Idle,
				settled: true,
				generation: 0,
			})),
			run: None,
		}
	}

	pub fn config(&self) -> &SupervisorConfig {
		&self.config
	}

	/// Launch `program` with `args`. An empty `working_dir` inherits ours.
	/// A child that is still owned is stopped first.
	pub async fn start<I, S>(
		&mut self,
		program: impl Into<PathBuf>,
		args: I,
		working_dir: impl Into<PathBuf>,
	) -> Result<u32, LaunchError>
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		let mut spec = LaunchSpec::new(program).args(args).working_dir(working_dir);
		spec.capture_stderr = self.config.capture_stderr;
		self.start_spec(spec).await
	}

	pub async fn start_spec(&mut self, spec: LaunchSpec) -> Result<u32, LaunchError> {
		if self.run.is_some() {
			self.stop(true).await;
		}

		if let Some(dir) = &spec.working_dir {
			if let Err(source) = check_dir(dir) {
				warn!(dir = %dir.display(), "working directory unusable: {}", source);
				return Err(LaunchError::WorkingDir {
					program: spec.program.clone(),
					dir: dir.clone(),
					source,
				});
			}
		}

		let command_line = cmdline::render(&spec.program, &spec.args);
		let spawned = match self.backend.spawn(&spec) {
			Ok(s) => s,
			Err(e) => {
				let err = LaunchError::from_io(spec.program.clone(), e);
				warn!("launch failed: {}", err);
				return Err(err);
			}
		};
		let pid = spawned.pid;
		info!(pid, "started: {}", command_line);

		let generation = {
			let mut shared = self.lock_shared();
			shared.generation += 1;
			shared.state = RunState::Running { pid };
			shared.settled = false;
			shared.generation
		};

		let mut readers = Vec::with_capacity(spawned.streams.len());
		let mut abort_handles = Vec::with_capacity(spawned.streams.len());
		for (stream, reader) in spawned.streams {
			let handle = tokio::spawn(pipe_output(
				reader,
				stream,
				self.output.clone(),
				self.decoder,
				self.config.chunk_size,
				self.config.max_line_bytes,
			));
			abort_handles.push(handle.abort_handle());
			readers.push(handle);
		}

		let (kill_tx, kill_rx) = watch::channel(false);
		let waiter = tokio::spawn(wait_for_exit(
			spawned.child,
			pid,
			kill_rx,
			readers,
			self.config.drain_timeout(),
			Arc::clone(&self.shared),
			generation,
		));

		self.run = Some(ActiveRun {
			pid,
			program: spec.program,
			kill: kill_tx,
			waiter,
			readers: abort_handles,
		});
		Ok(pid)
	}

	/// Stop the child and release everything it held. Safe to call when
	/// nothing is running.
	///
	/// With `force`, the child gets the grace window to exit on its own and is
	/// then killed. Without it, the child gets the kill timeout before being
	/// killed. Either way the whole call is bounded by
	/// [`SupervisorConfig::stop_bound`]; a child that still has not been reaped
	/// by then is abandoned and its tasks aborted.
	pub async fn stop(&mut self, force: bool) -> StopOutcome {
		let Some(mut run) = self.run.take() else {
			return StopOutcome::NotRunning;
		};

		let exited_before = match self.state() {
			RunState::Exited { exit } => Some(exit),
			_ => None,
		};
		self.set_state(RunState::Stopping);

		let deadline = Instant::now() + self.config.stop_bound();
		let first_wait = if force {
			self.config.grace()
		} else {
			self.config.kill_timeout()
		};

		let mut joined = timeout(first_wait, &mut run.waiter).await.ok();
		if joined.is_none() {
			debug!(pid = run.pid, "requesting kill");
			let _ = run.kill.send(true);
			joined = timeout_at(deadline, &mut run.waiter).await.ok();
		}

		let outcome = match joined {
			Some(joined) => {
				let waited = joined.ok();
				let exit = waited.as_ref().and_then(|w| w.exit).unwrap_or_default();
				match (exited_before, waited.map(|w| w.killed)) {
					(Some(exit), _) => StopOutcome::AlreadyExited(exit),
					(None, Some(false)) => StopOutcome::Exited(exit),
					_ => StopOutcome::Killed(exit),
				}
			}
			None => {
				warn!(
					pid = run.pid,
					program = %run.program.display(),
					"child did not exit within {:?}, abandoning it",
					self.config.stop_bound()
				);
				run.waiter.abort();
				StopOutcome::TimedOut
			}
		};

		// Readers still blocked here belong to a descendant that kept the pipe
		// open; aborting drops our read end.
		for reader in &run.readers {
			reader.abort();
		}

		{
			let mut shared = self.lock_shared();
			shared.generation += 1;
			shared.state = RunState::Idle;
			shared.settled = true;
		}
		info!(pid = run.pid, "stopped: {:?}", outcome);
		outcome
	}

	/// True while the child is alive as far as the waiter has observed. Turns
	/// false as soon as the child is reaped, even if a descendant still holds
	/// one of its pipes open.
	pub fn is_running(&self) -> bool {
		self.state().is_running()
	}

	/// True once the last child's output has been fully read into the buffer
	/// (or the drain timeout gave up on a pipe a descendant kept open). Also
	/// true when nothing was ever started.
	///
	/// `!is_running() && is_settled()` means every line the child wrote
	/// before exiting can be consumed.
	pub fn is_settled(&self) -> bool {
		self.lock_shared().settled
	}

	pub fn state(&self) -> RunState {
		self.lock_shared().state
	}

	pub fn pid(&self) -> Option<u32> {
		self.run.as_ref().map(|r| r.pid)
	}

	/// Text of every line captured since the previous call.
	pub fn consume_new_output(&self) -> String {
		self.output.consume_text()
	}

	/// Same cursor as [`consume_new_output`](Self::consume_new_output), but
	/// keeps the stream tag and sequence number of each line.
	pub fn consume_new_lines(&self) -> Vec<LogLine> {
		self.output.consume_lines()
	}

	pub fn clear_log(&self) {
		self.output.clear();
	}

	pub fn dropped_lines(&self) -> u64 {
		self.output.dropped()
	}

	pub fn output(&self) -> &OutputBuffer {
		&self.output
	}

	fn lock_shared(&self) -> MutexGuard<'_, Shared> {
		self.shared.lock().unwrap_or_else(|e| e.into_inner())
	}

	fn set_state(&self, state: RunState) {
		self.lock_shared().state = state;
	}
}

impl<B: Backend> Drop for Supervisor<B> {
	fn drop(&mut self) {
		if let Some(run) = self.run.take() {
			debug!(pid = run.pid, "supervisor dropped with a live child");
			// Dropping the child inside the aborted waiter kills it.
			run.waiter.abort();
			for reader in &run.readers {
				reader.abort();
			}
		}
	}
}

fn check_dir(dir: &std::path::Path) -> std::io::Result<()> {
	let meta = std::fs::metadata(dir)?;
	if meta.is_dir() {
		Ok(())
	} else {
		Err(std::io::Error::other("not a directory"))
	}
}

async fn pipe_output<R: AsyncRead + Unpin>(
	mut reader: R,
	stream: StreamKind,
	output: OutputBuffer,
	decoder: TextDecoder,
	chunk_size: usize,
	max_line_bytes: usize,
) {
	let mut framer = LineFramer::new(max_line_bytes);
	let mut buf = vec![0u8; chunk_size.max(1)];
	loop {
		match reader.read(&mut buf).await {
			Ok(0) => break,
			Ok(n) => {
				let lines = framer
					.push(&buf[..n])
					.into_iter()
					.map(|raw| decode_line(&decoder, &raw.bytes, raw.terminated))
					.collect();
				output.append(stream, lines);
			}
			Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
			Err(e) => {
				debug!(%stream, "read ended: {}", e);
				break;
			}
		}
	}
	if let Some(raw) = framer.finish() {
		output.append(stream, vec![decode_line(&decoder, &raw.bytes, raw.terminated)]);
	}
	debug!(%stream, "reader finished");
}

fn decode_line(decoder: &TextDecoder, bytes: &[u8], terminated: bool) -> DecodedLine {
	let (text, legacy_decoded) = decoder.decode(bytes);
	DecodedLine {
		text,
		terminated,
		legacy_decoded,
	}
}

async fn wait_for_exit<C: ChildProcess>(
	mut child: C,
	pid: u32,
	mut kill: watch::Receiver<bool>,
	readers: Vec<JoinHandle<()>>,
	drain_timeout: Duration,
	shared: Arc<Mutex<Shared>>,
	generation: u64,
) -> WaitOutcome {
	let mut killed = false;
	let result = tokio::select! {
		status = child.wait() => status,
		_ = kill.changed() => {
			killed = true;
			if let Err(e) = child.terminate() {
				warn!(pid, "terminate failed: {}", e);
			}
			child.wait().await
		}
	};

	let exit = match result {
		Ok(exit) => {
			info!(pid, "child exited: {}", exit);
			Some(exit)
		}
		Err(e) => {
			warn!(pid, "wait failed: {}", e);
			None
		}
	};

	{
		let mut guard = shared.lock().unwrap_or_else(|e| e.into_inner());
		if guard.generation == generation && guard.state.is_running() {
			guard.state = RunState::Exited {
				exit: exit.unwrap_or_default(),
			};
		}
	}

	// Let the readers hit EOF so that everything the child wrote is in the
	// buffer before the run counts as settled.
	let deadline = Instant::now() + drain_timeout;
	for reader in readers {
		if timeout_at(deadline, reader).await.is_err() {
			debug!(pid, "readers still open after {:?}", drain_timeout);
			break;
		}
	}

	let mut guard = shared.lock().unwrap_or_else(|e| e.into_inner());
	if guard.generation == generation {
		guard.settled = true;
	}
	drop(guard);

	WaitOutcome { exit, killed }
}

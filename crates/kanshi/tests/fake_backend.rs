//! Supervisor behaviour against an in-memory backend, for the cases a real
//! process cannot reproduce reliably: a child that never dies, exact chunk
//! boundaries, and launch failures.

use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kanshi::backend::OutputStream;
use kanshi::{
	Backend, ChildProcess, ExitInfo, LaunchError, LaunchSpec, RunState, Spawned, StopOutcome, StreamKind,
	Supervisor, SupervisorConfig,
};
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::sync::watch;

/// Handles the test keeps to drive the fake child.
struct Controls {
	stdout: Option<DuplexStream>,
	exit: Arc<watch::Sender<Option<ExitInfo>>>,
	dropped: Arc<AtomicBool>,
}

#[derive(Clone, Default)]
struct FakeBackend {
	ignore_terminate: bool,
	fail_with: Option<io::ErrorKind>,
	controls: Arc<Mutex<Option<Controls>>>,
}

struct FakeChild {
	ignore_terminate: bool,
	exit_tx: Arc<watch::Sender<Option<ExitInfo>>>,
	exit_rx: watch::Receiver<Option<ExitInfo>>,
	dropped: Arc<AtomicBool>,
}

impl Backend for FakeBackend {
	type Child = FakeChild;

	fn spawn(&self, _spec: &LaunchSpec) -> io::Result<Spawned<FakeChild>> {
		if let Some(kind) = self.fail_with {
			return Err(io::Error::new(kind, "fake spawn failure"));
		}
		let (writer, reader) = tokio::io::duplex(64);
		let (exit_tx, exit_rx) = watch::channel(None);
		let exit_tx = Arc::new(exit_tx);
		let dropped = Arc::new(AtomicBool::new(false));

		*self.controls.lock().unwrap() = Some(Controls {
			stdout: Some(writer),
			exit: Arc::clone(&exit_tx),
			dropped: Arc::clone(&dropped),
		});

		let stream: OutputStream = Box::new(reader);
		Ok(Spawned {
			child: FakeChild {
				ignore_terminate: self.ignore_terminate,
				exit_tx,
				exit_rx,
				dropped,
			},
			pid: 4242,
			streams: vec![(StreamKind::Stdout, stream)],
		})
	}
}

impl FakeBackend {
	fn take_stdout(&self) -> DuplexStream {
		self.controls.lock().unwrap().as_mut().unwrap().stdout.take().unwrap()
	}

	fn exit(&self, code: i32) {
		let controls = self.controls.lock().unwrap();
		controls.as_ref().unwrap().exit.send_replace(Some(ExitInfo {
			code: Some(code),
			signal: None,
		}));
	}

	fn child_dropped(&self) -> bool {
		self.controls.lock().unwrap().as_ref().unwrap().dropped.load(Ordering::SeqCst)
	}
}

impl ChildProcess for FakeChild {
	fn terminate(&mut self) -> io::Result<()> {
		if !self.ignore_terminate {
			self.exit_tx.send_replace(Some(ExitInfo {
				code: None,
				signal: Some(9),
			}));
		}
		Ok(())
	}

	fn wait(&mut self) -> impl Future<Output = io::Result<ExitInfo>> + Send {
		async move {
			loop {
				let current = *self.exit_rx.borrow_and_update();
				if let Some(exit) = current {
					return Ok(exit);
				}
				if self.exit_rx.changed().await.is_err() {
					std::future::pending::<()>().await;
				}
			}
		}
	}
}

impl Drop for FakeChild {
	fn drop(&mut self) {
		self.dropped.store(true, Ordering::SeqCst);
	}
}

fn fast_config() -> SupervisorConfig {
	SupervisorConfig {
		grace_ms: 20,
		kill_timeout_ms: 200,
		drain_timeout_ms: 100,
		..Default::default()
	}
}

async fn settle() {
	tokio::time::sleep(Duration::from_millis(30)).await;
}

#[tokio::test]
async fn unkillable_child_stop_is_bounded() {
	let backend = FakeBackend {
		ignore_terminate: true,
		..Default::default()
	};
	let mut sup = Supervisor::with_backend(backend.clone(), fast_config());
	sup.start("fake", Vec::<String>::new(), "").await.unwrap();
	// keep the writer alive so the reader is blocked too
	let _stdout = backend.take_stdout();

	let started = std::time::Instant::now();
	let outcome = sup.stop(true).await;
	let took = started.elapsed();

	assert_eq!(outcome, StopOutcome::TimedOut);
	assert!(took >= Duration::from_millis(300), "stop took {:?}", took);
	assert!(took < sup.config().stop_bound() + Duration::from_millis(300), "stop took {:?}", took);
	assert_eq!(sup.state(), RunState::Idle);
	assert!(!sup.is_running());

	settle().await;
	assert!(backend.child_dropped(), "aborted waiter should drop the child");
}

#[tokio::test]
async fn unkillable_child_gentle_stop_is_bounded() {
	let backend = FakeBackend {
		ignore_terminate: true,
		..Default::default()
	};
	let mut sup = Supervisor::with_backend(backend.clone(), fast_config());
	sup.start("fake", Vec::<String>::new(), "").await.unwrap();
	let _stdout = backend.take_stdout();

	let started = std::time::Instant::now();
	let outcome = sup.stop(false).await;
	let took = started.elapsed();

	assert_eq!(outcome, StopOutcome::TimedOut);
	// the kill timeout is spent waiting for a natural exit first
	assert!(took >= Duration::from_millis(300), "stop took {:?}", took);
	assert!(took < sup.config().stop_bound() + Duration::from_millis(50), "stop took {:?}", took);
	assert_eq!(sup.state(), RunState::Idle);
	assert!(sup.is_settled());
}

#[tokio::test]
async fn gentle_stop_kills_after_kill_timeout() {
	let backend = FakeBackend::default();
	let mut sup = Supervisor::with_backend(backend.clone(), fast_config());
	sup.start("fake", Vec::<String>::new(), "").await.unwrap();
	drop(backend.take_stdout());

	let started = std::time::Instant::now();
	let outcome = sup.stop(false).await;
	assert_eq!(outcome, StopOutcome::Killed(ExitInfo { code: None, signal: Some(9) }));
	assert!(started.elapsed() >= Duration::from_millis(200));
	assert!(started.elapsed() < sup.config().stop_bound());
}

#[tokio::test]
async fn exit_is_reported_before_pipe_closes() {
	let backend = FakeBackend::default();
	let mut sup = Supervisor::with_backend(backend.clone(), fast_config());
	sup.start("fake", Vec::<String>::new(), "").await.unwrap();
	let mut stdout = backend.take_stdout();
	stdout.write_all(b"up\n").await.unwrap();

	// a descendant would keep the write end open like this
	backend.exit(0);
	settle().await;
	assert!(!sup.is_running());
	assert!(!sup.is_settled());
	assert_eq!(sup.consume_new_output(), "up\n");

	// the drain timeout gives up on the open pipe
	tokio::time::sleep(Duration::from_millis(150)).await;
	assert!(sup.is_settled());
	assert!(matches!(sup.stop(true).await, StopOutcome::AlreadyExited(_)));
}

#[tokio::test]
async fn lines_split_across_writes() {
	let backend = FakeBackend::default();
	let mut sup = Supervisor::with_backend(backend.clone(), fast_config());
	sup.start("fake", Vec::<String>::new(), "").await.unwrap();
	let mut stdout = backend.take_stdout();

	stdout.write_all(b"first li").await.unwrap();
	settle().await;
	assert_eq!(sup.consume_new_output(), "");

	stdout.write_all(b"ne\nsecond\nthi").await.unwrap();
	settle().await;
	assert_eq!(sup.consume_new_output(), "first line\nsecond\n");

	stdout.write_all(b"rd").await.unwrap();
	drop(stdout);
	backend.exit(0);
	settle().await;

	assert!(!sup.is_running());
	assert!(sup.is_settled());
	let lines = sup.consume_new_lines();
	assert_eq!(lines.len(), 1);
	assert_eq!(lines[0].text, "third");
	assert!(!lines[0].terminated);
	assert_eq!(sup.stop(true).await, StopOutcome::AlreadyExited(ExitInfo { code: Some(0), signal: None }));
}

#[tokio::test]
async fn byte_at_a_time_output_loses_nothing() {
	let backend = FakeBackend::default();
	let mut sup = Supervisor::with_backend(backend.clone(), fast_config());
	sup.start("fake", Vec::<String>::new(), "").await.unwrap();
	let mut stdout = backend.take_stdout();

	let mut expected = String::new();
	for i in 1..=50 {
		expected.push_str(&format!("LINE-{:04} 回复\n", i));
	}
	let mut collected = String::new();
	for byte in expected.as_bytes() {
		stdout.write_all(std::slice::from_ref(byte)).await.unwrap();
		collected.push_str(&sup.consume_new_output());
	}
	drop(stdout);
	backend.exit(0);
	settle().await;
	collected.push_str(&sup.consume_new_output());

	assert_eq!(collected, expected);
}

#[tokio::test]
async fn silent_child_is_killed() {
	let backend = FakeBackend::default();
	let mut sup = Supervisor::with_backend(backend.clone(), fast_config());
	sup.start("fake", Vec::<String>::new(), "").await.unwrap();
	let stdout = backend.take_stdout();
	settle().await;
	assert_eq!(sup.consume_new_output(), "");

	// the fake pipe only closes when the test lets go of it
	drop(stdout);
	let outcome = sup.stop(true).await;
	assert_eq!(outcome, StopOutcome::Killed(ExitInfo { code: None, signal: Some(9) }));
}

#[tokio::test]
async fn spawn_failure_leaves_supervisor_idle() {
	let backend = FakeBackend {
		fail_with: Some(io::ErrorKind::PermissionDenied),
		..Default::default()
	};
	let mut sup = Supervisor::with_backend(backend, fast_config());
	let err = sup.start("fake", Vec::<String>::new(), "").await.unwrap_err();

	assert!(matches!(err, LaunchError::PermissionDenied { .. }));
	assert_eq!(err.to_string(), "fake: permission denied");
	assert_eq!(sup.state(), RunState::Idle);
	assert_eq!(sup.stop(true).await, StopOutcome::NotRunning);
}

#[tokio::test]
async fn premature_exit_is_visible() {
	let backend = FakeBackend::default();
	let mut sup = Supervisor::with_backend(backend.clone(), fast_config());
	sup.start("fake", Vec::<String>::new(), "").await.unwrap();
	assert!(sup.is_running());

	drop(backend.take_stdout());
	backend.exit(1);
	settle().await;

	assert!(!sup.is_running());
	assert_eq!(
		sup.state(),
		RunState::Exited {
			exit: ExitInfo { code: Some(1), signal: None }
		}
	);
}

#[tokio::test]
async fn drop_releases_child() {
	let backend = FakeBackend::default();
	let mut sup = Supervisor::with_backend(backend.clone(), fast_config());
	sup.start("fake", Vec::<String>::new(), "").await.unwrap();
	let _stdout = backend.take_stdout();

	drop(sup);
	settle().await;
	assert!(backend.child_dropped());
}

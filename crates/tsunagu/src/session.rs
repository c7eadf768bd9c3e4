use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use kanshi::{
	ConnState, ConnectionPolicy, ExitInfo, LineClassifier, LogLine, PatternClassifier, StopOutcome, StreamKind,
	Supervisor, SupervisorConfig, Transition,
};
use owo_colors::OwoColorize;
use tracing::{debug, info};

use crate::emit::{self, LaunchPlan};
use crate::paths::AppPaths;
use crate::settings::Settings;

/// Bring the tunnel up and follow it until it dies or the user presses
/// Ctrl-C. Returns the final connection state.
pub async fn connect(settings: &Settings, paths: &AppPaths, timed: bool, frame: Duration) -> Result<ConnState> {
	let plan = emit::launch_plan(settings)?;
	let workdir = paths.state_dir().to_path_buf();
	prepare_workdir(&workdir, &plan)?;

	let policy_config = settings.policy.resolve(settings.protocol, timed);
	let classifier = PatternClassifier::new(&policy_config.patterns)?;
	let mut policy = ConnectionPolicy::new(policy_config);
	let mut sup = Supervisor::new(settings.supervisor.clone());

	eprintln!(
		"{} {} via {}",
		"tsunagu".bold(),
		settings.protocol,
		kanshi::cmdline::render(&plan.program, &plan.args).dimmed()
	);
	report(policy.begin_connect(Instant::now()));

	if let Err(e) = sup.start(&plan.program, plan.args.clone(), &workdir).await {
		report(policy.launch_failed(Instant::now()));
		return Err(e).context("starting tunnel");
	}

	let ctrl_c = tokio::signal::ctrl_c();
	tokio::pin!(ctrl_c);
	let mut ticker = tokio::time::interval(frame);
	let mut interrupted = false;

	loop {
		tokio::select! {
			_ = &mut ctrl_c => {
				interrupted = true;
				eprintln!();
			}
			_ = ticker.tick() => {}
		}

		let running = sup.is_running();
		let now = Instant::now();
		for line in sup.consume_new_lines() {
			print_line(&line);
			report(policy.observe(classifier.classify(&line.text), now));
		}
		report(policy.tick(now));

		if interrupted {
			break;
		}
		if !running {
			// stop below waits for the remaining output
			report(policy.child_exited(now));
			break;
		}
		if policy.state() == ConnState::Failed {
			break;
		}
	}

	report(policy.begin_disconnect(Instant::now()));
	let outcome = sup.stop(true).await;
	for line in sup.consume_new_lines() {
		print_line(&line);
	}
	print_outcome(&outcome);
	report(policy.stopped(Instant::now()));

	Ok(policy.state())
}

/// Supervise `program` until it exits or Ctrl-C. Returns the exit status
/// when the program ended on its own.
pub async fn run_program(
	program: &Path,
	args: &[String],
	cwd: Option<PathBuf>,
	config: SupervisorConfig,
	frame: Duration,
) -> Result<Option<ExitInfo>> {
	let mut sup = Supervisor::new(config);
	let pid = sup
		.start(program, args.iter().cloned(), cwd.unwrap_or_default())
		.await
		.context("starting program")?;
	debug!(pid, "supervising");

	let ctrl_c = tokio::signal::ctrl_c();
	tokio::pin!(ctrl_c);
	let mut ticker = tokio::time::interval(frame);

	let exit = loop {
		tokio::select! {
			_ = &mut ctrl_c => {
				eprintln!();
				break None;
			}
			_ = ticker.tick() => {}
		}
		// settled is set after Exited, so once it reads true the state is
		// final and every line is already buffered
		let settled = sup.is_settled();
		let state = sup.state();
		for line in sup.consume_new_lines() {
			print_line(&line);
		}
		match state {
			kanshi::RunState::Exited { exit } if settled => break Some(exit),
			_ => {}
		}
	};

	let outcome = sup.stop(true).await;
	for line in sup.consume_new_lines() {
		print_line(&line);
	}
	if exit.is_none() {
		print_outcome(&outcome);
	}
	if sup.dropped_lines() > 0 {
		info!("{} old lines were evicted from the buffer", sup.dropped_lines());
	}
	Ok(exit)
}

fn prepare_workdir(dir: &Path, plan: &LaunchPlan) -> Result<()> {
	std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
	if let Some(artifact) = &plan.artifact {
		let path = dir.join(&artifact.file_name);
		std::fs::write(&path, &artifact.contents).with_context(|| format!("writing {}", path.display()))?;
		info!(path = %path.display(), "wrote backend config");
	}
	Ok(())
}

fn print_line(line: &LogLine) {
	match line.stream {
		StreamKind::Stdout => println!("{}", line.text),
		StreamKind::Stderr => println!("{}", line.text.yellow()),
	}
}

fn report(transition: Option<Transition>) {
	let Some(t) = transition else {
		return;
	};
	debug!("{}", t);
	let label = t.to.to_string();
	match t.to {
		ConnState::Connected => eprintln!("{} {}", "●".green(), label.green().bold()),
		ConnState::Connecting | ConnState::Verifying => eprintln!("{} {}", "●".yellow(), label.yellow()),
		ConnState::Failed => eprintln!("{} {} ({:?})", "●".red(), label.red().bold(), t.reason),
		ConnState::Disconnecting | ConnState::Disconnected => eprintln!("{} {}", "○".dimmed(), label.dimmed()),
	}
}

fn print_outcome(outcome: &StopOutcome) {
	match outcome {
		StopOutcome::NotRunning => {}
		StopOutcome::AlreadyExited(exit) | StopOutcome::Exited(exit) => {
			eprintln!("{} {}", "exited".dimmed(), exit);
		}
		StopOutcome::Killed(exit) => eprintln!("{} {}", "killed".yellow(), exit),
		StopOutcome::TimedOut => eprintln!("{}", "did not exit in time, abandoned".red()),
	}
}

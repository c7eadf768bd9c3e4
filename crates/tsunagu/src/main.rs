mod cli;
mod emit;
mod logging;
mod paths;
mod session;
mod settings;

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use kanshi::ConnState;
use owo_colors::OwoColorize;
use tracing::warn;

use cli::{Cli, Command};
use paths::AppPaths;
use settings::{Origin, Settings};

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();
	logging::init_logging(cli.log_level)?;

	let paths = AppPaths::from_env();
	let settings_path = cli.settings.clone().unwrap_or_else(|| paths.settings_path());

	match cli.command {
		Command::Connect { timed, frame_ms } => {
			let (settings, origin) = Settings::load_with_origin(&settings_path);
			let result = session::connect(&settings, &paths, timed, Duration::from_millis(frame_ms.max(1))).await;
			if origin == Origin::Invalid {
				warn!("not saving settings over unreadable {}", settings_path.display());
			} else if let Err(e) = settings.save(&settings_path) {
				warn!("could not save settings: {:#}", e);
			}
			if result? == ConnState::Failed {
				std::process::exit(1);
			}
		}
		Command::Run { program, args, cwd } => {
			let settings = Settings::load(&settings_path);
			let exit = session::run_program(&program, &args, cwd, settings.supervisor, Duration::from_millis(100)).await?;
			if let Some(exit) = exit {
				if !exit.success() {
					std::process::exit(exit.code.unwrap_or(1));
				}
			}
		}
		Command::Emit => {
			let settings = Settings::load(&settings_path);
			let plan = emit::launch_plan(&settings)?;
			if let Some(artifact) = &plan.artifact {
				eprintln!("{}", format!("# {}", artifact.file_name).dimmed());
				print!("{}", artifact.contents);
			}
			eprintln!("{}", format!("# {}", kanshi::cmdline::render(&plan.program, &plan.args)).dimmed());
		}
		Command::Init => {
			if settings_path.exists() {
				eprintln!("settings already exist");
			} else {
				Settings::default().save(&settings_path)?;
				eprintln!("{} wrote default settings", "●".green());
			}
			println!("{}", settings_path.display());
		}
	}
	Ok(())
}

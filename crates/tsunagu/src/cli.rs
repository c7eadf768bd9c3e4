use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(name = "tsunagu", version, about = "Launch and watch a VPN tunnel program", long_about = None)]
pub struct Cli {
	/// Logging level. Falls back to TSUNAGU_LOG, then info.
	#[arg(long, global = true, value_enum, value_name = "LEVEL")]
	pub log_level: Option<LogLevel>,

	/// Settings file. Defaults to settings.toml in the config directory.
	#[arg(long, global = true, value_name = "PATH")]
	pub settings: Option<PathBuf>,

	#[command(subcommand)]
	pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
	/// Connect using the saved settings; Ctrl-C disconnects
	Connect {
		/// Advance on timers only, ignoring the tunnel's output
		#[arg(long)]
		timed: bool,
		/// Poll interval for child output, in milliseconds
		#[arg(long, value_name = "MS", default_value_t = 100)]
		frame_ms: u64,
	},
	/// Supervise an arbitrary program and stream its output
	Run {
		program: PathBuf,
		#[arg(trailing_var_arg = true, allow_hyphen_values = true)]
		args: Vec<String>,
		/// Working directory for the program
		#[arg(long, value_name = "DIR")]
		cwd: Option<PathBuf>,
	},
	/// Print the backend configuration generated from the settings
	Emit,
	/// Write default settings if none exist
	Init,
}

#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
	Error,
	Warn,
	Info,
	Debug,
	Trace,
}

//! Level comes from `--log-level`, then `TSUNAGU_LOG`, then `info`. Logs go to
//! stderr so that stdout carries only the child's output.

use anyhow::{anyhow, Result};
use tracing_subscriber::fmt;

use crate::cli::LogLevel;

pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
	let level = match cli_level {
		Some(lvl) => level_from_log_level(lvl),
		None => std::env::var("TSUNAGU_LOG")
			.ok()
			.and_then(|s| parse_level_str(&s))
			.unwrap_or(tracing::Level::INFO),
	};

	fmt()
		.with_max_level(level)
		.with_target(false)
		.with_writer(std::io::stderr)
		.try_init()
		.map_err(|e| anyhow!("logging already initialised: {}", e))
}

fn level_from_log_level(lvl: LogLevel) -> tracing::Level {
	match lvl {
		LogLevel::Error => tracing::Level::ERROR,
		LogLevel::Warn => tracing::Level::WARN,
		LogLevel::Info => tracing::Level::INFO,
		LogLevel::Debug => tracing::Level::DEBUG,
		LogLevel::Trace => tracing::Level::TRACE,
	}
}

fn parse_level_str(s: &str) -> Option<tracing::Level> {
	match s.trim().to_lowercase().as_str() {
		"error" => Some(tracing::Level::ERROR),
		"warn" | "warning" => Some(tracing::Level::WARN),
		"info" => Some(tracing::Level::INFO),
		"debug" => Some(tracing::Level::DEBUG),
		"trace" => Some(tracing::Level::TRACE),
		_ => None,
	}
}

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for a [`Supervisor`](crate::Supervisor). Deserializes from a
/// table where every field is optional.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SupervisorConfig {
	/// How long `stop(true)` lets the child exit on its own before killing it.
	#[serde(default = "default_grace_ms")]
	pub grace_ms: u64,
	/// How long to wait for the exit after a kill (or, for `stop(false)`,
	/// for a natural exit before escalating).
	#[serde(default = "default_kill_timeout_ms")]
	pub kill_timeout_ms: u64,
	/// How long the waiter lets readers drain the pipes after the child exits.
	#[serde(default = "default_drain_timeout_ms")]
	pub drain_timeout_ms: u64,
	#[serde(default = "default_chunk_size")]
	pub chunk_size: usize,
	/// Lines kept in the output buffer; older lines are evicted.
	#[serde(default = "default_max_lines")]
	pub max_lines: usize,
	/// A fragment without a newline is split off once it grows past this.
	#[serde(default = "default_max_line_bytes")]
	pub max_line_bytes: usize,
	/// WHATWG label of the encoding used for lines that are not UTF-8.
	#[serde(default = "default_legacy_encoding")]
	pub legacy_encoding: String,
	#[serde(default = "default_true")]
	pub capture_stderr: bool,
}

impl Default for SupervisorConfig {
	fn default() -> Self {
		Self {
			grace_ms: default_grace_ms(),
			kill_timeout_ms: default_kill_timeout_ms(),
			drain_timeout_ms: default_drain_timeout_ms(),
			chunk_size: default_chunk_size(),
			max_lines: default_max_lines(),
			max_line_bytes: default_max_line_bytes(),
			legacy_encoding: default_legacy_encoding(),
			capture_stderr: true,
		}
	}
}

impl SupervisorConfig {
	pub fn grace(&self) -> Duration {
		Duration::from_millis(self.grace_ms)
	}

	pub fn kill_timeout(&self) -> Duration {
		Duration::from_millis(self.kill_timeout_ms)
	}

	pub fn drain_timeout(&self) -> Duration {
		Duration::from_millis(self.drain_timeout_ms)
	}

	/// Upper bound on how long `stop` can block.
	pub fn stop_bound(&self) -> Duration {
		self.grace() + self.kill_timeout() + self.drain_timeout()
	}
}

fn default_grace_ms() -> u64 { 150 }
fn default_kill_timeout_ms() -> u64 { 1500 }
fn default_drain_timeout_ms() -> u64 { 500 }
fn default_chunk_size() -> usize { 4096 }
fn default_max_lines() -> usize { 10_000 }
fn default_max_line_bytes() -> usize { 64 * 1024 }
fn default_legacy_encoding() -> String { "gbk".into() }
fn default_true() -> bool { true }

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn empty_table_uses_defaults() {
		let config: SupervisorConfig = toml::from_str("").unwrap();
		assert_eq!(config, SupervisorConfig::default());
		assert_eq!(config.stop_bound(), Duration::from_millis(2150));
	}

	#[test]
	fn partial_table_overrides() {
		let config: SupervisorConfig =
			toml::from_str("grace_ms = 0\nlegacy_encoding = \"windows-1252\"").unwrap();
		assert_eq!(config.grace_ms, 0);
		assert_eq!(config.legacy_encoding, "windows-1252");
		assert_eq!(config.chunk_size, 4096);
	}
}

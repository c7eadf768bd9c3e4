use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use kanshi::{PatternSet, PolicyConfig, SupervisorConfig};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, warn};

// ── settings.toml ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
	#[serde(default)]
	pub server: String,
	#[serde(default = "default_port", deserialize_with = "clamp_port")]
	pub port: u16,
	#[serde(default)]
	pub protocol: Protocol,
	#[serde(default)]
	pub vmess: VmessSettings,
	#[serde(default)]
	pub hysteria2: Hysteria2Settings,
	#[serde(default)]
	pub openvpn: OpenVpnSettings,
	#[serde(default)]
	pub singbox: SingBoxSettings,
	#[serde(default)]
	pub custom: CustomSettings,
	#[serde(default)]
	pub policy: PolicySettings,
	#[serde(default)]
	pub supervisor: SupervisorConfig,
}

impl Default for Settings {
	fn default() -> Self {
		Self {
			server: String::new(),
			port: default_port(),
			protocol: Protocol::default(),
			vmess: VmessSettings::default(),
			hysteria2: Hysteria2Settings::default(),
			openvpn: OpenVpnSettings::default(),
			singbox: SingBoxSettings::default(),
			custom: CustomSettings::default(),
			policy: PolicySettings::default(),
			supervisor: SupervisorConfig::default(),
		}
	}
}

fn default_port() -> u16 { 443 }

fn clamp_port<'de, D: Deserializer<'de>>(d: D) -> Result<u16, D::Error> {
	let raw = i64::deserialize(d)?;
	Ok(raw.clamp(1, u16::MAX as i64) as u16)
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
	#[default]
	WireGuard,
	OpenVpn,
	Shadowsocks,
	Vmess,
	Hysteria2,
	Custom,
}

impl fmt::Display for Protocol {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			Protocol::WireGuard => "WireGuard",
			Protocol::OpenVpn => "OpenVPN",
			Protocol::Shadowsocks => "Shadowsocks",
			Protocol::Vmess => "VMess",
			Protocol::Hysteria2 => "Hysteria2",
			Protocol::Custom => "Custom",
		};
		f.write_str(s)
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VmessSettings {
	#[serde(default)]
	pub uuid: String,
	#[serde(default = "default_true")]
	pub tls: bool,
	/// TLS server name, also sent as the Host header.
	#[serde(default)]
	pub sni: String,
	#[serde(default = "default_ws_path")]
	pub ws_path: String,
}

impl Default for VmessSettings {
	fn default() -> Self {
		Self { uuid: String::new(), tls: true, sni: String::new(), ws_path: default_ws_path() }
	}
}

fn default_true() -> bool { true }
fn default_ws_path() -> String { "/".into() }

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Hysteria2Settings {
	#[serde(default)]
	pub password: String,
	#[serde(default)]
	pub sni: String,
	#[serde(default = "default_up_mbps")]
	pub up_mbps: u32,
	#[serde(default = "default_down_mbps")]
	pub down_mbps: u32,
}

impl Default for Hysteria2Settings {
	fn default() -> Self {
		Self {
			password: String::new(),
			sni: String::new(),
			up_mbps: default_up_mbps(),
			down_mbps: default_down_mbps(),
		}
	}
}

fn default_up_mbps() -> u32 { 10 }
fn default_down_mbps() -> u32 { 50 }

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OpenVpnSettings {
	#[serde(default = "default_openvpn_program")]
	pub program: String,
	#[serde(default)]
	pub config_file: String,
	#[serde(default = "default_verb")]
	pub verb: u8,
	#[serde(default)]
	pub extra_args: Vec<String>,
}

impl Default for OpenVpnSettings {
	fn default() -> Self {
		Self {
			program: default_openvpn_program(),
			config_file: String::new(),
			verb: default_verb(),
			extra_args: Vec::new(),
		}
	}
}

fn default_openvpn_program() -> String { "openvpn".into() }
fn default_verb() -> u8 { 3 }

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SingBoxSettings {
	#[serde(default = "default_singbox_program")]
	pub program: String,
}

impl Default for SingBoxSettings {
	fn default() -> Self {
		Self { program: default_singbox_program() }
	}
}

fn default_singbox_program() -> String { "sing-box".into() }

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CustomSettings {
	#[serde(default)]
	pub program: String,
	#[serde(default)]
	pub args: Vec<String>,
}

// ── connection policy ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PolicyMode {
	/// Follow the tunnel's output lines.
	#[default]
	Output,
	/// Advance on timers alone.
	Timed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicySettings {
	#[serde(default)]
	pub mode: PolicyMode,
	#[serde(default = "default_verify_after_ms")]
	pub verify_after_ms: u64,
	#[serde(default = "default_connect_after_ms")]
	pub connect_after_ms: u64,
	#[serde(default = "default_connect_timeout_ms")]
	pub connect_timeout_ms: Option<u64>,
	/// Overrides the built-in patterns for the selected protocol.
	#[serde(default)]
	pub patterns: Option<PatternSet>,
}

impl Default for PolicySettings {
	fn default() -> Self {
		Self {
			mode: PolicyMode::default(),
			verify_after_ms: default_verify_after_ms(),
			connect_after_ms: default_connect_after_ms(),
			connect_timeout_ms: default_connect_timeout_ms(),
			patterns: None,
		}
	}
}

fn default_verify_after_ms() -> u64 { 2000 }
fn default_connect_after_ms() -> u64 { 1500 }
fn default_connect_timeout_ms() -> Option<u64> { Some(30_000) }

impl PolicySettings {
	/// Build the policy for `protocol`. Output mode without any pattern to
	/// follow falls back to timers.
	pub fn resolve(&self, protocol: Protocol, force_timed: bool) -> PolicyConfig {
		let patterns = self.patterns.clone().unwrap_or_else(|| builtin_patterns(protocol));
		let empty = patterns.progress.is_empty() && patterns.success.is_empty() && patterns.failure.is_empty();

		if force_timed || self.mode == PolicyMode::Timed || empty {
			if empty && self.mode == PolicyMode::Output && !force_timed {
				debug!(%protocol, "no output patterns, using timers");
			}
			return PolicyConfig {
				follow_output: false,
				verify_after_ms: Some(self.verify_after_ms),
				connect_after_ms: Some(self.connect_after_ms),
				connect_timeout_ms: None,
				patterns: PatternSet::default(),
			};
		}

		PolicyConfig {
			follow_output: true,
			verify_after_ms: None,
			connect_after_ms: None,
			connect_timeout_ms: self.connect_timeout_ms,
			patterns,
		}
	}
}

/// Log lines worth reacting to for each backend.
pub fn builtin_patterns(protocol: Protocol) -> PatternSet {
	let list = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
	match protocol {
		Protocol::Vmess | Protocol::Hysteria2 => PatternSet {
			progress: list(&[r"(?i)inbound/\w+\[\w+\]: tcp server started", r"(?i)outbound/\w+\["]),
			success: list(&[r"(?i)sing-box started"]),
			failure: list(&[r"(?i)\bFATAL\b", r"(?i)start service: "]),
		},
		Protocol::OpenVpn => PatternSet {
			progress: list(&[r"TLS: Initial packet from", r"Peer Connection Initiated"]),
			success: list(&[r"Initialization Sequence Completed"]),
			failure: list(&[r"AUTH_FAILED", r"Exiting due to fatal error", r"Cannot resolve host address"]),
		},
		Protocol::WireGuard | Protocol::Shadowsocks | Protocol::Custom => PatternSet::default(),
	}
}

// ── load / save ─────────────────────────────────────────────────────────────

/// Where loaded settings came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
	File,
	/// No file yet; defaults.
	Missing,
	/// The file exists but could not be read or parsed; defaults. Saving
	/// over it would destroy what the user wrote.
	Invalid,
}

impl Settings {
	/// Missing file: defaults. Unreadable or malformed file: a warning, then
	/// defaults.
	pub fn load(path: &Path) -> Settings {
		Self::load_with_origin(path).0
	}

	pub fn load_with_origin(path: &Path) -> (Settings, Origin) {
		let content = match std::fs::read_to_string(path) {
			Ok(c) => c,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				debug!(path = %path.display(), "no settings file, using defaults");
				return (Settings::default(), Origin::Missing);
			}
			Err(e) => {
				warn!(path = %path.display(), "failed to read settings: {}", e);
				return (Settings::default(), Origin::Invalid);
			}
		};
		match toml::from_str(&content) {
			Ok(s) => (s, Origin::File),
			Err(e) => {
				warn!(path = %path.display(), "failed to parse settings: {}", e);
				(Settings::default(), Origin::Invalid)
			}
		}
	}

	pub fn save(&self, path: &Path) -> Result<()> {
		if let Some(dir) = path.parent() {
			std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
		}
		let text = toml::to_string_pretty(self).context("serializing settings")?;
		std::fs::write(path, text).with_context(|| format!("writing {}", path.display()))?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn missing_file_gives_defaults() {
		let dir = tempfile::tempdir().unwrap();
		let s = Settings::load(&dir.path().join("nope.toml"));
		assert_eq!(s, Settings::default());
		assert_eq!(s.port, 443);
		assert!(s.vmess.tls);
		assert_eq!(s.hysteria2.down_mbps, 50);
	}

	#[test]
	fn malformed_file_gives_defaults() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("settings.toml");
		std::fs::write(&path, "server = [unclosed").unwrap();
		assert_eq!(Settings::load(&path), Settings::default());
		assert_eq!(Settings::load_with_origin(&path).1, Origin::Invalid);
	}

	#[test]
	fn origin_distinguishes_missing_from_file() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("settings.toml");
		assert_eq!(Settings::load_with_origin(&path).1, Origin::Missing);

		std::fs::write(&path, "server = \"a.example\"\n").unwrap();
		let (s, origin) = Settings::load_with_origin(&path);
		assert_eq!(origin, Origin::File);
		assert_eq!(s.server, "a.example");
	}

	#[test]
	fn port_is_clamped() {
		let s: Settings = toml::from_str("port = 0").unwrap();
		assert_eq!(s.port, 1);
		let s: Settings = toml::from_str("port = 70000").unwrap();
		assert_eq!(s.port, 65535);
		let s: Settings = toml::from_str("port = 8443").unwrap();
		assert_eq!(s.port, 8443);
	}

	#[test]
	fn save_then_load_keeps_everything() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("nested").join("settings.toml");
		let mut s = Settings::default();
		s.server = "vpn.example.com".into();
		s.protocol = Protocol::Hysteria2;
		s.hysteria2.password = "hunter2".into();
		s.openvpn.extra_args = vec!["--auth-nocache".into()];
		s.policy.patterns = Some(PatternSet {
			success: vec!["ready".into()],
			..Default::default()
		});
		s.supervisor.grace_ms = 300;

		s.save(&path).unwrap();
		assert_eq!(Settings::load(&path), s);
	}

	#[test]
	fn partial_file_fills_defaults() {
		let s: Settings = toml::from_str(
			r#"
			server = "1.2.3.4"
			protocol = "openvpn"

			[openvpn]
			config_file = "office.ovpn"

			[supervisor]
			kill_timeout_ms = 5000
			"#,
		)
		.unwrap();
		assert_eq!(s.protocol, Protocol::OpenVpn);
		assert_eq!(s.openvpn.program, "openvpn");
		assert_eq!(s.openvpn.verb, 3);
		assert_eq!(s.supervisor.kill_timeout_ms, 5000);
		assert_eq!(s.supervisor.grace_ms, SupervisorConfig::default().grace_ms);
	}

	#[test]
	fn policy_resolution() {
		let p = PolicySettings::default();

		let cfg = p.resolve(Protocol::OpenVpn, false);
		assert!(cfg.follow_output);
		assert_eq!(cfg.connect_timeout_ms, Some(30_000));
		assert_eq!(cfg.patterns.success, vec!["Initialization Sequence Completed".to_string()]);

		let cfg = p.resolve(Protocol::OpenVpn, true);
		assert!(!cfg.follow_output);
		assert_eq!(cfg.verify_after_ms, Some(2000));
		assert_eq!(cfg.connect_after_ms, Some(1500));

		// nothing to follow for a custom program
		let cfg = p.resolve(Protocol::Custom, false);
		assert!(!cfg.follow_output);
	}

	#[test]
	fn builtin_patterns_compile() {
		for protocol in [Protocol::Vmess, Protocol::Hysteria2, Protocol::OpenVpn] {
			let c = kanshi::PatternClassifier::new(&builtin_patterns(protocol)).unwrap();
			assert!(!c.is_empty());
		}
	}
}

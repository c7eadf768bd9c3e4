//! Turns settings into a concrete command line plus, for sing-box based
//! protocols, the JSON config file that command reads.

use std::path::PathBuf;

use anyhow::{bail, Result};
use serde_json::{json, Value};

use crate::settings::{Protocol, Settings};

pub const LISTEN_ADDR: &str = "127.0.0.1";
pub const SOCKS_PORT: u16 = 10808;
pub const HTTP_PORT: u16 = 10809;
pub const SINGBOX_CONFIG: &str = "sb.json";

/// A file the program expects in its working directory.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
	pub file_name: String,
	pub contents: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LaunchPlan {
	pub program: PathBuf,
	pub args: Vec<String>,
	pub artifact: Option<Artifact>,
}

pub fn launch_plan(settings: &Settings) -> Result<LaunchPlan> {
	match settings.protocol {
		Protocol::Vmess | Protocol::Hysteria2 => Ok(LaunchPlan {
			program: PathBuf::from(&settings.singbox.program),
			args: vec!["run".into(), "-c".into(), SINGBOX_CONFIG.into()],
			artifact: Some(Artifact {
				file_name: SINGBOX_CONFIG.into(),
				contents: emit_singbox(settings)?,
			}),
		}),
		Protocol::OpenVpn => {
			let ovpn = &settings.openvpn;
			if ovpn.config_file.is_empty() {
				bail!("openvpn.config_file is not set");
			}
			let mut args = vec![
				"--config".to_string(),
				ovpn.config_file.clone(),
				"--verb".to_string(),
				ovpn.verb.to_string(),
			];
			args.extend(ovpn.extra_args.iter().cloned());
			Ok(LaunchPlan {
				program: PathBuf::from(&ovpn.program),
				args,
				artifact: None,
			})
		}
		Protocol::Custom => {
			if settings.custom.program.is_empty() {
				bail!("custom.program is not set");
			}
			Ok(LaunchPlan {
				program: PathBuf::from(&settings.custom.program),
				args: settings.custom.args.clone(),
				artifact: None,
			})
		}
		Protocol::WireGuard | Protocol::Shadowsocks => {
			bail!("{} is not implemented yet", settings.protocol)
		}
	}
}

/// sing-box config with local socks and http inbounds and a single outbound.
pub fn emit_singbox(settings: &Settings) -> Result<String> {
	if settings.server.trim().is_empty() {
		bail!("server is not set");
	}
	let outbound = match settings.protocol {
		Protocol::Vmess => vmess_outbound(settings),
		Protocol::Hysteria2 => hysteria2_outbound(settings),
		other => bail!("{} does not run through sing-box", other),
	};

	let config = json!({
		"log": { "disabled": false, "level": "info" },
		"inbounds": [
			{ "type": "socks", "listen": LISTEN_ADDR, "listen_port": SOCKS_PORT },
			{ "type": "http", "listen": LISTEN_ADDR, "listen_port": HTTP_PORT },
		],
		"outbounds": [outbound],
	});
	let mut text = serde_json::to_string_pretty(&config)?;
	text.push('\n');
	Ok(text)
}

fn vmess_outbound(s: &Settings) -> Value {
	json!({
		"type": "vmess",
		"server": s.server,
		"server_port": s.port,
		"uuid": s.vmess.uuid,
		"security": "auto",
		"transport": {
			"type": "ws",
			"path": s.vmess.ws_path,
		},
		"tls": { "enabled": s.vmess.tls, "server_name": s.vmess.sni },
	})
}

fn hysteria2_outbound(s: &Settings) -> Value {
	json!({
		"type": "hysteria2",
		"server": s.server,
		"server_port": s.port,
		"password": s.hysteria2.password,
		"tls": { "enabled": true, "server_name": s.hysteria2.sni },
		"up_mbps": s.hysteria2.up_mbps,
		"down_mbps": s.hysteria2.down_mbps,
	})
}

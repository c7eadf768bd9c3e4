use std::ffi::OsString;
use std::path::{Path, PathBuf};

const APP: &str = "tsunagu";

/// On-disk layout, resolved once at startup:
///
/// - `$XDG_CONFIG_HOME/tsunagu/settings.toml`, else `~/.config/tsunagu/`
/// - `$XDG_STATE_HOME/tsunagu/`, else `~/.local/state/tsunagu/`: generated
///   backend configs; the tunnel program runs with it as its working directory
///
/// Without a home directory both land under the system temp dir.
#[derive(Debug, Clone)]
pub struct AppPaths {
	config: PathBuf,
	state: PathBuf,
}

impl AppPaths {
	pub fn from_env() -> Self {
		Self::resolve(|key| std::env::var_os(key))
	}

	fn resolve(var: impl Fn(&str) -> Option<OsString>) -> Self {
		let home = var("HOME").filter(|h| !h.is_empty()).map(PathBuf::from);
		let base = |xdg: &str, under_home: &[&str]| -> PathBuf {
			match (var(xdg).filter(|v| !v.is_empty()), &home) {
				(Some(dir), _) => PathBuf::from(dir),
				(None, Some(home)) => under_home.iter().fold(home.clone(), |p, part| p.join(part)),
				(None, None) => std::env::temp_dir(),
			}
		};
		Self {
			config: base("XDG_CONFIG_HOME", &[".config"]).join(APP),
			state: base("XDG_STATE_HOME", &[".local", "state"]).join(APP),
		}
	}

	pub fn state_dir(&self) -> &Path {
		&self.state
	}

	pub fn settings_path(&self) -> PathBuf {
		self.config.join("settings.toml")
	}
}

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failure to create the pipes or launch the child. The supervisor is left
/// idle with no handles open when this is returned.
#[derive(Error, Debug)]
pub enum LaunchError {
	#[error("{}: program not found", program.display())]
	NotFound { program: PathBuf },

	#[error("{}: permission denied", program.display())]
	PermissionDenied { program: PathBuf },

	#[error("{}: working directory {} is not usable: {source}", program.display(), dir.display())]
	WorkingDir {
		program: PathBuf,
		dir: PathBuf,
		#[source]
		source: io::Error,
	},

	#[error("{}: spawn failed: {source}", program.display())]
	Io {
		program: PathBuf,
		#[source]
		source: io::Error,
	},
}

impl LaunchError {
	pub(crate) fn from_io(program: PathBuf, source: io::Error) -> Self {
		match source.kind() {
			io::ErrorKind::NotFound => LaunchError::NotFound { program },
			io::ErrorKind::PermissionDenied => LaunchError::PermissionDenied { program },
			_ => LaunchError::Io { program, source },
		}
	}

	pub fn program(&self) -> &std::path::Path {
		match self {
			LaunchError::NotFound { program }
			| LaunchError::PermissionDenied { program }
			| LaunchError::WorkingDir { program, .. }
			| LaunchError::Io { program, .. } => program,
		}
	}
}

#[derive(Error, Debug)]
pub enum ClassifierError {
	#[error("invalid {kind} pattern '{pattern}': {source}")]
	InvalidPattern {
		kind: &'static str,
		pattern: String,
		#[source]
		source: regex::Error,
	},
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn maps_os_error_kinds() {
		let err = LaunchError::from_io(
			"/nope/sing-box".into(),
			io::Error::new(io::ErrorKind::NotFound, "No such file or directory"),
		);
		assert!(matches!(err, LaunchError::NotFound { .. }));
		assert_eq!(err.to_string(), "/nope/sing-box: program not found");

		let err = LaunchError::from_io("x".into(), io::Error::from_raw_os_error(24));
		assert!(matches!(err, LaunchError::Io { .. }));
		assert!(err.to_string().starts_with("x: spawn failed: "));
	}
}

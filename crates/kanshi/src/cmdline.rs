//! Command-line rendering for display and diagnostics.
//!
//! The child always receives its arguments as a vector, so this never affects
//! what the program sees; it is what gets logged and shown to the user.

use std::borrow::Cow;
use std::path::Path;

/// Quote `arg` if it is empty or contains whitespace or a double quote.
/// Embedded quotes are escaped with a backslash.
pub fn quote_arg(arg: &str) -> Cow<'_, str> {
	if !arg.is_empty() && !arg.chars().any(|c| c.is_whitespace() || c == '"') {
		return Cow::Borrowed(arg);
	}
	let mut out = String::with_capacity(arg.len() + 2);
	out.push('"');
	for c in arg.chars() {
		if c == '"' {
			out.push_str("\\\"");
		} else {
			out.push(c);
		}
	}
	out.push('"');
	Cow::Owned(out)
}

pub fn render(program: &Path, args: &[String]) -> String {
	let program = program.to_string_lossy();
	let mut line = quote_arg(&program).into_owned();
	for arg in args {
		line.push(' ');
		line.push_str(&quote_arg(arg));
	}
	line
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn plain_args_pass_through() {
		assert_eq!(quote_arg("--verb"), "--verb");
		assert!(matches!(quote_arg("sb.json"), Cow::Borrowed(_)));
	}

	#[test]
	fn whitespace_and_quotes_are_quoted() {
		assert_eq!(quote_arg("C:/Program Files/OpenVPN"), "\"C:/Program Files/OpenVPN\"");
		assert_eq!(quote_arg("say \"hi\""), "\"say \\\"hi\\\"\"");
		assert_eq!(quote_arg("tab\there"), "\"tab\there\"");
		assert_eq!(quote_arg(""), "\"\"");
	}

	#[test]
	fn renders_full_line() {
		let line = render(
			Path::new("/opt/sing box/sing-box"),
			&["run".into(), "-c".into(), "sb.json".into()],
		);
		assert_eq!(line, "\"/opt/sing box/sing-box\" run -c sb.json");
	}
}

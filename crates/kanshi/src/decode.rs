use encoding_rs::Encoding;
use tracing::warn;

/// Decodes complete lines of child output. UTF-8 is tried first; anything
/// that fails strict validation is decoded with the legacy encoding instead,
/// which never fails (unmappable bytes become U+FFFD).
#[derive(Debug, Clone, Copy)]
pub struct TextDecoder {
	legacy: &'static Encoding,
}

impl TextDecoder {
	pub fn new(legacy: &'static Encoding) -> Self {
		Self { legacy }
	}

	/// Look up the legacy encoding by WHATWG label ("gbk", "windows-1252",
	/// "shift_jis", ...). Unknown labels fall back to windows-1252.
	pub fn for_label(label: &str) -> Self {
		match Encoding::for_label(label.trim().as_bytes()) {
			Some(enc) => Self::new(enc),
			None => {
				warn!("unknown legacy encoding '{}', using windows-1252", label);
				Self::new(encoding_rs::WINDOWS_1252)
			}
		}
	}

	pub fn legacy(&self) -> &'static Encoding {
		self.legacy
	}

	/// Returns the text and whether the legacy fallback was used.
	pub fn decode(&self, bytes: &[u8]) -> (String, bool) {
		match std::str::from_utf8(bytes) {
			Ok(s) => (s.to_owned(), false),
			Err(_) => {
				let (text, _) = self.legacy.decode_without_bom_handling(bytes);
				(text.into_owned(), true)
			}
		}
	}
}

impl Default for TextDecoder {
	fn default() -> Self {
		Self::new(encoding_rs::GBK)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn utf8_is_preferred() {
		let dec = TextDecoder::default();
		assert_eq!(dec.decode("连接成功 ok".as_bytes()), ("连接成功 ok".to_string(), false));
	}

	#[test]
	fn gbk_fallback() {
		let dec = TextDecoder::for_label("gbk");
		// "连接" in GBK
		let bytes = [0xC1, 0xAC, 0xBD, 0xD3];
		let (text, legacy) = dec.decode(&bytes);
		assert!(legacy);
		assert_eq!(text, "连接");
	}

	#[test]
	fn latin1_fallback_never_drops_data() {
		let dec = TextDecoder::for_label("windows-1252");
		let (text, legacy) = dec.decode(b"caf\xe9");
		assert!(legacy);
		assert_eq!(text, "café");
	}

	#[test]
	fn unknown_label_uses_windows_1252() {
		let dec = TextDecoder::for_label("no-such-encoding");
		assert_eq!(dec.legacy(), encoding_rs::WINDOWS_1252);
	}
}

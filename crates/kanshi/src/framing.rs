/// A line of raw bytes with the `\n` (and a preceding `\r`) removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLine {
	pub bytes: Vec<u8>,
	pub terminated: bool,
}

/// Splits a byte stream into lines. Chunks may end anywhere, including in the
/// middle of a multi-byte character; the incomplete tail is kept until the
/// next chunk completes it or [`finish`](Self::finish) flushes it.
#[derive(Debug)]
pub struct LineFramer {
	pending: Vec<u8>,
	max_line_bytes: usize,
}

impl LineFramer {
	pub fn new(max_line_bytes: usize) -> Self {
		Self {
			pending: Vec::new(),
			max_line_bytes: max_line_bytes.max(1),
		}
	}

	pub fn push(&mut self, chunk: &[u8]) -> Vec<RawLine> {
		let mut lines = Vec::new();
		let mut rest = chunk;

		while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
			self.pending.extend_from_slice(&rest[..pos]);
			let mut bytes = std::mem::take(&mut self.pending);
			if bytes.last() == Some(&b'\r') {
				bytes.pop();
			}
			lines.push(RawLine {
				bytes,
				terminated: true,
			});
			rest = &rest[pos + 1..];
		}
		self.pending.extend_from_slice(rest);

		while self.pending.len() > self.max_line_bytes {
			let cut = split_point(&self.pending, self.max_line_bytes);
			let tail = self.pending.split_off(cut);
			let bytes = std::mem::replace(&mut self.pending, tail);
			lines.push(RawLine {
				bytes,
				terminated: false,
			});
		}

		lines
	}

	/// Flush whatever is left once the stream has closed.
	pub fn finish(&mut self) -> Option<RawLine> {
		let mut bytes = std::mem::take(&mut self.pending);
		if bytes.last() == Some(&b'\r') {
			bytes.pop();
		}
		if bytes.is_empty() {
			return None;
		}
		Some(RawLine {
			bytes,
			terminated: false,
		})
	}

	pub fn pending_len(&self) -> usize {
		self.pending.len()
	}
}

// Avoid cutting a UTF-8 sequence in half when the fragment is UTF-8 so far.
fn split_point(buf: &[u8], max: usize) -> usize {
	match std::str::from_utf8(&buf[..max]) {
		Err(e) if e.error_len().is_none() && e.valid_up_to() > 0 => e.valid_up_to(),
		_ => max,
	}
}

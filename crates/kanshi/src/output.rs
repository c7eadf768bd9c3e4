use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::types::{LogLine, StreamKind};

/// A line that has been framed and decoded but not yet numbered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedLine {
	pub text: String,
	pub terminated: bool,
	pub legacy_decoded: bool,
}

impl DecodedLine {
	pub fn new(text: impl Into<String>) -> Self {
		Self {
			text: text.into(),
			terminated: true,
			legacy_decoded: false,
		}
	}
}

/// Shared store of complete output lines with a single consumption cursor.
///
/// Readers append whole lines; the consumer takes everything appended since
/// its previous call. The lock is only held to copy lines in or out.
#[derive(Clone)]
pub struct OutputBuffer {
	inner: Arc<Mutex<Inner>>,
}

struct Inner {
	lines: VecDeque<LogLine>,
	next_seq: u64,
	cursor: u64,
	max_lines: usize,
	dropped: u64,
}

impl OutputBuffer {
	pub fn new(max_lines: usize) -> Self {
		let max_lines = max_lines.max(1);
		Self {
			inner: Arc::new(Mutex::new(Inner {
				lines: VecDeque::with_capacity(max_lines.min(1024)),
				next_seq: 0,
				cursor: 0,
				max_lines,
				dropped: 0,
			})),
		}
	}

	fn lock(&self) -> MutexGuard<'_, Inner> {
		// A panicking reader cannot leave the deque half-updated, so the data
		// behind a poisoned lock is still consistent.
		self.inner.lock().unwrap_or_else(|e| e.into_inner())
	}

	pub fn append(&self, stream: StreamKind, lines: Vec<DecodedLine>) {
		if lines.is_empty() {
			return;
		}
		let mut guard = self.lock();
		let inner = &mut *guard;
		for line in lines {
			let seq = inner.next_seq;
			inner.next_seq += 1;
			inner.lines.push_back(LogLine {
				seq,
				stream,
				text: line.text,
				terminated: line.terminated,
				legacy_decoded: line.legacy_decoded,
			});
		}
		while inner.lines.len() > inner.max_lines {
			if let Some(evicted) = inner.lines.pop_front() {
				if evicted.seq >= inner.cursor {
					inner.dropped += 1;
				}
			}
		}
	}

	/// Lines appended since the previous call.
	pub fn consume_lines(&self) -> Vec<LogLine> {
		let mut guard = self.lock();
		let inner = &mut *guard;
		let first_seq = inner.lines.front().map(|l| l.seq).unwrap_or(inner.next_seq);
		let start = inner.cursor.max(first_seq);
		let skip = (start - first_seq) as usize;
		let lines: Vec<LogLine> = inner.lines.iter().skip(skip).cloned().collect();
		inner.cursor = inner.next_seq;
		lines
	}

	/// Text appended since the previous call; terminated lines end in `\n`.
	pub fn consume_text(&self) -> String {
		render_text(&self.consume_lines())
	}

	/// Everything currently buffered, without moving the cursor.
	pub fn snapshot(&self) -> Vec<LogLine> {
		self.lock().lines.iter().cloned().collect()
	}

	pub fn clear(&self) {
		let mut inner = self.lock();
		inner.lines.clear();
		inner.next_seq = 0;
		inner.cursor = 0;
		inner.dropped = 0;
	}

	pub fn len(&self) -> usize {
		self.lock().lines.len()
	}

	pub fn is_empty(&self) -> bool {
		self.lock().lines.is_empty()
	}

	/// Lines evicted by the size limit before anyone consumed them.
	pub fn dropped(&self) -> u64 {
		self.lock().dropped
	}
}

pub fn render_text(lines: &[LogLine]) -> String {
	let mut out = String::with_capacity(lines.iter().map(|l| l.text.len() + 1).sum());
	for line in lines {
		out.push_str(&line.text);
		if line.terminated {
			out.push('\n');
		}
	}
	out
}

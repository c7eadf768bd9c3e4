use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ClassifierError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
	Progress,
	Success,
	Failure,
	Unclassified,
}

/// Maps one line of child output to a [`Classification`]. Any
/// `Fn(&str) -> Classification` closure is a classifier.
pub trait LineClassifier: Send + Sync {
	fn classify(&self, line: &str) -> Classification;
}

impl<F> LineClassifier for F
where
	F: Fn(&str) -> Classification + Send + Sync,
{
	fn classify(&self, line: &str) -> Classification {
		self(line)
	}
}

/// Regex lists for each outcome, as they appear in a settings file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PatternSet {
	#[serde(default)]
	pub progress: Vec<String>,
	#[serde(default)]
	pub success: Vec<String>,
	#[serde(default)]
	pub failure: Vec<String>,
}

/// Classifies by regex. Failure patterns are checked first, then success,
/// then progress.
#[derive(Debug, Clone, Default)]
pub struct PatternClassifier {
	progress: Vec<Regex>,
	success: Vec<Regex>,
	failure: Vec<Regex>,
}

impl PatternClassifier {
	pub fn new(patterns: &PatternSet) -> Result<Self, ClassifierError> {
		Ok(Self {
			progress: compile("progress", &patterns.progress)?,
			success: compile("success", &patterns.success)?,
			failure: compile("failure", &patterns.failure)?,
		})
	}

	pub fn is_empty(&self) -> bool {
		self.progress.is_empty() && self.success.is_empty() && self.failure.is_empty()
	}
}

fn compile(kind: &'static str, patterns: &[String]) -> Result<Vec<Regex>, ClassifierError> {
	patterns
		.iter()
		.map(|p| {
			Regex::new(p).map_err(|source| ClassifierError::InvalidPattern {
				kind,
				pattern: p.clone(),
				source,
			})
		})
		.collect()
}

impl LineClassifier for PatternClassifier {
	fn classify(&self, line: &str) -> Classification {
		if self.failure.iter().any(|re| re.is_match(line)) {
			Classification::Failure
		} else if self.success.iter().any(|re| re.is_match(line)) {
			Classification::Success
		} else if self.progress.iter().any(|re| re.is_match(line)) {
			Classification::Progress
		} else {
			Classification::Unclassified
		}
	}
}

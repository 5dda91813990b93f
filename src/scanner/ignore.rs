//! Gitignore-style include/exclude pattern evaluator.
//!
//! A group's `file_pattern` lines compile into an ordered pattern list.
//! Patterns are evaluated from last to first and the first match decides
//! whether a path is kept; a bare `*` anywhere in the set flips the whole
//! evaluator into default-ignore-all mode, inverting every decision.

use globset::{GlobBuilder, GlobMatcher};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IgnoreError {
	#[error("glob compile error: {0}")]
	Glob(#[from] globset::Error),
}

#[derive(Debug)]
struct Pattern {
	invert: bool,
	dir_only: bool,
	leading_slash: bool,
	glob_prefix: bool,
	glob_suffix: bool,
	depth: usize,
	matcher: GlobMatcher,
}

impl Pattern {
	fn matches(&self, path: &str, is_dir: bool) -> bool {
		if self.dir_only && !is_dir {
			return false;
		}

		let mut candidate = path.to_string();

		if self.leading_slash {
			candidate = format!("/{}", candidate.strip_prefix('/').unwrap_or(&candidate));
		}

		if is_dir {
			if self.glob_suffix {
				candidate.push('/');
			}

			if self.glob_prefix && !self.leading_slash {
				candidate = format!("/{candidate}");
			}
		}

		if self.depth == 0 {
			candidate = candidate
				.rsplit('/')
				.next()
				.unwrap_or(candidate.as_str())
				.to_string();
		} else if candidate.matches('/').count() < self.depth {
			return false;
		}

		self.matcher.is_match(&candidate)
	}
}

/// A compiled set of gitignore-style patterns scoped to one group.
#[derive(Debug, Default)]
pub struct IgnoreList {
	patterns: Vec<Pattern>,
	default_ignore_all: bool,
}

impl IgnoreList {
	pub fn new(lines: impl IntoIterator<Item = impl AsRef<str>>) -> Result<Self, IgnoreError> {
		let mut list = IgnoreList::default();

		for line in lines {
			let line = line.as_ref().trim_matches(' ');

			if line.is_empty() || line.starts_with('#') {
				continue;
			}

			if line == "*" {
				list.default_ignore_all = true;
			}

			let (invert, line) = match line.strip_prefix('!') {
				Some(rest) => (true, rest),
				None => (false, line),
			};

			// a trailing slash only constrains the match to directories,
			// the leading slash stays part of the compiled glob
			let (dir_only, line) = match line.strip_suffix('/') {
				Some(rest) => (true, rest),
				None => (false, line),
			};

			let matcher = GlobBuilder::new(line)
				.literal_separator(true)
				.backslash_escape(true)
				.build()?
				.compile_matcher();

			list.patterns.push(Pattern {
				invert,
				dir_only,
				leading_slash: line.starts_with('/'),
				glob_prefix: line.starts_with("**/"),
				glob_suffix: line.ends_with("/**"),
				depth: line.matches('/').count(),
				matcher,
			});
		}

		Ok(list)
	}

	pub fn from_pattern(pattern: &str) -> Result<Self, IgnoreError> {
		Self::new(pattern.lines())
	}

	/// Decide whether the entry at `path` should be kept in the catalogue.
	pub fn should_keep(&self, path: &str, is_dir: bool) -> bool {
		for pattern in self.patterns.iter().rev() {
			if pattern.matches(path, is_dir) {
				let mut keep = !pattern.invert;

				if self.default_ignore_all {
					keep = !keep;
				}

				return keep;
			}
		}

		false
	}
}

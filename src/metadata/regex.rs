//! Filename-regex capture loader.
//!
//! Configured patterns run against the full path; named captures become
//! metadata keys, with `__` in a capture name standing in for `.` so that
//! patterns can address nested keys.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;

use crate::metadata::value::{MetadataMap, Node, Scalar};
use crate::metadata::{Loader, LoaderError};

pub struct RegexLoader {
	patterns: Arc<Vec<Regex>>,
}

impl RegexLoader {
	pub fn new(patterns: Arc<Vec<Regex>>) -> RegexLoader {
		RegexLoader { patterns }
	}
}

#[async_trait]
impl Loader for RegexLoader {
	fn name(&self) -> &'static str {
		"regex"
	}

	fn for_path(&self, path: &Path) -> Option<Box<dyn Loader>> {
		let name = path.to_string_lossy();

		self.patterns
			.iter()
			.any(|pattern| pattern.is_match(&name))
			.then(|| Box::new(RegexLoader::new(self.patterns.clone())) as Box<dyn Loader>)
	}

	async fn load_metadata(&self, path: &Path) -> Result<MetadataMap, LoaderError> {
		let name = path.to_string_lossy();
		let mut map = MetadataMap::new();

		for pattern in self.patterns.iter() {
			let Some(captures) = pattern.captures(&name) else {
				continue;
			};

			for capture_name in pattern.capture_names().flatten() {
				if let Some(value) = captures.name(capture_name) {
					if !value.as_str().is_empty() {
						map.insert(
							capture_name.replace("__", "."),
							Node::Leaf(Scalar::autotype(value.as_str())),
						);
					}
				}
			}
		}

		Ok(map)
	}
}

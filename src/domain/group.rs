//! Group descriptors: the configured top-level roots of the catalogue.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CatalogError;
use crate::scanner::ignore::{IgnoreError, IgnoreList};
use crate::ROOT_GROUP_NAME;

/// One configured root. The descriptor is pure configuration; per-scan
/// counters live on the scanner that walks it.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Group {
	pub id: String,

	pub path: PathBuf,

	/// Immutable base used to derive entry relative paths; defaults to
	/// `path` and stays fixed while scans recurse into subdirectories.
	#[serde(skip)]
	pub root_path: PathBuf,

	pub parent: String,

	/// Gitignore-syntax lines deciding which paths stay in the catalogue.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub file_pattern: Option<String>,

	#[serde(rename = "no_recurse")]
	pub no_recurse_directories: bool,

	pub follow_symlinks: bool,

	pub deep_scan: bool,

	pub skip_checksum: bool,

	/// Non-directory files smaller than this many bytes are skipped.
	#[serde(rename = "min_file_size")]
	pub file_minimum_size: u64,
}

impl Group {
	pub fn new(id: impl Into<String>, path: impl Into<PathBuf>) -> Group {
		let mut group = Group {
			id: id.into(),
			path: path.into(),
			..Group::default()
		};

		group.populate();
		group
	}

	/// Fill in derivable defaults: id from the path basename, root path from
	/// the path, parent from the root marker.
	pub fn populate(&mut self) {
		if self.id.is_empty() {
			if let Some(base) = self.path.file_name() {
				self.id = base.to_string_lossy().to_string();
			}
		}

		if self.root_path.as_os_str().is_empty() {
			self.root_path = self.path.clone();
		}

		let trimmed = self
			.root_path
			.to_string_lossy()
			.trim_end_matches('/')
			.to_string();
		self.root_path = PathBuf::from(trimmed);

		if self.parent.is_empty() {
			self.parent = ROOT_GROUP_NAME.to_string();
		}
	}

	/// Validate and normalize the descriptor before a scan.
	pub fn initialize(&mut self) -> Result<(), CatalogError> {
		if self.path.as_os_str().is_empty() {
			return Err(CatalogError::MissingGroupPath);
		}

		self.path = crate::config::expand_user(&self.path);
		self.populate();

		Ok(())
	}

	/// Compile the group's ignore list, if one is configured.
	pub fn compile_ignore_list(&self) -> Result<Option<IgnoreList>, IgnoreError> {
		match &self.file_pattern {
			Some(pattern) if !pattern.is_empty() => Ok(Some(IgnoreList::from_pattern(pattern)?)),
			_ => Ok(None),
		}
	}

	/// The path relative to this group's immutable root, with the root
	/// prefix removed but no further normalization.
	pub fn relative_to_root<'a>(&self, absolute: &'a str) -> &'a str {
		let root = self.root_path.to_string_lossy();
		absolute.strip_prefix(root.as_ref()).unwrap_or(absolute)
	}

	/// A child descriptor for recursing into `subdirectory`; flags and the
	/// root path carry over, the parent becomes the directory's entry id.
	pub fn descend(&self, subdirectory: impl AsRef<Path>, parent_id: String) -> Group {
		Group {
			id: self.id.clone(),
			path: subdirectory.as_ref().to_path_buf(),
			root_path: self.root_path.clone(),
			parent: parent_id,
			file_pattern: self.file_pattern.clone(),
			no_recurse_directories: self.no_recurse_directories,
			follow_symlinks: self.follow_symlinks,
			deep_scan: self.deep_scan,
			skip_checksum: self.skip_checksum,
			file_minimum_size: self.file_minimum_size,
		}
	}
}

//! Catalogue configuration surface.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::BaseDirs;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::CatalogError;

pub const DEFAULT_BASE_DIRECTORY: &str = "~/.config/metacat";

pub const DEFAULT_GLOBAL_EXCLUSIONS: &[&str] = &[
	"._.DS_Store",
	"._.Trashes",
	".DS_Store",
	".Spotlight-V100",
	".Trashes",
	"desktop.ini",
	"lost+found",
	"Thumbs.db",
];

/// Expand a leading `~` to the user's home directory.
pub fn expand_user(path: impl AsRef<Path>) -> PathBuf {
	let path = path.as_ref();

	let Ok(rest) = path.strip_prefix("~") else {
		return path.to_path_buf();
	};

	match BaseDirs::new() {
		Some(dirs) => dirs.home_dir().join(rest),
		None => path.to_path_buf(),
	}
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
	/// Per-user state directory, tilde-expanded.
	pub base_dir: String,

	/// Record-store connection string; defaults to a sqlite database under
	/// `base_dir`.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub uri: Option<String>,

	/// Separate connection string for the metadata collection; defaults to
	/// `uri`.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub metadata_uri: Option<String>,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub indexer: Option<String>,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub metadata_indexer: Option<String>,

	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub additional_indexers: Vec<String>,

	/// Exact basenames that are never indexed.
	pub global_exclusions: Vec<String>,

	/// Regex patterns whose named captures become metadata keys; a double
	/// underscore in a capture name stands for a dot.
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub extract_fields: Vec<String>,

	pub skip_migrate: bool,

	pub automigrate: bool,

	/// Catalogue-level checksum bypass.
	pub skip_checksum: bool,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub stats_database: Option<String>,

	#[serde(skip_serializing_if = "BTreeMap::is_empty")]
	pub stats_tags: BTreeMap<String, String>,

	/// Cron expression for automatic shallow scans.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub scan_interval: Option<String>,

	/// Seconds after which an unchanged entry is rescanned anyway; zero
	/// disables staleness.
	pub max_time_between_deep_scans_secs: u64,
}

impl Default for CatalogConfig {
	fn default() -> CatalogConfig {
		CatalogConfig {
			base_dir: DEFAULT_BASE_DIRECTORY.to_string(),
			uri: None,
			metadata_uri: None,
			indexer: None,
			metadata_indexer: None,
			additional_indexers: Vec::new(),
			global_exclusions: DEFAULT_GLOBAL_EXCLUSIONS
				.iter()
				.map(ToString::to_string)
				.collect(),
			extract_fields: Vec::new(),
			skip_migrate: false,
			automigrate: true,
			skip_checksum: false,
			stats_database: None,
			stats_tags: BTreeMap::new(),
			scan_interval: None,
			max_time_between_deep_scans_secs: 0,
		}
	}
}

impl CatalogConfig {
	pub fn base_directory(&self) -> PathBuf {
		expand_user(&self.base_dir)
	}

	pub fn uri(&self) -> String {
		match &self.uri {
			Some(uri) => uri.clone(),
			None => format!("sqlite:///{}/info.db", self.base_directory().display()),
		}
	}

	pub fn metadata_uri(&self) -> String {
		match &self.metadata_uri {
			Some(uri) => uri.clone(),
			None => self.uri(),
		}
	}

	pub fn max_time_between_deep_scans(&self) -> Duration {
		Duration::from_secs(self.max_time_between_deep_scans_secs)
	}

	/// Compile the extract-field patterns.
	pub fn extract_patterns(&self) -> Result<Vec<Regex>, CatalogError> {
		self.extract_fields
			.iter()
			.map(|pattern| Regex::new(pattern).map_err(CatalogError::from))
			.collect()
	}
}

//! Metadata loaders, partitioned into ordered passes.
//!
//! Pass 1 extracts cheap stat/name-derived attributes, pass 2 reads sidecar
//! descriptors, pass 3 opens file contents (and is therefore also the pass
//! at which checksums are computed).

pub mod audio;
pub mod file;
pub mod media;
pub mod mime;
pub mod regex;
pub mod value;
pub mod ytdl;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::metadata::value::MetadataMap;

#[derive(Error, Debug)]
pub enum LoaderError {
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("descriptor parse error: {0}")]
	Xml(#[from] quick_xml::DeError),

	#[error("descriptor parse error: {0}")]
	Json(#[from] serde_json::Error),

	#[error("tag read error: {0}")]
	Audio(#[from] lofty::LoftyError),

	#[error("unrecognized descriptor content at {0}")]
	UnrecognizedDescriptor(String),
}

/// A metadata extractor. `for_path` returns an instance configured for the
/// given path (resolving sidecar locations and the like), or nothing when
/// the loader does not apply.
#[async_trait]
pub trait Loader: Send + Sync {
	fn name(&self) -> &'static str;

	fn for_path(&self, path: &Path) -> Option<Box<dyn Loader>>;

	/// Produce a metadata mapping for the path. Keys may use `.` separators;
	/// the caller diffuses them into a nested tree.
	async fn load_metadata(&self, path: &Path) -> Result<MetadataMap, LoaderError>;
}

/// Loaders that run together in one pass.
pub struct LoaderGroup {
	pub pass: i32,
	pub checksum: bool,
	pub loaders: Vec<Arc<dyn Loader>>,
}

/// The ordered set of loader groups a catalogue runs.
pub struct LoaderSet {
	groups: Vec<LoaderGroup>,
}

impl LoaderSet {
	pub fn new(groups: Vec<LoaderGroup>) -> LoaderSet {
		LoaderSet { groups }
	}

	/// The standard pipeline: stat/mime and filename-regex extraction first,
	/// sidecar descriptors second, audio tags (with checksums) last.
	pub fn standard(extract_patterns: Vec<::regex::Regex>) -> LoaderSet {
		let patterns = Arc::new(extract_patterns);

		LoaderSet::new(vec![
			LoaderGroup {
				pass: 1,
				checksum: false,
				loaders: vec![
					Arc::new(file::FileLoader),
					Arc::new(regex::RegexLoader::new(patterns)),
				],
			},
			LoaderGroup {
				pass: 2,
				checksum: false,
				loaders: vec![
					Arc::new(media::MediaLoader::default()),
					Arc::new(ytdl::YtdlLoader::default()),
				],
			},
			LoaderGroup {
				pass: 3,
				checksum: true,
				loaders: vec![Arc::new(audio::AudioLoader)],
			},
		])
	}

	/// Pass numbers in scan order.
	pub fn passes(&self) -> Vec<i32> {
		let mut passes = self
			.groups
			.iter()
			.map(|group| group.pass)
			.filter(|pass| *pass > 0)
			.collect::<Vec<_>>();

		passes.sort_unstable();
		passes
	}

	/// The pass at which checksums are generated, or -1 when no group is
	/// flagged for them.
	pub fn checksum_pass(&self) -> i32 {
		self.groups
			.iter()
			.find(|group| group.checksum)
			.map(|group| group.pass)
			.unwrap_or(-1)
	}

	/// Every applicable loader for the path in the given pass; a pass of
	/// zero or less selects all passes.
	pub fn for_path(&self, path: &Path, pass: i32) -> Vec<Box<dyn Loader>> {
		self.groups
			.iter()
			.filter(|group| pass <= 0 || group.pass == pass)
			.flat_map(|group| &group.loaders)
			.filter_map(|loader| loader.for_path(path))
			.collect()
	}
}

impl Default for LoaderSet {
	fn default() -> LoaderSet {
		LoaderSet::standard(Vec::new())
	}
}

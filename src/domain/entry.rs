//! Catalogue entry records and their content-derived identity.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use data_encoding::{Encoding, Specification, HEXLOWER};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tracing::warn;

use crate::metadata::value::{deep_get, diffuse, merge_non_empty, MetadataMap, Scalar};
use crate::metadata::{LoaderError, LoaderSet};
use crate::store::{filter::Filter, EntryStore, StoreError};

/// Base32 alphabet used to render entry ids.
static FILE_ID_ENCODING: Lazy<Encoding> = Lazy::new(|| {
	let mut spec = Specification::new();
	spec.symbols.push_str("abcdefghijklmnopqrstuvwxyz234567");
	spec.encoding().expect("static base32 specification is valid")
});

/// Upper bound on the children fetched for a single directory entry.
pub const MAX_CHILD_ENTRIES: usize = 10_000;

#[derive(Error, Debug)]
pub enum ChecksumError {
	#[error("cannot generate checksum on directory")]
	IsDirectory,

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
}

/// Coarse classification derived from a file's mimetype.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
	Directory,
	Audio,
	Video,
	Image,
	Code,
	#[default]
	File,
}

impl std::fmt::Display for EntryType {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let s = match self {
			EntryType::Directory => "directory",
			EntryType::Audio => "audio",
			EntryType::Video => "video",
			EntryType::Image => "image",
			EntryType::Code => "code",
			EntryType::File => "file",
		};
		write!(f, "{s}")
	}
}

/// One catalogue record per indexed filesystem object.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Entry {
	pub id: String,

	#[serde(rename = "name")]
	pub relative_path: String,

	#[serde(default, skip_serializing_if = "String::is_empty")]
	pub parent: String,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub checksum: Option<String>,

	#[serde(default)]
	pub size: u64,

	pub root_group: String,

	#[serde(rename = "group")]
	pub is_group: bool,

	#[serde(rename = "children", default)]
	pub child_count: u64,

	#[serde(rename = "descendants", default)]
	pub descendant_count: u64,

	#[serde(default)]
	pub last_modified_at: i64,

	#[serde(default)]
	pub last_deep_scanned_at: i64,

	#[serde(rename = "type", default)]
	pub entry_type: EntryType,

	#[serde(default)]
	pub metadata: MetadataMap,

	/// Absolute path observed at scan time; never persisted.
	#[serde(skip)]
	pub initial_path: PathBuf,

	#[serde(skip)]
	pub(crate) metadata_loaded: bool,
}

impl Entry {
	pub fn new(root_group: &str, root: impl AsRef<Path>, name: impl AsRef<Path>) -> Entry {
		let name = name.as_ref();
		let normalized = normalize_file_name(
			&root.as_ref().to_string_lossy(),
			&name.to_string_lossy(),
		);

		Entry {
			id: file_id_from_name(root_group, &normalized),
			relative_path: normalized,
			parent: String::new(),
			checksum: None,
			size: 0,
			root_group: root_group.to_string(),
			is_group: false,
			child_count: 0,
			descendant_count: 0,
			last_modified_at: 0,
			last_deep_scanned_at: 0,
			entry_type: EntryType::default(),
			metadata: MetadataMap::new(),
			initial_path: name.to_path_buf(),
			metadata_loaded: false,
		}
	}

	/// Fetch a metadata leaf by its dot-separated key.
	pub fn get(&self, key: &str) -> Option<&Scalar> {
		deep_get(&self.metadata, key)
	}

	/// The entry's path under the given group root.
	pub fn path_under(&self, root: impl AsRef<Path>) -> PathBuf {
		let relative = self.relative_path.trim_start_matches('/');
		root.as_ref().join(relative)
	}

	/// A store-queryable field of the record; `directory` is accepted as an
	/// alias for `group` in sorts and filters.
	pub fn field(&self, name: &str) -> Option<Scalar> {
		match name {
			"id" => Some(Scalar::from(self.id.clone())),
			"name" => Some(Scalar::from(self.relative_path.clone())),
			"parent" => Some(Scalar::from(self.parent.clone())),
			"root_group" => Some(Scalar::from(self.root_group.clone())),
			"group" | "directory" => Some(Scalar::Bool(self.is_group)),
			"checksum" => self.checksum.clone().map(Scalar::from),
			"type" => Some(Scalar::from(self.entry_type.to_string())),
			"size" => Some(Scalar::from(self.size)),
			"children" => Some(Scalar::from(self.child_count)),
			"descendants" => Some(Scalar::from(self.descendant_count)),
			"last_modified_at" => Some(Scalar::Int(self.last_modified_at)),
			"last_deep_scanned_at" => Some(Scalar::Int(self.last_deep_scanned_at)),
			_ => None,
		}
	}

	/// Run every applicable loader for `pass` and merge the non-empty leaves
	/// of their results into this entry's metadata. A pass of zero or less
	/// runs all loaders.
	pub async fn load_metadata(&mut self, loaders: &LoaderSet, pass: i32) -> Result<(), LoaderError> {
		tokio::fs::metadata(&self.initial_path).await?;

		for loader in loaders.for_path(&self.initial_path, pass) {
			match loader.load_metadata(&self.initial_path).await {
				Ok(data) => merge_non_empty(&mut self.metadata, &diffuse(data)),
				Err(err) => {
					warn!(
						loader = loader.name(),
						path = %self.initial_path.display(),
						"metadata loader failed: {err}"
					);
				}
			}
		}

		self.metadata_loaded = true;

		Ok(())
	}

	pub async fn load_all_metadata(&mut self, loaders: &LoaderSet) -> Result<(), LoaderError> {
		self.load_metadata(loaders, 0).await
	}

	/// Compute the hex SHA-1 of the file's contents. Unless forced, a
	/// sibling `<name>.sha1` file in `sha1sum` format is trusted when its
	/// digest line names this file.
	pub async fn generate_checksum(&self, force_recalculate: bool) -> Result<String, ChecksumError> {
		if self.is_group {
			return Err(ChecksumError::IsDirectory);
		}

		if !force_recalculate {
			if let Some(sum) = self.sidecar_checksum().await {
				return Ok(sum);
			}
		}

		let mut file = tokio::fs::File::open(&self.initial_path).await?;
		let mut hasher = Sha1::new();
		let mut buf = vec![0u8; 64 * 1024];

		loop {
			let n = file.read(&mut buf).await?;
			if n == 0 {
				break;
			}

			hasher.update(&buf[..n]);
		}

		Ok(HEXLOWER.encode(&hasher.finalize()))
	}

	async fn sidecar_checksum(&self) -> Option<String> {
		let mut sidecar = self.initial_path.as_os_str().to_owned();
		sidecar.push(".sha1");

		let contents = tokio::fs::read_to_string(Path::new(&sidecar)).await.ok()?;
		let own_name = self.initial_path.file_name()?;

		for line in contents.lines() {
			let parts = line.splitn(3, ' ').collect::<Vec<_>>();

			// looks for all the world like a sha1sum line
			if parts.len() == 3 && is_hex_digest(parts[0]) {
				if Path::new(parts[2]).file_name() == Some(own_name) {
					return Some(parts[0].to_string());
				}
			}
		}

		None
	}

	/// Direct children of this directory entry, directories first. Children
	/// must fall strictly under this entry's path.
	pub async fn children(
		&self,
		store: &dyn EntryStore,
		extra: Vec<(String, Scalar)>,
	) -> Result<Vec<Entry>, StoreError> {
		let mut filter = Filter::where_all([("parent".to_string(), Scalar::from(self.id.clone()))]);

		for (field, value) in extra {
			filter = filter.and(field, value);
		}

		let filter = filter
			.with_limit(MAX_CHILD_ENTRIES)
			.with_sort(["-directory", "name"]);

		let children = store.find(&filter).await?;

		for child in &children {
			if !child
				.relative_path
				.starts_with(&format!("{}/", self.relative_path))
			{
				return Err(StoreError::Corrupt(format!(
					"child entry {} falls outside of parent path {}",
					child.id, self.relative_path
				)));
			}
		}

		Ok(children)
	}

	/// Depth-first traversal of this entry and every descendant.
	pub fn walk<'a>(
		&'a self,
		store: &'a dyn EntryStore,
		extra: Vec<(String, Scalar)>,
		visit: &'a mut (dyn FnMut(&str, &Entry) + Send),
	) -> futures::future::BoxFuture<'a, Result<(), StoreError>> {
		Box::pin(async move {
			visit(&self.relative_path, self);

			if self.is_group {
				for child in self.children(store, extra.clone()).await? {
					child.walk(store, extra.clone(), &mut *visit).await?;
				}
			}

			Ok(())
		})
	}
}

/// Stable content identity: the 64-bit MurmurHash3 of
/// `"{root_group}:{name}"`, rendered as unpadded lowercase base32.
pub fn file_id_from_name(root_group: &str, name: &str) -> String {
	let uid = format!("{root_group}:{name}");

	let hash = murmur3::murmur3_x64_128(&mut Cursor::new(uid.as_bytes()), 0)
		.expect("hashing an in-memory buffer cannot fail");
	let word = (hash as u64 as i64).unsigned_abs();

	let bytes = word.to_be_bytes();
	let significant = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());

	FILE_ID_ENCODING.encode(&bytes[significant..])
}

/// Strip the group's root prefix and anchor the result at `/`. Applying
/// this twice is a no-op.
pub fn normalize_file_name(root: &str, name: &str) -> String {
	let prefix = root.strip_suffix('/').unwrap_or(root);
	let name = name.strip_prefix(prefix).unwrap_or(name);
	let name = name.strip_prefix('/').unwrap_or(name);

	format!("/{name}")
}

fn is_hex_digest(value: &str) -> bool {
	value.len() == 40 && value.chars().all(|c| c.is_ascii_hexdigit())
}

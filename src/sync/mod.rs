//! Manifests: externally supplied declarations of desired files, compared
//! against local state to decide what a sync consumer still needs.

use std::io::BufRead;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::entry::{ChecksumError, Entry};
use crate::metadata::value::Scalar;
use crate::metadata::{LoaderError, LoaderSet};
use crate::store::{EntryStore, StoreError};

pub const DEFAULT_MANIFEST_FIELDS: &[&str] = &["id", "relative_path", "type"];

const LABEL_FIELD: &str = "label";

#[derive(Error, Debug)]
pub enum ManifestError {
	#[error("not enough columns in header (expected >= {expected}, got {got})")]
	NotEnoughColumns { expected: usize, got: usize },

	#[error("missing required column {0:?}")]
	MissingColumn(&'static str),

	#[error("duplicated column {0:?}")]
	DuplicateColumn(String),

	#[error("column count does not match given schema (got {got} values for {expected} fields)")]
	ColumnCountMismatch { expected: usize, got: usize },

	#[error("unrecognized type {0:?}")]
	UnrecognizedType(String),

	#[error("manifest item {0} contains fewer fields than the given policy requires")]
	FewerFieldsThanPolicy(String),

	#[error(transparent)]
	Checksum(#[from] ChecksumError),

	#[error(transparent)]
	Loader(#[from] LoaderError),

	#[error(transparent)]
	Store(#[from] StoreError),

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestItemType {
	File,
	Directory,
}

/// Which fields a sync consumer compares, with relaxed type-coerced
/// equality.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SyncPolicy {
	pub id: String,
	pub fields: Vec<String>,
}

impl SyncPolicy {
	/// The built-in content-identity policy.
	pub fn checksum() -> SyncPolicy {
		SyncPolicy {
			id: String::new(),
			fields: vec!["checksum".to_string()],
		}
	}

	pub fn compare(&self, _field: &str, value: Option<&Scalar>, other: Option<&Scalar>) -> bool {
		Scalar::relaxed_eq(value, other)
	}
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ManifestItem {
	pub id: String,

	#[serde(rename = "type")]
	pub item_type: ManifestItemType,

	#[serde(default)]
	pub label: String,

	pub relative_path: String,

	/// Positionally aligned with the owning manifest's `fields`.
	#[serde(default)]
	pub values: Vec<Scalar>,
}

impl ManifestItem {
	/// Whether the local copy of this item is missing or differs from the
	/// manifest under the given policy.
	pub async fn needs_update(
		&self,
		manifest: &Manifest,
		policy: &SyncPolicy,
		loaders: &LoaderSet,
	) -> Result<bool, ManifestError> {
		let relative = self.relative_path.trim_start_matches('/');
		let abs_path = manifest.base_directory.join(relative);

		let stat = match tokio::fs::metadata(&abs_path).await {
			Ok(stat) => stat,
			Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
				debug!("need {} because a local copy does not exist", self.id);
				return Ok(true);
			}
			Err(err) => return Err(err.into()),
		};

		if stat.is_dir() {
			return Ok(false);
		}

		let mut local = Entry::new(&self.label, &manifest.base_directory, &abs_path);

		for (i, value) in self.values.iter().enumerate() {
			let Some(field) = manifest.fields.get(i) else {
				return Err(ManifestError::FewerFieldsThanPolicy(self.id.clone()));
			};

			if field == "checksum" {
				// always recomputed, bypassing any sidecar digest
				let sum = local.generate_checksum(true).await?;

				if value.render() != sum {
					debug!("need {} because field 'checksum' differs from local copy", self.id);
					return Ok(true);
				}

				continue;
			}

			if !local.metadata_loaded {
				local.load_all_metadata(loaders).await?;
			}

			if !policy.compare(field, local.get(field), Some(value)) {
				debug!("need {} because field {field:?} differs from local copy", self.id);
				return Ok(true);
			}
		}

		Ok(false)
	}
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Manifest {
	pub base_directory: PathBuf,
	pub fields: Vec<String>,
	pub items: Vec<ManifestItem>,
}

impl Manifest {
	pub fn new(base_directory: impl Into<PathBuf>, fields: Vec<String>) -> Manifest {
		Manifest {
			base_directory: base_directory.into(),
			fields,
			items: Vec::new(),
		}
	}

	pub fn add(&mut self, item: ManifestItem) {
		self.items.push(item);
	}

	/// Parse a tab-separated manifest. The header must carry the default
	/// columns (`id`, `relative_path`, `type`, optionally `label`) in any
	/// order; every remaining column is a metadata field. Items with an
	/// empty metadata value are skipped with a warning.
	pub fn load_tsv(&mut self, reader: impl BufRead) -> Result<(), ManifestError> {
		let mut header: Option<Vec<String>> = None;

		self.fields.clear();

		for line in reader.lines() {
			let line = line?;

			if line.is_empty() {
				continue;
			}

			let values = line.split('\t').collect::<Vec<_>>();

			let Some(columns) = &header else {
				if values.len() < DEFAULT_MANIFEST_FIELDS.len() {
					return Err(ManifestError::NotEnoughColumns {
						expected: DEFAULT_MANIFEST_FIELDS.len(),
						got: values.len(),
					});
				}

				for required in DEFAULT_MANIFEST_FIELDS {
					if !values.contains(required) {
						return Err(ManifestError::MissingColumn(required));
					}
				}

				for (i, column) in values.iter().enumerate() {
					if values[..i].contains(column) {
						return Err(ManifestError::DuplicateColumn((*column).to_string()));
					}
				}

				self.fields = values
					.iter()
					.filter(|column| {
						!DEFAULT_MANIFEST_FIELDS.contains(column) && **column != LABEL_FIELD
					})
					.map(ToString::to_string)
					.collect();

				header = Some(values.into_iter().map(ToString::to_string).collect());
				continue;
			};

			if values.len() != columns.len() {
				return Err(ManifestError::ColumnCountMismatch {
					expected: columns.len(),
					got: values.len(),
				});
			}

			let mut item = ManifestItem {
				id: String::new(),
				item_type: ManifestItemType::File,
				label: String::new(),
				relative_path: String::new(),
				values: Vec::new(),
			};

			let mut skip = false;

			for (column, value) in columns.iter().zip(values) {
				match column.as_str() {
					"id" => item.id = value.to_string(),
					"relative_path" => item.relative_path = value.to_string(),
					"label" => item.label = value.to_string(),
					"type" => {
						item.item_type = match value {
							"file" => ManifestItemType::File,
							"directory" => ManifestItemType::Directory,
							other => {
								return Err(ManifestError::UnrecognizedType(other.to_string()))
							}
						};
					}
					field => {
						if value.is_empty() {
							warn!("invalid manifest TSV: field {field:?} is empty");
							skip = true;
							break;
						}

						item.values.push(Scalar::autotype(value));
					}
				}
			}

			if !skip {
				self.add(item);
			}
		}

		Ok(())
	}

	/// The subset of items whose local copies are missing or stale.
	pub async fn get_update_manifest(
		&self,
		policy: &SyncPolicy,
		loaders: &LoaderSet,
	) -> Result<Manifest, ManifestError> {
		let mut diff = Manifest::new(self.base_directory.clone(), self.fields.clone());

		for item in &self.items {
			if item.needs_update(self, policy, loaders).await? {
				diff.add(item.clone());
			}
		}

		if diff.items.is_empty() {
			debug!("local directory {} is up-to-date", self.base_directory.display());
		} else {
			debug!("want {} items from remote sources", diff.items.len());
		}

		Ok(diff)
	}

	/// Build a manifest of every file under a directory entry, resolving
	/// each requested field from the catalogue.
	pub async fn from_entry(
		store: &dyn EntryStore,
		entry: &Entry,
		fields: &[String],
		extra: Vec<(String, Scalar)>,
	) -> Result<Manifest, ManifestError> {
		let mut manifest = Manifest::new(
			Path::new(&entry.relative_path),
			fields.to_vec(),
		);

		let mut items = Vec::new();

		entry
			.walk(store, extra, &mut |path, entry| {
				if entry.is_group {
					return;
				}

				let values = fields
					.iter()
					.map(|field| match field.as_str() {
						"name" => Scalar::from(entry.relative_path.clone()),
						"root_group" => Scalar::from(entry.root_group.clone()),
						"parent" => Scalar::from(entry.parent.clone()),
						"checksum" => {
							Scalar::from(entry.checksum.clone().unwrap_or_default())
						}
						other => entry
							.get(other)
							.cloned()
							.unwrap_or_else(|| Scalar::from(String::new())),
					})
					.collect();

				items.push(ManifestItem {
					id: entry.id.clone(),
					item_type: ManifestItemType::File,
					label: String::new(),
					relative_path: path.to_string(),
					values,
				});
			})
			.await?;

		manifest.items = items;

		Ok(manifest)
	}
}

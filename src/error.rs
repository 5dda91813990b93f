//! Top-level error type aggregating the per-subsystem errors.

use thiserror::Error;

use crate::{
	metadata::LoaderError, scanner::ignore::IgnoreError, scanner::ScanError, store::StoreError,
	sync::ManifestError,
};

#[derive(Error, Debug)]
pub enum CatalogError {
	#[error("scan already running")]
	ScanAlreadyRunning,

	#[error("preventing cleanup of empty directory set")]
	EmptyGroupSet,

	#[error("group path must be specified")]
	MissingGroupPath,

	#[error("invalid scan interval {0:?}: {1}")]
	InvalidScanInterval(String, String),

	#[error("invalid extract field pattern: {0}")]
	InvalidExtractField(#[from] regex::Error),

	#[error(transparent)]
	Ignore(#[from] IgnoreError),

	#[error(transparent)]
	Loader(#[from] LoaderError),

	#[error(transparent)]
	Manifest(#[from] ManifestError),

	#[error(transparent)]
	Scan(#[from] ScanError),

	#[error(transparent)]
	Store(#[from] StoreError),

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
}

//! The record-store contract the catalogue persists through.
//!
//! The backing implementation (an indexed document store, a SQL database, a
//! search engine) lives outside this crate; the catalogue only depends on
//! this trait. [`memory::MemoryStore`] is a complete reference
//! implementation used by the test suites and by embedders that do not need
//! durability.

pub mod filter;
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::entry::Entry;
use crate::metadata::value::Scalar;
use crate::store::filter::Filter;

#[derive(Error, Debug)]
pub enum StoreError {
	#[error("record validation failed: {0}")]
	Validation(String),

	#[error("catalogue corrupt: {0}")]
	Corrupt(String),

	#[error(transparent)]
	Filter(#[from] filter::FilterError),

	#[error("backend error: {0}")]
	Backend(String),
}

/// The catalogue collection schema: identity is a string, `name`, `parent`,
/// `root_group`, `group` and `last_modified_at` are required, counters must
/// be non-negative.
pub mod schema {
	use super::{Entry, StoreError};

	pub const COLLECTION: &str = "metadata";

	pub fn validate(entry: &Entry) -> Result<(), StoreError> {
		if entry.id.is_empty() {
			return Err(StoreError::Validation("identity must not be empty".into()));
		}

		for (field, value) in [
			("name", &entry.relative_path),
			("root_group", &entry.root_group),
		] {
			if value.is_empty() {
				return Err(StoreError::Validation(format!("field {field:?} is required")));
			}
		}

		if entry.parent.is_empty() {
			return Err(StoreError::Validation("field \"parent\" is required".into()));
		}

		Ok(())
	}
}

/// Async contract over the external record store.
#[async_trait]
pub trait EntryStore: Send + Sync {
	async fn find(&self, filter: &Filter) -> Result<Vec<Entry>, StoreError>;

	/// Stream matching entries through a callback; used where materializing
	/// the whole result set would be wasteful.
	async fn find_each(
		&self,
		filter: &Filter,
		each: &mut (dyn FnMut(Entry) + Send),
	) -> Result<(), StoreError>;

	async fn get(&self, id: &str) -> Result<Option<Entry>, StoreError>;

	async fn exists(&self, id: &str) -> bool;

	async fn create_or_update(&self, id: &str, entry: &Entry) -> Result<(), StoreError>;

	async fn delete(&self, ids: &[String]) -> Result<usize, StoreError>;

	/// Delete everything matching the filter in one backend operation.
	async fn delete_query(&self, filter: &Filter) -> Result<usize, StoreError>;

	/// Values of one field across every match, in find order.
	async fn list_with_filter(&self, field: &str, filter: &Filter)
		-> Result<Vec<Scalar>, StoreError>;

	async fn count(&self, filter: &Filter) -> Result<u64, StoreError>;

	async fn sum(&self, field: &str, filter: &Filter) -> Result<i64, StoreError>;

	async fn maximum(&self, field: &str, filter: &Filter) -> Result<Option<i64>, StoreError>;

	/// Hint for search-capable backends: buffer this many records between
	/// index flushes.
	fn set_flush_threshold(&self, records: usize);

	fn flush_threshold(&self) -> usize;

	async fn flush(&self) -> Result<(), StoreError>;
}

//! In-memory reference implementation of the record-store contract.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::domain::entry::Entry;
use crate::metadata::value::Scalar;
use crate::store::filter::Filter;
use crate::store::{schema, EntryStore, StoreError};

const DEFAULT_FLUSH_THRESHOLD: usize = 100;

#[derive(Default)]
pub struct MemoryStore {
	records: RwLock<BTreeMap<String, Entry>>,
	writes: AtomicU64,
	flush_threshold: AtomicUsize,
}

impl MemoryStore {
	pub fn new() -> MemoryStore {
		MemoryStore {
			records: RwLock::new(BTreeMap::new()),
			writes: AtomicU64::new(0),
			flush_threshold: AtomicUsize::new(DEFAULT_FLUSH_THRESHOLD),
		}
	}

	/// Number of create-or-update calls since construction; scan tests use
	/// this to observe the incremental skip predicate.
	pub fn write_count(&self) -> u64 {
		self.writes.load(Ordering::Relaxed)
	}

	pub fn len(&self) -> usize {
		self.records.read().expect("store lock poisoned").len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	fn matching(&self, filter: &Filter) -> Vec<Entry> {
		let records = self.records.read().expect("store lock poisoned");
		let mut matches = records
			.values()
			.filter(|entry| filter.matches(entry))
			.cloned()
			.collect::<Vec<_>>();

		if !filter.sort.is_empty() {
			matches.sort_by(|a, b| {
				for key in &filter.sort {
					let (descending, field) = match key.strip_prefix('-') {
						Some(field) => (true, field),
						None => (false, key.as_str()),
					};

					let ord = match (a.field(field), b.field(field)) {
						(Some(x), Some(y)) => x.compare(&y),
						(Some(_), None) => std::cmp::Ordering::Greater,
						(None, Some(_)) => std::cmp::Ordering::Less,
						(None, None) => std::cmp::Ordering::Equal,
					};

					let ord = if descending { ord.reverse() } else { ord };

					if ord != std::cmp::Ordering::Equal {
						return ord;
					}
				}

				std::cmp::Ordering::Equal
			});
		}

		if let Some(limit) = filter.limit {
			matches.truncate(limit);
		}

		matches
	}
}

#[async_trait]
impl EntryStore for MemoryStore {
	async fn find(&self, filter: &Filter) -> Result<Vec<Entry>, StoreError> {
		Ok(self.matching(filter))
	}

	async fn find_each(
		&self,
		filter: &Filter,
		each: &mut (dyn FnMut(Entry) + Send),
	) -> Result<(), StoreError> {
		for entry in self.matching(filter) {
			each(entry);
		}

		Ok(())
	}

	async fn get(&self, id: &str) -> Result<Option<Entry>, StoreError> {
		Ok(self
			.records
			.read()
			.expect("store lock poisoned")
			.get(id)
			.cloned())
	}

	async fn exists(&self, id: &str) -> bool {
		self.records
			.read()
			.expect("store lock poisoned")
			.contains_key(id)
	}

	async fn create_or_update(&self, id: &str, entry: &Entry) -> Result<(), StoreError> {
		schema::validate(entry)?;

		self.writes.fetch_add(1, Ordering::Relaxed);
		self.records
			.write()
			.expect("store lock poisoned")
			.insert(id.to_string(), entry.clone());

		Ok(())
	}

	async fn delete(&self, ids: &[String]) -> Result<usize, StoreError> {
		let mut records = self.records.write().expect("store lock poisoned");

		Ok(ids
			.iter()
			.filter(|id| records.remove(id.as_str()).is_some())
			.count())
	}

	async fn delete_query(&self, filter: &Filter) -> Result<usize, StoreError> {
		let mut records = self.records.write().expect("store lock poisoned");
		let before = records.len();
		records.retain(|_, entry| !filter.matches(entry));

		Ok(before - records.len())
	}

	async fn list_with_filter(
		&self,
		field: &str,
		filter: &Filter,
	) -> Result<Vec<Scalar>, StoreError> {
		Ok(self
			.matching(filter)
			.iter()
			.filter_map(|entry| entry.field(field))
			.collect())
	}

	async fn count(&self, filter: &Filter) -> Result<u64, StoreError> {
		Ok(self.matching(filter).len() as u64)
	}

	async fn sum(&self, field: &str, filter: &Filter) -> Result<i64, StoreError> {
		Ok(self
			.matching(filter)
			.iter()
			.filter_map(|entry| match entry.field(field) {
				Some(Scalar::Int(i)) => Some(i),
				Some(Scalar::Float(f)) => Some(f as i64),
				_ => None,
			})
			.sum())
	}

	async fn maximum(&self, field: &str, filter: &Filter) -> Result<Option<i64>, StoreError> {
		Ok(self
			.matching(filter)
			.iter()
			.filter_map(|entry| match entry.field(field) {
				Some(Scalar::Int(i)) => Some(i),
				Some(Scalar::Float(f)) => Some(f as i64),
				_ => None,
			})
			.max())
	}

	fn set_flush_threshold(&self, records: usize) {
		self.flush_threshold.store(records, Ordering::Relaxed);
	}

	fn flush_threshold(&self) -> usize {
		self.flush_threshold.load(Ordering::Relaxed)
	}

	async fn flush(&self) -> Result<(), StoreError> {
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn entry(path: &str, parent: &str, group: bool, size: u64, modified: i64) -> Entry {
		let mut entry = Entry::new("music", "/srv/music", format!("/srv/music{path}"));
		entry.parent = parent.to_string();
		entry.is_group = group;
		entry.size = size;
		entry.last_modified_at = modified;
		entry
	}

	async fn seeded() -> MemoryStore {
		let store = MemoryStore::new();

		for e in [
			entry("/albums", "root", true, 0, 50),
			entry("/albums/one.mp3", "p1", false, 100, 10),
			entry("/albums/two.mp3", "p1", false, 300, 90),
			entry("/loose.mp3", "root", false, 50, 20),
		] {
			store.create_or_update(&e.id.clone(), &e).await.expect("seed");
		}

		store
	}

	#[tokio::test]
	async fn find_filters_and_sorts() {
		let store = seeded().await;

		let found = store
			.find(
				&Filter::where_all([("parent".to_string(), Scalar::from("p1"))])
					.with_sort(["-size"]),
			)
			.await
			.expect("find");

		assert_eq!(found.len(), 2);
		assert_eq!(found[0].relative_path, "/albums/two.mp3");
	}

	#[tokio::test]
	async fn aggregates() {
		let store = seeded().await;
		let files = Filter::where_all([("group".to_string(), Scalar::Bool(false))]);

		assert_eq!(store.count(&files).await.expect("count"), 3);
		assert_eq!(store.sum("size", &files).await.expect("sum"), 450);
		assert_eq!(
			store
				.maximum("last_modified_at", &Filter::all())
				.await
				.expect("maximum"),
			Some(90)
		);
	}

	#[tokio::test]
	async fn delete_query_removes_matches() {
		let store = seeded().await;

		let removed = store
			.delete_query(&Filter::where_all([("parent".to_string(), Scalar::from("p1"))]))
			.await
			.expect("delete");

		assert_eq!(removed, 2);
		assert_eq!(store.len(), 2);
	}

	#[tokio::test]
	async fn rejects_records_missing_required_fields() {
		let store = MemoryStore::new();
		let mut bad = entry("/x", "root", false, 0, 0);
		bad.root_group = String::new();

		assert!(matches!(
			store.create_or_update(&bad.id.clone(), &bad).await,
			Err(StoreError::Validation(_))
		));
	}

	#[tokio::test]
	async fn tracks_writes() {
		let store = seeded().await;
		assert_eq!(store.write_count(), 4);
	}
}

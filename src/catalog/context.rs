//! Lifecycle-scoped state shared by every scanner in a catalogue.
//!
//! These maps would otherwise be process-wide globals; keeping them on a
//! context handle threaded through scan operations keeps their lifetime
//! tied to the catalogue that owns them.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::sync::RwLock;
use std::time::Duration;

use dashmap::{DashMap, DashSet};

use crate::domain::entry::Entry;
use crate::metadata::LoaderSet;
use crate::stats::StatsSink;
use crate::store::EntryStore;

pub struct ScanContext {
	pub store: Arc<dyn EntryStore>,
	pub stats: Arc<dyn StatsSink>,
	pub loaders: Arc<LoaderSet>,

	/// Exact basenames that are never indexed.
	pub global_exclusions: RwLock<Vec<String>>,

	/// Catalogue-level checksum bypass; a group can also opt out on its own.
	pub skip_checksum: bool,

	/// Age after which an entry's metadata is considered stale and eligible
	/// for re-reading despite an unchanged mtime; zero means never.
	pub max_time_between_deep_scans: Duration,

	/// Ids touched by the current scan; consulted by the incremental skip
	/// predicate on later passes and reset at each group boundary.
	pub changed_entries: DashSet<String>,

	/// Memoized parent-entry lookups, keyed by `"{group_id}__{parent_name}"`
	/// and reset at the start of each catalogue-level scan.
	pub parent_path_cache: DashMap<String, String>,

	/// Group id to real filesystem path, for resolving an entry's absolute
	/// location outside any particular scan.
	pub root_group_to_path: DashMap<String, PathBuf>,

	pub(crate) scan_in_progress: AtomicBool,
}

impl ScanContext {
	pub fn new(
		store: Arc<dyn EntryStore>,
		stats: Arc<dyn StatsSink>,
		loaders: Arc<LoaderSet>,
	) -> ScanContext {
		ScanContext {
			store,
			stats,
			loaders,
			global_exclusions: RwLock::new(Vec::new()),
			skip_checksum: false,
			max_time_between_deep_scans: Duration::ZERO,
			changed_entries: DashSet::new(),
			parent_path_cache: DashMap::new(),
			root_group_to_path: DashMap::new(),
			scan_in_progress: AtomicBool::new(false),
		}
	}

	pub fn is_excluded(&self, basename: &str) -> bool {
		self.global_exclusions
			.read()
			.expect("exclusions lock poisoned")
			.iter()
			.any(|name| name == basename)
	}

	/// Resolve an entry's absolute path through the root-group map.
	pub fn absolute_path(&self, entry: &Entry) -> Option<PathBuf> {
		self.root_group_to_path
			.get(&entry.root_group)
			.map(|root| entry.path_under(root.value()))
	}
}

//! The catalogue controller: orchestrates multi-pass scans across every
//! configured group, global orphan cleanup, change polling and scheduled
//! rescans.

pub mod context;

use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::catalog::context::ScanContext;
use crate::config::CatalogConfig;
use crate::domain::entry::Entry;
use crate::domain::group::Group;
use crate::domain::now_nanos;
use crate::error::CatalogError;
use crate::metadata::value::Scalar;
use crate::metadata::LoaderSet;
use crate::scanner::GroupScanner;
use crate::stats::StatsSink;
use crate::store::filter::Filter;
use crate::store::EntryStore;
use crate::ROOT_GROUP_NAME;

/// Orphan-cleanup passes before giving up on convergence.
pub const CLEANUP_ITERATIONS: usize = 256;

/// Search-index flush threshold while a scan is writing heavily.
pub const SCAN_FLUSH_EVERY_N_RECORDS: usize = 1000;

const CLEANUP_DELETE_BATCH: usize = 1000;
const POLL_INTERVAL: Duration = Duration::from_secs(10);

pub type PostScanFn = Box<dyn Fn() + Send + Sync>;

/// Source of the configured groups.
#[async_trait]
pub trait GroupLister: Send + Sync {
	async fn list(&self) -> Result<Vec<Group>, CatalogError>;
}

/// A fixed set of groups, the common embedding case.
pub struct StaticGroups(pub Vec<Group>);

#[async_trait]
impl GroupLister for StaticGroups {
	async fn list(&self) -> Result<Vec<Group>, CatalogError> {
		Ok(self.0.clone())
	}
}

pub struct Catalog {
	config: CatalogConfig,
	ctx: Arc<ScanContext>,
	lister: Arc<dyn GroupLister>,
	post_scan_callbacks: Mutex<Vec<PostScanFn>>,
	started_at_nanos: i64,
}

impl Catalog {
	pub fn new(
		config: CatalogConfig,
		store: Arc<dyn EntryStore>,
		stats: Arc<dyn StatsSink>,
		lister: Arc<dyn GroupLister>,
	) -> Result<Catalog, CatalogError> {
		let loaders = Arc::new(LoaderSet::standard(config.extract_patterns()?));

		let stats: Arc<dyn StatsSink> = if config.stats_tags.is_empty() {
			stats
		} else {
			Arc::new(crate::stats::TaggedStats::new(
				stats,
				config
					.stats_tags
					.iter()
					.map(|(k, v)| (k.clone(), v.clone()))
					.collect(),
			))
		};

		let mut ctx = ScanContext::new(store, stats, loaders);
		ctx.skip_checksum = config.skip_checksum;
		ctx.max_time_between_deep_scans = config.max_time_between_deep_scans();
		*ctx.global_exclusions.get_mut().expect("exclusions lock poisoned") =
			config.global_exclusions.clone();

		Ok(Catalog {
			config,
			ctx: Arc::new(ctx),
			lister,
			post_scan_callbacks: Mutex::new(Vec::new()),
			started_at_nanos: now_nanos(),
		})
	}

	/// Populate the group-to-path map so absolute paths resolve before the
	/// first scan.
	pub async fn initialize(&self) -> Result<(), CatalogError> {
		self.refresh_root_group_paths().await
	}

	pub fn context(&self) -> Arc<ScanContext> {
		self.ctx.clone()
	}

	pub fn config(&self) -> &CatalogConfig {
		&self.config
	}

	pub fn add_global_exclusions(&self, names: impl IntoIterator<Item = String>) {
		self.ctx
			.global_exclusions
			.write()
			.expect("exclusions lock poisoned")
			.extend(names);
	}

	pub fn register_post_scan_event(&self, callback: PostScanFn) {
		self.post_scan_callbacks
			.lock()
			.expect("callbacks lock poisoned")
			.push(callback);
	}

	pub fn scan_in_progress(&self) -> bool {
		self.ctx.scan_in_progress.load(Ordering::SeqCst)
	}

	async fn refresh_root_group_paths(&self) -> Result<(), CatalogError> {
		for group in self.lister.list().await? {
			self.ctx.root_group_to_path.insert(group.id.clone(), group.path.clone());
		}

		Ok(())
	}

	/// The groups whose containment rules accept the given path.
	pub async fn get_directories_by_file(&self, path: impl AsRef<std::path::Path>) -> Vec<Group> {
		let mut found = Vec::new();

		let Ok(groups) = self.lister.list().await else {
			return found;
		};

		for group in groups {
			let Ok(scanner) = GroupScanner::new(self.ctx.clone(), group) else {
				continue;
			};

			if scanner.contains_path(path.as_ref()).await {
				found.push(scanner.group);
			}
		}

		found
	}

	/// Run a full multi-pass scan across every configured group. Only one
	/// scan runs at a time; a second attempt fails immediately.
	pub async fn scan(&self, deep: bool, labels: &[String]) -> Result<(), CatalogError> {
		if self
			.ctx
			.scan_in_progress
			.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
			.is_err()
		{
			warn!("another scan is already running");
			return Err(CatalogError::ScanAlreadyRunning);
		}

		let started = Instant::now();
		info!("scan started");

		let old_flush_threshold = self.ctx.store.flush_threshold();
		self.ctx.store.set_flush_threshold(SCAN_FLUSH_EVERY_N_RECORDS);
		self.ctx.parent_path_cache.clear();

		let result = self.scan_groups(deep, labels).await;

		// the deferred epilogue: cleanup, callbacks, flush threshold
		// restore and the final flush always run, error or not
		if let Err(err) = self.cleanup_inner(true, !deep).await {
			warn!("post-scan cleanup failed: {err}");
		}

		for callback in self
			.post_scan_callbacks
			.lock()
			.expect("callbacks lock poisoned")
			.iter()
		{
			callback();
		}

		self.ctx.store.set_flush_threshold(old_flush_threshold);

		if let Err(err) = self.ctx.store.flush().await {
			warn!("final backend flush failed: {err}");
		}

		self.ctx.scan_in_progress.store(false, Ordering::SeqCst);
		info!("scan completed in {:?}", started.elapsed());

		result
	}

	async fn scan_groups(&self, deep: bool, labels: &[String]) -> Result<(), CatalogError> {
		let passes = self.ctx.loaders.passes();
		let mut groups = self.lister.list().await?;

		// most recently active groups first
		let mut latest = HashMap::new();

		for group in &groups {
			let filter = Filter::where_all([(
				"root_group".to_string(),
				Scalar::from(group.id.clone()),
			)]);

			let modified = self
				.ctx
				.store
				.maximum("last_modified_at", &filter)
				.await
				.unwrap_or(None)
				.unwrap_or(0);

			latest.insert(group.id.clone(), modified);
		}

		groups.sort_by_key(|group| std::cmp::Reverse(latest.get(&group.id).copied().unwrap_or(0)));

		if labels.is_empty() {
			debug!("scanning all groups in {} passes", passes.len());
		} else {
			debug!("scanning groups {labels:?} in {} passes", passes.len());
		}

		let single_group = groups.len() == 1;
		let mut group_passes: HashMap<String, u32> = HashMap::new();

		for group in groups {
			self.ctx.changed_entries.clear();

			for pass in &passes {
				let mut subgroups = Vec::new();

				if !labels.is_empty() {
					let mut matched = false;

					for label in labels {
						let (label, label_subgroups) = match label.split_once(':') {
							Some((label, rest)) => (label, Some(rest)),
							None => (label.as_str(), None),
						};

						if group.id == underscore(label) {
							matched = true;

							if let Some(rest) = label_subgroups {
								subgroups = rest.split(',').map(ToString::to_string).collect();
							}

							break;
						}
					}

					if !matched {
						continue;
					}
				}

				self.ctx
					.root_group_to_path
					.insert(group.id.clone(), group.path.clone());

				let mut group = group.clone();
				group.deep_scan = deep;

				if let Err(err) = group.initialize() {
					if single_group {
						return Err(err);
					}

					error!(pass, group = %group.id, "error scanning group: {err}");
					continue;
				}

				let mut scanner = match GroupScanner::new(self.ctx.clone(), group) {
					Ok(scanner) => scanner,
					Err(err) => {
						if single_group {
							return Err(err.into());
						}

						error!(pass, "error scanning group: {err}");
						continue;
					}
				};

				scanner.current_pass = *pass;
				scanner.passes_done = group_passes
					.get(&scanner.group.id)
					.copied()
					.unwrap_or_default();

				info!(pass, "scanning path {}", scanner.group.path.display());

				match scanner.scan(subgroups).await {
					Ok(()) => {
						if let Err(err) = self.refresh_stats(&scanner.group).await {
							warn!(group = %scanner.group.id, "failed to refresh stats: {err}");
						}
					}
					Err(err) => {
						if single_group {
							return Err(err.into());
						}

						error!(pass, group = %scanner.group.id, "error scanning group: {err}");
					}
				}

				debug!(
					pass,
					group = %scanner.group.id,
					"group encountered {} modified files",
					scanner.modified_file_count
				);

				let group_id = scanner.group.id.clone();
				let passes_done = scanner.passes_done;

				if let Err(err) = self.ctx.store.flush().await {
					warn!(pass, "backend flush failed: {err}");
				}

				group_passes.insert(group_id.clone(), passes_done + 1);

				if !deep && scanner.modified_file_count == 0 {
					debug!(
						pass,
						group = %group_id,
						"group will not be scanned in remaining passes"
					);
					break;
				}
			}
		}

		Ok(())
	}

	async fn refresh_stats(&self, group: &Group) -> Result<(), CatalogError> {
		let tags: &[(&str, &str)] = &[("root_group", group.id.as_str())];

		let files = Filter::where_all([
			("root_group".to_string(), Scalar::from(group.id.clone())),
			("group".to_string(), Scalar::Bool(false)),
		]);
		let directories = Filter::where_all([
			("root_group".to_string(), Scalar::from(group.id.clone())),
			("group".to_string(), Scalar::Bool(true)),
		]);

		let total_bytes = self.ctx.store.sum("size", &files).await?;
		self.ctx
			.stats
			.gauge("metabase.db.total_bytes", total_bytes as f64, tags);

		let file_count = self.ctx.store.count(&files).await?;
		self.ctx
			.stats
			.gauge("metabase.db.file_count", file_count as f64, tags);

		let directory_count = self.ctx.store.count(&directories).await?;
		self.ctx
			.stats
			.gauge("metabase.db.directory_count", directory_count as f64, tags);

		Ok(())
	}

	/// Remove records whose backing file vanished or whose parent entry is
	/// gone, until the catalogue stops shrinking.
	pub async fn cleanup(
		&self,
		skip_file_stats: bool,
		skip_root_group_prune: bool,
	) -> Result<(), CatalogError> {
		let owns_guard = self
			.ctx
			.scan_in_progress
			.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
			.is_ok();

		let result = self.cleanup_inner(skip_file_stats, skip_root_group_prune).await;

		if owns_guard {
			self.ctx.scan_in_progress.store(false, Ordering::SeqCst);
		}

		result
	}

	async fn cleanup_inner(
		&self,
		skip_file_stats: bool,
		skip_root_group_prune: bool,
	) -> Result<(), CatalogError> {
		let groups = self.lister.list().await?;

		if groups.is_empty() {
			return Err(CatalogError::EmptyGroupSet);
		}

		let mut ids = Vec::new();

		for group in &groups {
			ids.push(group.id.clone());
			self.ctx
				.root_group_to_path
				.insert(group.id.clone(), group.path.clone());
		}

		debug!("cleaning up...");

		if !skip_root_group_prune {
			// entries whose root group is no longer configured
			let stale_roots = Filter::all().and_not(
				"root_group",
				ids.iter().cloned().map(Scalar::from).collect(),
			);

			match self.ctx.store.delete_query(&stale_roots).await {
				Ok(removed) if removed > 0 => {
					debug!("cleanup: removed {removed} entries of deleted root groups");
				}
				Ok(_) => {}
				Err(err) => warn!("remove missing root groups failed: {err}"),
			}
		}

		let projection = Filter::all().with_fields(["id", "name", "root_group", "parent"]);
		let mut total_removed = 0usize;

		for iteration in 0..CLEANUP_ITERATIONS {
			let mut candidates = Vec::new();

			self.ctx
				.store
				.find_each(&projection, &mut |entry| candidates.push(entry))
				.await?;

			let present: HashSet<String> =
				candidates.iter().map(|entry| entry.id.clone()).collect();

			let mut doomed: Vec<String> = Vec::new();
			let mut removed_this_pass = 0usize;

			for entry in &candidates {
				if doomed.len() >= CLEANUP_DELETE_BATCH {
					removed_this_pass += self.delete_batch(&mut doomed).await;
				}

				if !skip_file_stats {
					if let Some(abs_path) = self.ctx.absolute_path(entry) {
						if let Err(err) = tokio::fs::metadata(&abs_path).await {
							if err.kind() == std::io::ErrorKind::NotFound {
								self.report_entry_deletion(entry);
								doomed.push(entry.id.clone());
								continue;
							}
						}
					}
				}

				if entry.parent != ROOT_GROUP_NAME && !present.contains(&entry.parent) {
					self.report_entry_deletion(entry);
					doomed.push(entry.id.clone());
				}
			}

			removed_this_pass += self.delete_batch(&mut doomed).await;
			total_removed += removed_this_pass;

			if removed_this_pass == 0 {
				break;
			}

			debug!("cleanup pass {iteration}: removed {removed_this_pass} entries");
		}

		if total_removed == 0 {
			debug!("cleaned up 0 entries");
		} else {
			info!("cleaned up {total_removed} entries");
		}

		Ok(())
	}

	async fn delete_batch(&self, doomed: &mut Vec<String>) -> usize {
		if doomed.is_empty() {
			return 0;
		}

		let batch = std::mem::take(doomed);

		match self.ctx.store.delete(&batch).await {
			Ok(removed) => {
				debug!("removed {removed} entries");
				removed
			}
			Err(err) => {
				warn!("error cleaning up database: {err}");
				0
			}
		}
	}

	fn report_entry_deletion(&self, entry: &Entry) {
		let tags: &[(&str, &str)] = &[("root_group", entry.root_group.as_str())];

		self.ctx
			.stats
			.gauge("metabase.db.entry.bytes_removed", entry.size as f64, tags);
		self.ctx.stats.increment("metabase.db.entry.num_removed", tags);
	}

	/// One polling sweep: rescan any file modified since the newer of
	/// process start and the group's latest known modification.
	pub async fn poll_once(&self) -> Result<(), CatalogError> {
		for group in self.lister.list().await? {
			let filter = Filter::where_all([(
				"root_group".to_string(),
				Scalar::from(group.id.clone()),
			)]);

			let last_modified = self
				.ctx
				.store
				.maximum("last_modified_at", &filter)
				.await
				.unwrap_or(None)
				.unwrap_or(0);

			let last_checked_at = self.started_at_nanos.max(last_modified);

			let mut scanner = match GroupScanner::new(self.ctx.clone(), group) {
				Ok(scanner) => scanner,
				Err(err) => {
					warn!("failed to prepare polling scanner: {err}");
					continue;
				}
			};

			let mut modified = Vec::new();
			let root = scanner.group.path.clone();

			if let Err(err) = scanner
				.collect_modified_since(root, last_checked_at, &mut modified)
				.await
			{
				warn!(group = %scanner.group.id, "failed to traverse: {err}");
				continue;
			}

			for abs_path in modified {
				let entry = Entry::new(
					&scanner.group.id,
					&scanner.group.path,
					&abs_path,
				);

				if self.ctx.store.exists(&entry.id).await {
					info!(group = %scanner.group.id, "changed: {}", abs_path.display());
				} else {
					info!(group = %scanner.group.id, "created: {}", abs_path.display());
				}

				if let Err(err) = scanner.scan_path(abs_path.clone()).await {
					warn!(
						group = %scanner.group.id,
						"error scanning {}: {err}",
						abs_path.display()
					);
				}
			}
		}

		Ok(())
	}

	/// Background polling loop; sweeps every ten seconds while no scan is
	/// running.
	pub fn spawn_polling(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
		let catalog = self.clone();

		tokio::spawn(async move {
			loop {
				if !catalog.scan_in_progress() {
					if let Err(err) = catalog.poll_once().await {
						warn!("directory poll failed: {err}");
					}
				}

				tokio::time::sleep(POLL_INTERVAL).await;
			}
		})
	}

	/// Scheduled shallow scans driven by the configured cron expression.
	pub fn spawn_scheduler(
		self: &Arc<Self>,
	) -> Result<Option<tokio::task::JoinHandle<()>>, CatalogError> {
		let Some(expression) = &self.config.scan_interval else {
			return Ok(None);
		};

		let schedule = cron::Schedule::from_str(expression).map_err(|err| {
			CatalogError::InvalidScanInterval(expression.clone(), err.to_string())
		})?;

		let catalog = self.clone();

		Ok(Some(tokio::spawn(async move {
			loop {
				let Some(next) = schedule.upcoming(chrono::Utc).next() else {
					return;
				};

				let wait = (next - chrono::Utc::now())
					.to_std()
					.unwrap_or(Duration::ZERO);
				tokio::time::sleep(wait).await;

				match catalog.scan(false, &[]).await {
					Ok(()) => debug!("automatic scan completed"),
					Err(CatalogError::ScanAlreadyRunning) => {
						debug!("automatic scan skipped: scan already running");
					}
					Err(err) => warn!("automatic scan error: {err}"),
				}
			}
		})))
	}
}

/// Lowercase a label the way group ids are derived: word boundaries become
/// underscores.
pub fn underscore(label: &str) -> String {
	let mut out = String::with_capacity(label.len());
	let mut previous_lower = false;

	for c in label.chars() {
		if c.is_alphanumeric() {
			if c.is_uppercase() && previous_lower {
				out.push('_');
			}

			previous_lower = c.is_lowercase() || c.is_numeric();
			out.extend(c.to_lowercase());
		} else if !out.ends_with('_') && !out.is_empty() {
			out.push('_');
			previous_lower = false;
		}
	}

	out.trim_end_matches('_').to_string()
}

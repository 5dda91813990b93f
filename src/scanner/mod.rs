//! The group scanner: walks one root, refreshing catalogue entries for
//! every non-ignored path and pruning the ones whose files are gone.

pub mod ignore;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use futures::future::BoxFuture;
use tracing::{debug, warn};

use crate::catalog::context::ScanContext;
use crate::domain::entry::{ChecksumError, Entry, EntryType};
use crate::domain::group::Group;
use crate::domain::now_nanos;
use crate::metadata::value::Scalar;
use crate::metadata::{mime, LoaderError};
use crate::scanner::ignore::{IgnoreError, IgnoreList};
use crate::stats::Timing;
use crate::store::filter::Filter;
use crate::store::StoreError;
use thiserror::Error;

const NANOS_PER_SECOND: i64 = 1_000_000_000;

#[derive(Error, Debug)]
pub enum ScanError {
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Store(#[from] StoreError),

	#[error(transparent)]
	Checksum(#[from] ChecksumError),

	#[error(transparent)]
	Loader(#[from] LoaderError),

	#[error(transparent)]
	Ignore(#[from] IgnoreError),

	#[error("failed to get parent id: {0}")]
	ParentLookup(String),
}

/// Outcome of visiting one path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scanned {
	Indexed,
	/// The path was deliberately left out of this scan (ignored, filtered,
	/// unreadable); the walk continues with its siblings.
	Skipped,
}

/// Walks one group (or one subdirectory of it, during recursion).
pub struct GroupScanner {
	ctx: Arc<ScanContext>,
	pub group: Group,
	ignore: Option<Arc<IgnoreList>>,

	/// Entry ids of the enclosing directories up to the group itself;
	/// marked changed whenever a descendant changes.
	ancestors: Vec<String>,

	target_subgroups: Vec<String>,

	pub current_pass: i32,
	pub passes_done: u32,
	pub deep_scan: bool,

	pub file_count: u64,
	pub modified_file_count: u64,

	direct_children: u64,
	descendants: u64,
}

impl GroupScanner {
	pub fn new(ctx: Arc<ScanContext>, mut group: Group) -> Result<GroupScanner, ScanError> {
		group.populate();

		let ignore = group.compile_ignore_list()?.map(Arc::new);
		let ancestors = vec![group.id.clone()];
		let deep_scan = group.deep_scan;

		Ok(GroupScanner {
			ctx,
			group,
			ignore,
			ancestors,
			target_subgroups: Vec::new(),
			current_pass: 0,
			passes_done: 0,
			deep_scan,
			file_count: 0,
			modified_file_count: 0,
			direct_children: 0,
			descendants: 0,
		})
	}

	/// A scanner for one subdirectory; identical configuration, shared
	/// compiled ignore list, the directory's entry id as parent.
	fn descend(&self, subdirectory: &Path, parent_id: String) -> GroupScanner {
		let group = self.group.descend(subdirectory, parent_id.clone());

		let mut ancestors = Vec::with_capacity(self.ancestors.len() + 1);
		ancestors.push(parent_id);
		ancestors.extend(self.ancestors.iter().cloned());

		GroupScanner {
			ctx: self.ctx.clone(),
			group,
			ignore: self.ignore.clone(),
			ancestors,
			target_subgroups: self.target_subgroups.clone(),
			current_pass: self.current_pass,
			passes_done: self.passes_done,
			deep_scan: self.deep_scan,
			file_count: 0,
			modified_file_count: 0,
			direct_children: 0,
			descendants: 0,
		}
	}

	/// Walk the group's root, producing or refreshing entries for every
	/// non-ignored path.
	pub async fn scan(&mut self, subgroups: Vec<String>) -> Result<(), ScanError> {
		self.target_subgroups = subgroups;

		self.file_count = 0;
		self.modified_file_count = 0;
		self.direct_children = 0;
		self.descendants = 0;

		let mut names = Vec::new();
		let mut listing = tokio::fs::read_dir(&self.group.path).await?;

		while let Some(dirent) = listing.next_entry().await? {
			names.push(dirent.file_name());
		}

		names.sort();

		for name in names {
			self.scan_path(self.group.path.join(name)).await?;
		}

		Ok(())
	}

	/// Handle one filesystem entry, recursing into directories.
	pub fn scan_path(&mut self, abs_path: PathBuf) -> BoxFuture<'_, Result<Scanned, ScanError>> {
		Box::pin(async move {
			let stat = match tokio::fs::symlink_metadata(&abs_path).await {
				Ok(stat) => stat,
				Err(err) => {
					warn!(
						pass = self.current_pass,
						group = %self.group.id,
						path = %abs_path.display(),
						"stat failed: {err}"
					);
					return Ok(Scanned::Skipped);
				}
			};

			let stat = if stat.file_type().is_symlink() {
				match self.resolve_symlink(&abs_path).await {
					Some(target_stat) => target_stat,
					None => return Ok(Scanned::Skipped),
				}
			} else {
				stat
			};

			let abs_str = abs_path.to_string_lossy().to_string();
			let rel_path = self.group.relative_to_root(&abs_str).to_string();

			let parent = match self.parent_from_path(&rel_path).await {
				Ok(parent) => parent,
				Err(_) => self.group.parent.clone(),
			};

			let dir_entry = Entry::new(
				&self.group.id,
				&self.group.root_path,
				&abs_path,
			);

			if !self.contains_path(&abs_path).await {
				debug!(
					pass = self.current_pass,
					group = %self.group.id,
					"ignoring entry {rel_path}"
				);

				self.cleanup_missing_entries(
					&Filter::where_all([("parent".to_string(), Scalar::from(dir_entry.id.clone()))]),
					true,
				)
				.await;
				self.cleanup_missing_entries(
					&Filter::where_all([("id".to_string(), Scalar::from(dir_entry.id.clone()))]),
					true,
				)
				.await;
				self.cleanup_missing_entries(
					&Filter::where_all([("id".to_string(), Scalar::from(self.group.id.clone()))]),
					true,
				)
				.await;

				return Ok(Scanned::Skipped);
			}

			if stat.is_dir() {
				if self.group.no_recurse_directories {
					return Ok(Scanned::Skipped);
				}

				let mut subdirectory = self.descend(&abs_path, dir_entry.id.clone());

				if !self.target_subgroups.is_empty()
					&& !self.target_subgroups.contains(&subdirectory.group.parent)
				{
					return Ok(Scanned::Skipped);
				}

				debug!(
					pass = self.current_pass,
					group = %self.group.id,
					parent = %subdirectory.group.parent,
					"scanning subdirectory {rel_path}"
				);

				subdirectory.scan(self.target_subgroups.clone()).await?;
				self.modified_file_count += subdirectory.modified_file_count;

				if subdirectory.file_count == 0 {
					// the directory holds nothing indexable; drop it and
					// anything recorded beneath it
					let orphan_filter = Filter::where_all([(
						"parent".to_string(),
						Scalar::from(subdirectory.group.parent.clone()),
					)]);

					match self.ctx.store.list_with_filter("id", &orphan_filter).await {
						Ok(ids) => {
							let ids = ids.iter().map(Scalar::render).collect::<Vec<_>>();

							if !ids.is_empty() {
								if let Err(err) = self.ctx.store.delete(&ids).await {
									warn!(
										group = %self.group.id,
										"failed to cleanup entries under {}: {err}",
										subdirectory.group.parent
									);
								}
							}
						}
						Err(err) => {
							warn!(
								group = %self.group.id,
								"failed to cleanup entries under {}: {err}",
								subdirectory.group.parent
							);
						}
					}

					if self.ctx.store.exists(&dir_entry.id).await {
						self.ctx.store.delete(&[dir_entry.id.clone()]).await?;
					}
				} else {
					self.scan_entry(
						&abs_path,
						&parent,
						true,
						subdirectory.direct_children,
						subdirectory.descendants,
					)
					.await?;

					self.cleanup_missing_entries(
						&Filter::where_all([(
							"parent".to_string(),
							Scalar::from(subdirectory.group.parent.clone()),
						)]),
						false,
					)
					.await;

					self.file_count += subdirectory.file_count;
					self.direct_children += 1;
					self.descendants += subdirectory.descendants + 1;
				}
			} else {
				if self.group.file_minimum_size > 0 && stat.len() < self.group.file_minimum_size {
					return Ok(Scanned::Skipped);
				}

				self.scan_entry(&abs_path, &parent, false, 0, 0).await?;

				self.file_count += 1;
				self.direct_children += 1;
				self.descendants += 1;
			}

			Ok(Scanned::Indexed)
		})
	}

	/// Whether a path belongs to this group: under the group's path, not
	/// rejected by the ignore list, and statable.
	pub async fn contains_path(&self, abs_path: &Path) -> bool {
		if !abs_path.starts_with(&self.group.path) {
			return false;
		}

		let Ok(stat) = tokio::fs::metadata(abs_path).await else {
			return false;
		};

		if let Some(ignore) = &self.ignore {
			let abs_str = abs_path.to_string_lossy();
			let rel_path = self.group.relative_to_root(&abs_str);

			if !ignore.should_keep(rel_path, stat.is_dir()) {
				return false;
			}
		}

		true
	}

	async fn resolve_symlink(&self, abs_path: &Path) -> Option<std::fs::Metadata> {
		if !self.group.follow_symlinks {
			warn!(
				group = %self.group.id,
				"skipping symbolic link {}",
				abs_path.display()
			);
			return None;
		}

		let target = match tokio::fs::read_link(abs_path).await {
			Ok(target) => target,
			Err(err) => {
				warn!(
					group = %self.group.id,
					"error reading symbolic link {}: {err}",
					abs_path.display()
				);
				return None;
			}
		};

		let resolved = if target.is_absolute() {
			target
		} else {
			self.group.path.join(target)
		};

		match tokio::fs::metadata(&resolved).await {
			Ok(stat) => {
				debug!(
					group = %self.group.id,
					"following symbolic link {} -> {}",
					abs_path.display(),
					resolved.display()
				);
				Some(stat)
			}
			Err(err) => {
				warn!(
					group = %self.group.id,
					"error reading target of symbolic link {}: {err}",
					resolved.display()
				);
				None
			}
		}
	}

	/// Resolve the parent entry id for a path, memoized per group and
	/// parent directory name across the whole scan.
	async fn parent_from_path(&self, rel_path: &str) -> Result<String, ScanError> {
		let dir = Path::new(rel_path)
			.parent()
			.map(|p| p.to_string_lossy().to_string())
			.unwrap_or_else(|| "/".to_string());

		let group_path = self.group.path.to_string_lossy();
		let mut parent_name = dir
			.strip_prefix(group_path.as_ref())
			.unwrap_or(&dir)
			.to_string();

		if parent_name == "/" {
			parent_name = crate::ROOT_GROUP_NAME.to_string();
		}

		let cache_key = format!("{}__{}", self.group.id, parent_name);

		if let Some(cached) = self.ctx.parent_path_cache.get(&cache_key) {
			return Ok(cached.value().clone());
		}

		let filter = Filter::where_all([
			("root_group".to_string(), Scalar::from(self.group.id.clone())),
			("name".to_string(), Scalar::from(parent_name.clone())),
		]);

		let results = self.ctx.store.find(&filter).await?;

		if results.len() != 1 {
			return Err(ScanError::ParentLookup(format!(
				"expected 1 result, got: {}",
				results.len()
			)));
		}

		let parent_id = results[0].id.clone();
		self.ctx.parent_path_cache.insert(cache_key, parent_id.clone());

		Ok(parent_id)
	}

	/// Entry is considered unchanged on later passes when it was not marked
	/// by an earlier one.
	fn has_not_changed(&self, id: &str) -> bool {
		self.current_pass == 0 || self.passes_done == 0 || self.ctx.changed_entries.contains(id)
	}

	/// Create or refresh one catalogue entry; the incremental skip
	/// predicate makes this cheap for unchanged files.
	async fn scan_entry(
		&mut self,
		abs_path: &Path,
		parent: &str,
		is_dir: bool,
		child_count: u64,
		descendant_count: u64,
	) -> Result<Entry, ScanError> {
		let timing = Timing::start();
		let directory = if is_dir { "true" } else { "false" };
		let group_id = self.group.id.clone();
		let tags: &[(&str, &str)] = &[("root_group", group_id.as_str()), ("directory", directory)];

		self.ctx.stats.increment("metabase.db.entry.num_scanned", tags);

		let result = self
			.scan_entry_inner(abs_path, parent, is_dir, child_count, descendant_count)
			.await;

		timing.send(&*self.ctx.stats, "metabase.db.entry.scan_time_ms", tags);

		result
	}

	async fn scan_entry_inner(
		&mut self,
		abs_path: &Path,
		parent: &str,
		is_dir: bool,
		child_count: u64,
		descendant_count: u64,
	) -> Result<Entry, ScanError> {
		let mut entry = Entry::new(&self.group.id, &self.group.root_path, abs_path);

		// exact, case sensitive basename exclusions apply everywhere
		if let Some(basename) = abs_path.file_name().and_then(|n| n.to_str()) {
			if self.ctx.is_excluded(basename) {
				return Ok(entry);
			}
		}

		// on later passes only entries marked by pass one are worth a stat
		if self.current_pass > 1 && !self.ctx.changed_entries.contains(&entry.id) {
			return Ok(entry);
		}

		let stat = tokio::fs::metadata(abs_path).await?;

		entry.size = stat.len();
		entry.last_modified_at = stat
			.modified()
			.ok()
			.and_then(|t| t.duration_since(UNIX_EPOCH).ok())
			.map(|d| d.as_nanos() as i64)
			.unwrap_or(0);

		if let Some(existing) = self.ctx.store.get(&entry.id).await? {
			if !self.deep_scan && existing.last_deep_scanned_at > 0 {
				let max_age = self.ctx.max_time_between_deep_scans.as_nanos() as i64;
				let fresh = max_age == 0 || now_nanos() - existing.last_deep_scanned_at < max_age;

				let mtime_delta = (entry.last_modified_at - existing.last_modified_at).abs();

				if fresh && mtime_delta < NANOS_PER_SECOND && self.has_not_changed(&entry.id) {
					return Ok(existing);
				}
			}

			entry.metadata = existing.metadata;
		}

		debug!(
			pass = self.current_pass,
			group = %self.group.id,
			parent,
			"scanning entry {} ({})",
			entry.id,
			abs_path.display()
		);

		self.modified_file_count += 1;

		// changed markers are written before the record itself so later
		// passes in this scan observe them
		self.ctx.changed_entries.insert(entry.id.clone());

		for ancestor in &self.ancestors {
			self.ctx.changed_entries.insert(ancestor.clone());
		}

		entry.parent = parent.to_string();
		entry.root_group = self.group.id.clone();
		entry.is_group = is_dir;
		entry.last_deep_scanned_at = now_nanos();

		if is_dir {
			entry.child_count = child_count;
			entry.descendant_count = descendant_count;
			entry.entry_type = EntryType::Directory;
		} else {
			entry.entry_type = mime::general_file_type(abs_path);
		}

		let directory = if is_dir { "true" } else { "false" };
		let group_id = self.group.id.clone();
		let tags: &[(&str, &str)] = &[("root_group", group_id.as_str()), ("directory", directory)];

		let timing = Timing::start();
		entry.load_metadata(&self.ctx.loaders, self.current_pass).await?;
		timing.send(&*self.ctx.stats, "metabase.db.entry.metadata_load_time_ms", tags);

		if !entry.is_group {
			if !self.group.skip_checksum && !self.ctx.skip_checksum {
				let checksum_pass = self.ctx.loaders.checksum_pass();

				if self.current_pass == 0 || self.current_pass == checksum_pass {
					let timing = Timing::start();
					entry.checksum = Some(entry.generate_checksum(false).await?);
					timing.send(&*self.ctx.stats, "metabase.db.entry.checksum_time_ms", tags);
				}
			}

			if self.current_pass <= 1 {
				self.ctx
					.stats
					.gauge("metabase.db.entry.bytes_scanned", entry.size as f64, tags);
			}
		}

		let timing = Timing::start();
		self.ctx.store.create_or_update(&entry.id, &entry).await?;
		timing.send(&*self.ctx.stats, "metabase.db.entry.persist_time_ms", tags);

		Ok(entry)
	}

	/// Delete entries matching the filter whose files are gone or are now
	/// excluded by the ignore list; `force` deletes every match.
	pub(crate) async fn cleanup_missing_entries(&self, filter: &Filter, force: bool) {
		let entries = match self.ctx.store.find(filter).await {
			Ok(entries) => entries,
			Err(err) => {
				warn!(group = %self.group.id, "failed to query cleanup candidates: {err}");
				return;
			}
		};

		let mut doomed = Vec::new();

		for entry in entries {
			if force {
				self.report_entry_deletion(&entry);
				doomed.push(entry.id);
				continue;
			}

			if let Some(ignore) = &self.ignore {
				if !ignore.should_keep(&entry.relative_path, entry.is_group) {
					self.report_entry_deletion(&entry);
					doomed.push(entry.id);
					continue;
				}
			}

			match self.ctx.absolute_path(&entry) {
				Some(abs_path) => {
					if let Err(err) = tokio::fs::metadata(&abs_path).await {
						if err.kind() == std::io::ErrorKind::NotFound {
							self.report_entry_deletion(&entry);
							doomed.push(entry.id);
						}
					}
				}
				None => {
					warn!(
						group = %self.group.id,
						"failed to cleanup missing entry {} ({})",
						entry.id,
						entry.relative_path
					);
				}
			}
		}

		if doomed.is_empty() {
			return;
		}

		match self.ctx.store.delete(&doomed).await {
			Ok(count) => debug!(group = %self.group.id, "cleaned up {count} missing entries"),
			Err(err) => warn!(group = %self.group.id, "failed to cleanup missing entries: {err}"),
		}
	}

	pub(crate) fn report_entry_deletion(&self, entry: &Entry) {
		let tags: &[(&str, &str)] = &[("root_group", self.group.id.as_str())];

		self.ctx
			.stats
			.gauge("metabase.db.entry.bytes_removed", entry.size as f64, tags);
		self.ctx.stats.increment("metabase.db.entry.num_removed", tags);
	}

	/// Collect files under `path` modified more than a second after
	/// `since_nanos`, honouring the group's containment rules. Directories
	/// outside the group short-circuit descent.
	pub fn collect_modified_since<'a>(
		&'a self,
		path: PathBuf,
		since_nanos: i64,
		found: &'a mut Vec<PathBuf>,
	) -> BoxFuture<'a, Result<(), ScanError>> {
		Box::pin(async move {
			let mut listing = tokio::fs::read_dir(&path).await?;

			while let Some(dirent) = listing.next_entry().await? {
				let child = dirent.path();

				let Ok(stat) = tokio::fs::metadata(&child).await else {
					continue;
				};

				if !self.contains_path(&child).await {
					continue;
				}

				if stat.is_dir() {
					self.collect_modified_since(child, since_nanos, found).await?;
				} else {
					let modified = stat
						.modified()
						.ok()
						.and_then(|t| t.duration_since(UNIX_EPOCH).ok())
						.map(|d| d.as_nanos() as i64)
						.unwrap_or(0);

					if modified - NANOS_PER_SECOND > since_nanos {
						found.push(child);
					}
				}
			}

			Ok(())
		})
	}
}

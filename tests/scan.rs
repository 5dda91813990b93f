//! End-to-end scan, cleanup and polling behaviour against a real
//! filesystem tree and the in-memory store.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Notify;

use metacat::catalog::GroupLister;
use metacat::domain::entry::{file_id_from_name, EntryType};
use metacat::error::CatalogError;
use metacat::metadata::value::Scalar;
use metacat::stats::NullStats;
use metacat::store::filter::Filter;
use metacat::{Catalog, CatalogConfig, Entry, EntryStore, Group, MemoryStore, StaticGroups};

struct Fixture {
	_root: TempDir,
	catalog: Catalog,
	store: Arc<MemoryStore>,
	group_id: String,
}

async fn write(path: impl AsRef<Path>, contents: &[u8]) {
	if let Some(parent) = path.as_ref().parent() {
		tokio::fs::create_dir_all(parent).await.expect("create parent");
	}

	tokio::fs::write(path, contents).await.expect("write file");
}

fn init_tracing() {
	static INIT: std::sync::Once = std::sync::Once::new();

	INIT.call_once(|| {
		let _ = tracing_subscriber::fmt()
			.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
			.try_init();
	});
}

fn fixture_with(root: TempDir, group: Group, config: CatalogConfig) -> Fixture {
	init_tracing();

	let store = Arc::new(MemoryStore::new());
	let group_id = group.id.clone();

	let catalog = Catalog::new(
		config,
		store.clone(),
		Arc::new(NullStats),
		Arc::new(StaticGroups(vec![group])),
	)
	.expect("catalog");

	Fixture {
		_root: root,
		catalog,
		store,
		group_id,
	}
}

async fn media_fixture() -> Fixture {
	let root = TempDir::new().expect("tempdir");

	write(root.path().join("a.txt"), b"alpha contents").await;
	write(root.path().join("b.txt"), b"beta contents").await;
	write(root.path().join("music/song.mkv"), b"not actually a video").await;

	let group = Group::new("media", root.path());
	fixture_with(root, group, CatalogConfig::default())
}

fn id_of(fixture: &Fixture, relative: &str) -> String {
	file_id_from_name(&fixture.group_id, relative)
}

async fn get(fixture: &Fixture, relative: &str) -> Option<Entry> {
	fixture
		.store
		.get(&id_of(fixture, relative))
		.await
		.expect("store get")
}

#[tokio::test]
async fn scan_indexes_files_and_directories() {
	let fixture = media_fixture().await;

	fixture.catalog.initialize().await.expect("initialize");
	fixture.catalog.scan(false, &[]).await.expect("scan");

	let a = get(&fixture, "/a.txt").await.expect("a.txt indexed");
	assert!(!a.is_group);
	assert_eq!(a.parent, "root");
	assert_eq!(a.entry_type, EntryType::File);
	assert_eq!(a.size, 14);
	assert!(a.last_modified_at > 0);
	assert!(a.last_deep_scanned_at > 0);

	let music = get(&fixture, "/music").await.expect("/music indexed");
	assert!(music.is_group);
	assert_eq!(music.entry_type, EntryType::Directory);
	assert_eq!(music.child_count, 1);
	assert_eq!(music.descendant_count, 1);

	let song = get(&fixture, "/music/song.mkv").await.expect("song indexed");
	assert_eq!(song.parent, music.id);
	assert_eq!(song.entry_type, EntryType::Video);
}

#[tokio::test]
async fn every_parent_resolves_after_a_scan() {
	let fixture = media_fixture().await;

	fixture.catalog.initialize().await.expect("initialize");
	fixture.catalog.scan(false, &[]).await.expect("scan");

	let entries = fixture.store.find(&Filter::all()).await.expect("find all");
	assert!(!entries.is_empty());

	for entry in &entries {
		if entry.parent != "root" {
			assert!(
				fixture.store.exists(&entry.parent).await,
				"parent of {} must exist",
				entry.relative_path
			);
		}
	}
}

#[tokio::test]
async fn later_passes_write_nothing_for_unchanged_files() {
	let root = TempDir::new().expect("tempdir");

	for i in 0..100 {
		write(root.path().join(format!("tracks/file-{i:03}.txt")), b"payload").await;
	}

	let group = Group::new("bulk", root.path());
	let fixture = fixture_with(root, group, CatalogConfig::default());

	fixture.catalog.initialize().await.expect("initialize");
	fixture.catalog.scan(false, &[]).await.expect("scan");

	// each entry is persisted exactly once, on the first pass; the second
	// pass consults the changed-entries set and leaves the store alone
	assert_eq!(fixture.store.write_count() as usize, fixture.store.len());
}

#[tokio::test]
async fn shallow_rescan_leaves_unchanged_entries_alone() {
	let fixture = media_fixture().await;

	fixture.catalog.initialize().await.expect("initialize");
	fixture.catalog.scan(false, &[]).await.expect("scan");

	let before = get(&fixture, "/a.txt").await.expect("indexed");
	let writes_before = fixture.store.write_count();

	fixture.catalog.scan(false, &[]).await.expect("rescan");

	let after = get(&fixture, "/a.txt").await.expect("still indexed");

	assert_eq!(before.last_deep_scanned_at, after.last_deep_scanned_at);
	assert_eq!(fixture.store.write_count(), writes_before);
}

#[tokio::test]
async fn deep_scan_runs_every_pass_and_checksums() {
	let fixture = media_fixture().await;

	fixture.catalog.initialize().await.expect("initialize");
	fixture.catalog.scan(true, &[]).await.expect("deep scan");

	let a = get(&fixture, "/a.txt").await.expect("indexed");

	// sha1 of "alpha contents" is stable; just verify shape here, the
	// checksum unit tests pin exact digests
	let sum = a.checksum.expect("checksum populated on the content pass");
	assert_eq!(sum.len(), 40);
	assert!(sum.chars().all(|c| c.is_ascii_hexdigit()));
}

#[tokio::test]
async fn deep_scan_merges_sidecar_metadata() {
	let root = TempDir::new().expect("tempdir");

	write(root.path().join("shows/ep1.mkv"), b"video bytes").await;
	write(
		root.path().join("shows/ep1.nfo"),
		b"<episodedetails><title>Pilot</title><season>1</season><episode>1</episode></episodedetails>",
	)
	.await;
	write(
		root.path().join("shows/ep1.mkv.info.json"),
		br#"{"id": "vid01", "title": "Pilot", "duration": 55}"#,
	)
	.await;

	let group = Group::new("shows", root.path());
	let fixture = fixture_with(root, group, CatalogConfig::default());

	fixture.catalog.initialize().await.expect("initialize");
	fixture.catalog.scan(true, &[]).await.expect("deep scan");

	let episode = get(&fixture, "/shows/ep1.mkv").await.expect("indexed");

	assert_eq!(episode.get("file.mime.major"), Some(&Scalar::from("video")));
	assert_eq!(episode.get("media.title"), Some(&Scalar::from("Pilot")));
	assert_eq!(episode.get("media.season"), Some(&Scalar::Int(1)));
	assert_eq!(episode.get("ytdl.id"), Some(&Scalar::from("vid01")));
}

#[tokio::test]
async fn ignore_patterns_scope_the_scan() {
	let root = TempDir::new().expect("tempdir");

	write(root.path().join("drop.txt"), b"never indexed").await;
	write(root.path().join("keep/file.txt"), b"indexed").await;

	let mut group = Group::new("scoped", root.path());
	group.file_pattern = Some("*\n!/keep\n!/keep/**".to_string());

	let fixture = fixture_with(root, group, CatalogConfig::default());

	fixture.catalog.initialize().await.expect("initialize");
	fixture.catalog.scan(false, &[]).await.expect("scan");

	assert!(get(&fixture, "/keep/file.txt").await.is_some());
	assert!(get(&fixture, "/keep").await.is_some());
	assert!(get(&fixture, "/drop.txt").await.is_none());
}

#[tokio::test]
async fn global_exclusions_are_exact_basenames() {
	let root = TempDir::new().expect("tempdir");

	write(root.path().join(".DS_Store"), b"finder litter").await;
	write(root.path().join("real.txt"), b"content").await;

	let group = Group::new("home", root.path());
	let fixture = fixture_with(root, group, CatalogConfig::default());

	fixture.catalog.initialize().await.expect("initialize");
	fixture.catalog.scan(false, &[]).await.expect("scan");

	assert!(get(&fixture, "/real.txt").await.is_some());
	assert!(get(&fixture, "/.DS_Store").await.is_none());
}

#[tokio::test]
async fn minimum_file_size_filters_small_files() {
	let root = TempDir::new().expect("tempdir");

	write(root.path().join("tiny.txt"), b"abc").await;
	write(root.path().join("big.txt"), b"large enough to index").await;

	let mut group = Group::new("sized", root.path());
	group.file_minimum_size = 10;

	let fixture = fixture_with(root, group, CatalogConfig::default());

	fixture.catalog.initialize().await.expect("initialize");
	fixture.catalog.scan(false, &[]).await.expect("scan");

	assert!(get(&fixture, "/big.txt").await.is_some());
	assert!(get(&fixture, "/tiny.txt").await.is_none());
}

#[tokio::test]
async fn no_recurse_skips_subdirectories() {
	let root = TempDir::new().expect("tempdir");

	write(root.path().join("top.txt"), b"indexed").await;
	write(root.path().join("nested/below.txt"), b"not indexed").await;

	let mut group = Group::new("flat", root.path());
	group.no_recurse_directories = true;

	let fixture = fixture_with(root, group, CatalogConfig::default());

	fixture.catalog.initialize().await.expect("initialize");
	fixture.catalog.scan(false, &[]).await.expect("scan");

	assert!(get(&fixture, "/top.txt").await.is_some());
	assert!(get(&fixture, "/nested").await.is_none());
	assert!(get(&fixture, "/nested/below.txt").await.is_none());
}

#[cfg(unix)]
#[tokio::test]
async fn symlinks_are_skipped_unless_opted_in() {
	let root = TempDir::new().expect("tempdir");
	write(root.path().join("real.txt"), b"the target").await;
	std::os::unix::fs::symlink(root.path().join("real.txt"), root.path().join("link.txt"))
		.expect("symlink");

	// default: symbolic links are skipped
	let group = Group::new("links", root.path());
	let fixture = fixture_with(root, group, CatalogConfig::default());

	fixture.catalog.initialize().await.expect("initialize");
	fixture.catalog.scan(false, &[]).await.expect("scan");
	assert!(get(&fixture, "/link.txt").await.is_none());

	// opted in: the link is followed and indexed under its own path
	let root = TempDir::new().expect("tempdir");
	write(root.path().join("real.txt"), b"the target").await;
	std::os::unix::fs::symlink(root.path().join("real.txt"), root.path().join("link.txt"))
		.expect("symlink");

	let mut group = Group::new("links", root.path());
	group.follow_symlinks = true;

	let fixture = fixture_with(root, group, CatalogConfig::default());

	fixture.catalog.initialize().await.expect("initialize");
	fixture.catalog.scan(false, &[]).await.expect("scan");
	assert!(get(&fixture, "/link.txt").await.is_some());
}

#[tokio::test]
async fn empty_directories_are_not_indexed() {
	let root = TempDir::new().expect("tempdir");

	write(root.path().join("full/file.txt"), b"content").await;
	tokio::fs::create_dir(root.path().join("hollow")).await.expect("mkdir");

	let group = Group::new("media", root.path());
	let fixture = fixture_with(root, group, CatalogConfig::default());

	fixture.catalog.initialize().await.expect("initialize");
	fixture.catalog.scan(false, &[]).await.expect("scan");

	assert!(get(&fixture, "/full").await.is_some());
	assert!(get(&fixture, "/hollow").await.is_none());
}

#[tokio::test]
async fn deleted_files_are_pruned_on_rescan() {
	let fixture = media_fixture().await;

	fixture.catalog.initialize().await.expect("initialize");
	fixture.catalog.scan(false, &[]).await.expect("scan");

	let song = get(&fixture, "/music/song.mkv").await.expect("indexed");
	let song_path = fixture
		.catalog
		.context()
		.absolute_path(&song)
		.expect("resolvable");

	tokio::fs::remove_file(&song_path).await.expect("remove");
	fixture.catalog.scan(false, &[]).await.expect("rescan");

	assert!(get(&fixture, "/music/song.mkv").await.is_none());
	// the now-empty directory is dropped with its contents
	assert!(get(&fixture, "/music").await.is_none());
}

#[tokio::test]
async fn cleanup_converges_and_removes_orphans() {
	let fixture = media_fixture().await;

	fixture.catalog.initialize().await.expect("initialize");
	fixture.catalog.scan(false, &[]).await.expect("scan");

	// orphan an entire subtree behind the scanner's back
	let music_path = fixture._root.path().join("music");
	tokio::fs::remove_dir_all(&music_path).await.expect("remove tree");

	fixture.catalog.cleanup(false, false).await.expect("cleanup");

	assert!(get(&fixture, "/music").await.is_none());
	assert!(get(&fixture, "/music/song.mkv").await.is_none());
	assert!(get(&fixture, "/a.txt").await.is_some());

	// a second cleanup is a fixed point
	let len = fixture.store.len();
	fixture.catalog.cleanup(false, false).await.expect("cleanup again");
	assert_eq!(fixture.store.len(), len);
}

#[tokio::test]
async fn cleanup_prunes_entries_of_unconfigured_root_groups() {
	let fixture = media_fixture().await;

	fixture.catalog.initialize().await.expect("initialize");
	fixture.catalog.scan(false, &[]).await.expect("scan");

	let mut rogue = Entry::new("ghost", "/nowhere", "/nowhere/file.txt");
	rogue.parent = "root".to_string();
	rogue.last_modified_at = 1;

	fixture
		.store
		.create_or_update(&rogue.id.clone(), &rogue)
		.await
		.expect("insert rogue");

	fixture.catalog.cleanup(true, false).await.expect("cleanup");

	assert!(!fixture.store.exists(&rogue.id).await);
}

#[tokio::test]
async fn cleanup_refuses_an_empty_group_set() {
	let store = Arc::new(MemoryStore::new());

	let catalog = Catalog::new(
		CatalogConfig::default(),
		store,
		Arc::new(NullStats),
		Arc::new(StaticGroups(Vec::new())),
	)
	.expect("catalog");

	assert!(matches!(
		catalog.cleanup(false, false).await,
		Err(CatalogError::EmptyGroupSet)
	));
}

#[tokio::test]
async fn label_filter_limits_scanned_groups() {
	let fixture = media_fixture().await;

	fixture.catalog.initialize().await.expect("initialize");

	fixture
		.catalog
		.scan(false, &["unrelated".to_string()])
		.await
		.expect("scan");
	assert!(fixture.store.is_empty());

	fixture
		.catalog
		.scan(false, &["Media".to_string()])
		.await
		.expect("scan");
	assert!(!fixture.store.is_empty());
}

struct GatedLister {
	groups: Vec<Group>,
	gate: Arc<Notify>,
	released: std::sync::atomic::AtomicBool,
}

#[async_trait]
impl GroupLister for GatedLister {
	async fn list(&self) -> Result<Vec<Group>, CatalogError> {
		if !self.released.swap(true, std::sync::atomic::Ordering::SeqCst) {
			self.gate.notified().await;
		}

		Ok(self.groups.clone())
	}
}

#[tokio::test]
async fn concurrent_scans_are_refused() {
	let root = TempDir::new().expect("tempdir");
	write(root.path().join("a.txt"), b"content").await;

	let gate = Arc::new(Notify::new());
	let lister = Arc::new(GatedLister {
		groups: vec![Group::new("media", root.path())],
		gate: gate.clone(),
		released: std::sync::atomic::AtomicBool::new(false),
	});

	let store = Arc::new(MemoryStore::new());
	let catalog = Arc::new(
		Catalog::new(CatalogConfig::default(), store, Arc::new(NullStats), lister)
			.expect("catalog"),
	);

	let first = {
		let catalog = catalog.clone();
		tokio::spawn(async move { catalog.scan(false, &[]).await })
	};

	// the first scan holds the guard while parked on the lister
	while !catalog.scan_in_progress() {
		tokio::task::yield_now().await;
	}

	assert!(matches!(
		catalog.scan(false, &[]).await,
		Err(CatalogError::ScanAlreadyRunning)
	));

	gate.notify_one();
	first.await.expect("join").expect("first scan succeeds");
	assert!(!catalog.scan_in_progress());
}

#[tokio::test]
async fn post_scan_callbacks_run_after_every_scan() {
	let fixture = media_fixture().await;

	let fired = Arc::new(std::sync::atomic::AtomicUsize::new(0));
	let observer = fired.clone();

	fixture.catalog.register_post_scan_event(Box::new(move || {
		observer.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
	}));

	fixture.catalog.initialize().await.expect("initialize");
	fixture.catalog.scan(false, &[]).await.expect("scan");
	fixture.catalog.scan(false, &[]).await.expect("rescan");

	assert_eq!(fired.load(std::sync::atomic::Ordering::SeqCst), 2);
}

#[tokio::test]
async fn directories_by_file_respect_containment() {
	let fixture = media_fixture().await;

	let inside = fixture._root.path().join("a.txt");
	let outside = std::env::temp_dir().join("metacat-absent/elsewhere.txt");

	assert_eq!(fixture.catalog.get_directories_by_file(&inside).await.len(), 1);
	assert!(fixture.catalog.get_directories_by_file(&outside).await.is_empty());
}

#[tokio::test]
async fn scheduler_rejects_malformed_cron_expressions() {
	let root = TempDir::new().expect("tempdir");

	let config = CatalogConfig {
		scan_interval: Some("not a cron line".into()),
		..CatalogConfig::default()
	};

	let catalog = Arc::new(
		Catalog::new(
			config,
			Arc::new(MemoryStore::new()),
			Arc::new(NullStats),
			Arc::new(StaticGroups(vec![Group::new("media", root.path())])),
		)
		.expect("catalog"),
	);

	assert!(matches!(
		catalog.spawn_scheduler(),
		Err(CatalogError::InvalidScanInterval(..))
	));
}

#[tokio::test]
async fn polling_picks_up_files_created_after_the_scan() {
	let fixture = media_fixture().await;

	fixture.catalog.initialize().await.expect("initialize");
	fixture.catalog.scan(false, &[]).await.expect("scan");

	assert!(get(&fixture, "/fresh.txt").await.is_none());

	// the poll threshold tolerates a second of mtime skew
	tokio::time::sleep(std::time::Duration::from_millis(1400)).await;
	write(fixture._root.path().join("fresh.txt"), b"brand new").await;

	fixture.catalog.poll_once().await.expect("poll");

	let fresh = get(&fixture, "/fresh.txt").await.expect("picked up");
	assert!(!fresh.is_group);
	assert!(fresh.checksum.is_some());
}

#[tokio::test]
async fn manifest_export_walks_the_catalogue() {
	let fixture = media_fixture().await;

	fixture.catalog.initialize().await.expect("initialize");
	fixture.catalog.scan(true, &[]).await.expect("deep scan");

	let music = get(&fixture, "/music").await.expect("indexed");

	let manifest = metacat::Manifest::from_entry(
		&*fixture.store,
		&music,
		&["name".to_string(), "file.size".to_string()],
		Vec::new(),
	)
	.await
	.expect("manifest");

	assert_eq!(manifest.items.len(), 1);
	assert_eq!(manifest.items[0].relative_path, "/music/song.mkv");
	assert_eq!(manifest.items[0].values[0], Scalar::from("/music/song.mkv"));
	assert_eq!(manifest.items[0].values[1], Scalar::Int(20));
}

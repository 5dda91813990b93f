//! metacat
//!
//! A local filesystem metadata indexer and incremental scanner. Configured
//! "groups" (top-level roots) are walked in multiple passes, each pass
//! running a set of metadata loaders over every non-ignored path. The
//! resulting entries are persisted through an injected record store and kept
//! consistent by orphan cleanup, change polling and manifest-driven sync
//! diffs.

pub mod catalog;
pub mod config;
pub mod domain;
pub mod error;
pub mod metadata;
pub mod scanner;
pub mod stats;
pub mod store;
pub mod sync;

pub use catalog::{Catalog, GroupLister, StaticGroups};
pub use config::CatalogConfig;
pub use domain::entry::Entry;
pub use domain::group::Group;
pub use error::CatalogError;
pub use scanner::ignore::IgnoreList;
pub use store::{filter::Filter, memory::MemoryStore, EntryStore};
pub use sync::{Manifest, ManifestItem, SyncPolicy};

/// Parent id used by entries at the top of a group, and by groups without an
/// explicit parent of their own.
pub const ROOT_GROUP_NAME: &str = "root";

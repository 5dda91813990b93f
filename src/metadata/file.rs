//! File attribute loader: stat-derived fields and the extension mimetype.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::metadata::value::{MetadataMap, Node, Scalar};
use crate::metadata::{mime, Loader, LoaderError};

pub struct FileLoader;

fn leaf(map: &mut MetadataMap, key: &str, value: impl Into<Scalar>) {
	map.insert(key.to_string(), Node::Leaf(value.into()));
}

#[cfg(unix)]
fn mode_string(mode: u32, is_dir: bool) -> String {
	let mut out = String::with_capacity(10);
	out.push(if is_dir { 'd' } else { '-' });

	for shift in [6u32, 3, 0] {
		let bits = (mode >> shift) & 0o7;
		out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
		out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
		out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
	}

	out
}

#[async_trait]
impl Loader for FileLoader {
	fn name(&self) -> &'static str {
		"file"
	}

	fn for_path(&self, _path: &Path) -> Option<Box<dyn Loader>> {
		Some(Box::new(FileLoader))
	}

	async fn load_metadata(&self, path: &Path) -> Result<MetadataMap, LoaderError> {
		let stat = tokio::fs::metadata(path).await?;
		let name = path
			.file_name()
			.map(|n| n.to_string_lossy().to_string())
			.unwrap_or_default();
		let hidden = name.starts_with('.');

		let mut map = MetadataMap::new();

		leaf(&mut map, "file.name", name.clone());
		leaf(&mut map, "file.permissions.regular", stat.is_file());
		leaf(&mut map, "file.permissions.directory", stat.is_dir());
		leaf(&mut map, "file.permissions.hidden", hidden);

		if let Ok(modified) = stat.modified() {
			let modified: DateTime<Utc> = modified.into();
			leaf(&mut map, "file.modified_at", modified.to_rfc3339());
		}

		#[cfg(unix)]
		{
			use std::os::unix::fs::{FileTypeExt, MetadataExt};

			let mode = stat.mode();
			leaf(&mut map, "file.permissions.mode", (mode & 0o777) as i64);
			leaf(&mut map, "file.permissions.string", mode_string(mode, stat.is_dir()));

			let file_type = stat.file_type();
			for (label, is_set) in [
				("device", file_type.is_block_device()),
				("character", file_type.is_char_device()),
				("pipe", file_type.is_fifo()),
				("socket", file_type.is_socket()),
			] {
				if is_set {
					leaf(&mut map, &format!("file.permissions.{label}"), true);
				}
			}
		}

		if !stat.is_dir() {
			if let Some(mime) = mime::lookup(path) {
				leaf(&mut map, "file.mime.type", mime.essence);
				leaf(&mut map, "file.mime.major", mime.major);
				leaf(&mut map, "file.mime.minor", mime.minor);
			}

			leaf(&mut map, "file.size", stat.len());

			if hidden {
				leaf(&mut map, "file.hidden", true);
			} else if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
				leaf(&mut map, "file.extension", extension.to_string());
			}
		}

		Ok(map)
	}
}

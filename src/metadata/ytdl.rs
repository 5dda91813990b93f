//! External-tool descriptor loader for `<file>.info.json` companions.
//!
//! Download tools in the youtube-dl family leave a JSON descriptor next to
//! each file; a curated subset of its top-level fields is lifted into the
//! `ytdl` namespace.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;

use crate::metadata::value::{MetadataMap, Node, Scalar};
use crate::metadata::{Loader, LoaderError};

const COMPANION_SUFFIX: &str = ".info.json";

const LIFTED_FIELDS: &[&str] = &[
	"id",
	"title",
	"description",
	"uploader",
	"uploader_id",
	"channel",
	"upload_date",
	"duration",
	"width",
	"height",
	"fps",
	"ext",
	"extractor",
	"webpage_url",
	"view_count",
	"like_count",
];

#[derive(Default)]
pub struct YtdlLoader {
	companion: Option<PathBuf>,
}

fn scalar_of(value: &Value) -> Option<Scalar> {
	match value {
		Value::Bool(b) => Some(Scalar::Bool(*b)),
		Value::Number(n) => {
			if let Some(i) = n.as_i64() {
				Some(Scalar::Int(i))
			} else {
				n.as_f64().map(Scalar::Float)
			}
		}
		Value::String(s) if !s.is_empty() => Some(Scalar::String(s.clone())),
		_ => None,
	}
}

#[async_trait]
impl Loader for YtdlLoader {
	fn name(&self) -> &'static str {
		"ytdl"
	}

	fn for_path(&self, path: &Path) -> Option<Box<dyn Loader>> {
		let mut companion = path.as_os_str().to_owned();
		companion.push(COMPANION_SUFFIX);
		let companion = PathBuf::from(companion);

		companion.is_file().then(|| {
			Box::new(YtdlLoader {
				companion: Some(companion),
			}) as Box<dyn Loader>
		})
	}

	async fn load_metadata(&self, _path: &Path) -> Result<MetadataMap, LoaderError> {
		let Some(companion) = &self.companion else {
			return Ok(MetadataMap::new());
		};

		let contents = tokio::fs::read_to_string(companion).await?;
		let document: Value = serde_json::from_str(&contents)?;

		let mut map = MetadataMap::new();

		if let Value::Object(fields) = document {
			for field in LIFTED_FIELDS {
				if let Some(scalar) = fields.get(*field).and_then(scalar_of) {
					map.insert(format!("ytdl.{field}"), Node::Leaf(scalar));
				}
			}
		}

		Ok(map)
	}
}

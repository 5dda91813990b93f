//! Audio tag loader.
//!
//! Runs in the content pass: tags are read from the file itself, so this is
//! the expensive loader and shares its pass with checksum generation.

use std::path::Path;

use async_trait::async_trait;
use lofty::{Accessor, AudioFile, TaggedFileExt};

use crate::metadata::value::{MetadataMap, Node, Scalar};
use crate::metadata::{mime, Loader, LoaderError};

pub struct AudioLoader;

fn leaf(map: &mut MetadataMap, key: &str, value: impl Into<Scalar>) {
	map.insert(key.to_string(), Node::Leaf(value.into()));
}

#[async_trait]
impl Loader for AudioLoader {
	fn name(&self) -> &'static str {
		"audio"
	}

	fn for_path(&self, path: &Path) -> Option<Box<dyn Loader>> {
		let mime = mime::lookup(path)?;
		(mime.major == "audio").then(|| Box::new(AudioLoader) as Box<dyn Loader>)
	}

	async fn load_metadata(&self, path: &Path) -> Result<MetadataMap, LoaderError> {
		let path = path.to_path_buf();

		let tagged = tokio::task::spawn_blocking(move || lofty::read_from_path(&path))
			.await
			.map_err(|err| LoaderError::Io(std::io::Error::new(std::io::ErrorKind::Other, err)))??;

		let mut map = MetadataMap::new();

		if let Some(tag) = tagged.primary_tag() {
			if let Some(title) = tag.title() {
				leaf(&mut map, "audio.title", title.to_string());
			}

			if let Some(artist) = tag.artist() {
				leaf(&mut map, "audio.artist", artist.to_string());
			}

			if let Some(album) = tag.album() {
				leaf(&mut map, "audio.album", album.to_string());
			}

			if let Some(genre) = tag.genre() {
				leaf(&mut map, "audio.genre", genre.to_string());
			}

			if let Some(track) = tag.track() {
				leaf(&mut map, "audio.track", track as i64);
			}

			if let Some(year) = tag.year() {
				leaf(&mut map, "audio.year", year as i64);
			}
		}

		let properties = tagged.properties();

		leaf(
			&mut map,
			"audio.duration_seconds",
			properties.duration().as_secs() as i64,
		);

		if let Some(bitrate) = properties.audio_bitrate() {
			leaf(&mut map, "audio.bitrate", bitrate as i64);
		}

		if let Some(sample_rate) = properties.sample_rate() {
			leaf(&mut map, "audio.sample_rate", sample_rate as i64);
		}

		if let Some(channels) = properties.channels() {
			leaf(&mut map, "audio.channels", channels as i64);
		}

		Ok(map)
	}
}

//! Sidecar media descriptor loader.
//!
//! Media files are described by an adjacent `<stem>.nfo` XML document; a
//! directory-level `tvshow.nfo` describes the show an episode belongs to
//! and is folded in under `media.show.*`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;

use crate::metadata::value::{MetadataMap, Node, Scalar};
use crate::metadata::{Loader, LoaderError};

const SHOW_DESCRIPTOR: &str = "tvshow.nfo";

#[derive(Default)]
pub struct MediaLoader {
	descriptor: Option<PathBuf>,
}

#[derive(Deserialize)]
struct NfoEpisode {
	title: Option<String>,
	season: Option<i64>,
	episode: Option<i64>,
	aired: Option<String>,
	plot: Option<String>,
	rating: Option<f64>,
	runtime: Option<i64>,
	director: Option<String>,
	#[serde(rename = "displayseason")]
	display_season: Option<String>,
	#[serde(rename = "displayepisode")]
	display_episode: Option<String>,
	#[serde(rename = "showtitle")]
	show_title: Option<String>,
	thumb: Option<String>,
	watched: Option<bool>,
	id: Option<i64>,
}

#[derive(Deserialize)]
struct NfoMovie {
	title: Option<String>,
	#[serde(rename = "originaltitle")]
	original_title: Option<String>,
	tagline: Option<String>,
	plot: Option<String>,
	mpaa: Option<String>,
	aired: Option<String>,
	director: Option<String>,
	#[serde(default)]
	genre: Vec<String>,
	id: Option<i64>,
}

#[derive(Deserialize)]
struct NfoTvShow {
	title: Option<String>,
	#[serde(default)]
	genre: Vec<String>,
	mpaa: Option<String>,
	plot: Option<String>,
	aired: Option<String>,
	rating: Option<f64>,
	studio: Option<String>,
}

fn leaf(map: &mut MetadataMap, key: &str, value: impl Into<Scalar>) {
	map.insert(key.to_string(), Node::Leaf(value.into()));
}

fn leaf_opt(map: &mut MetadataMap, key: &str, value: Option<impl Into<Scalar>>) {
	if let Some(value) = value {
		leaf(map, key, value);
	}
}

/// The name of the document's root element, used to pick a descriptor
/// flavour before deserializing.
fn root_element(xml: &str) -> Option<String> {
	let mut reader = quick_xml::Reader::from_str(xml);

	loop {
		match reader.read_event() {
			Ok(quick_xml::events::Event::Start(start)) => {
				return Some(String::from_utf8_lossy(start.local_name().as_ref()).into_owned());
			}
			Ok(quick_xml::events::Event::Empty(start)) => {
				return Some(String::from_utf8_lossy(start.local_name().as_ref()).into_owned());
			}
			Ok(quick_xml::events::Event::Eof) | Err(_) => return None,
			_ => {}
		}
	}
}

impl MediaLoader {
	/// Locate the descriptor for a path: the path itself when it is a show
	/// descriptor, otherwise the sibling `<stem>.nfo`.
	fn descriptor_for(path: &Path) -> Option<PathBuf> {
		let name = path.file_name()?;

		if name == SHOW_DESCRIPTOR {
			return Some(path.to_path_buf());
		}

		if path.extension().map(|e| e == "nfo").unwrap_or(false) {
			return None;
		}

		Some(path.with_extension("nfo"))
	}

	fn parse_descriptor<'a>(
		&'a self,
		path: &'a Path,
	) -> futures::future::BoxFuture<'a, Result<MetadataMap, LoaderError>> {
		Box::pin(async move {
			let contents = tokio::fs::read_to_string(path).await?;

			let mut media = MetadataMap::new();

			match root_element(&contents).as_deref() {
				Some("episodedetails") => {
					let ep: NfoEpisode = quick_xml::de::from_str(&contents)?;

					// include the enclosing show's details when available
					if let Some(dir) = path.parent() {
						let show_path = dir.join(SHOW_DESCRIPTOR);

						if show_path != path && show_path.is_file() {
							if let Ok(show) = self.parse_descriptor(&show_path).await {
								media.insert("show".into(), Node::Branch(show));
							}
						}
					}

					leaf(&mut media, "type", "episode");
					leaf_opt(&mut media, "title", ep.title);
					leaf_opt(&mut media, "season", ep.season);
					leaf_opt(&mut media, "episode", ep.episode);
					leaf_opt(&mut media, "aired", ep.aired);
					leaf_opt(&mut media, "plot", ep.plot);
					leaf_opt(&mut media, "rating", ep.rating.map(Scalar::Float));
					leaf_opt(&mut media, "runtime", ep.runtime);
					leaf_opt(&mut media, "director", ep.director);
					leaf_opt(&mut media, "display_season", ep.display_season);
					leaf_opt(&mut media, "display_episode", ep.display_episode);
					leaf_opt(&mut media, "show_title", ep.show_title);
					leaf_opt(&mut media, "thumbnail", ep.thumb);
					leaf_opt(&mut media, "watched", ep.watched);
					leaf_opt(&mut media, "id", ep.id);
				}
				Some("movie") => {
					let movie: NfoMovie = quick_xml::de::from_str(&contents)?;

					leaf(&mut media, "type", "movie");
					leaf_opt(&mut media, "title", movie.title);
					leaf_opt(&mut media, "original_title", movie.original_title);
					leaf_opt(&mut media, "tagline", movie.tagline);
					leaf_opt(&mut media, "plot", movie.plot);
					leaf_opt(&mut media, "mpaa", movie.mpaa);
					leaf_opt(&mut media, "premiered", movie.aired);
					leaf_opt(&mut media, "director", movie.director);
					leaf_opt(&mut media, "id", movie.id);

					if !movie.genre.is_empty() {
						leaf(&mut media, "genres", movie.genre.join(", "));
					}
				}
				Some("tvshow") => {
					let show: NfoTvShow = quick_xml::de::from_str(&contents)?;

					leaf(&mut media, "type", "tvshow");
					leaf_opt(&mut media, "title", show.title);
					leaf_opt(&mut media, "mpaa", show.mpaa);
					leaf_opt(&mut media, "plot", show.plot);
					leaf_opt(&mut media, "premiered", show.aired);
					leaf_opt(&mut media, "rating", show.rating.map(Scalar::Float));
					leaf_opt(&mut media, "studio", show.studio);

					if !show.genre.is_empty() {
						leaf(&mut media, "genres", show.genre.join(", "));
					}
				}
				_ => {
					return Err(LoaderError::UnrecognizedDescriptor(
						path.display().to_string(),
					));
				}
			}

			Ok(media)
		})
	}
}

#[async_trait]
impl Loader for MediaLoader {
	fn name(&self) -> &'static str {
		"media"
	}

	fn for_path(&self, path: &Path) -> Option<Box<dyn Loader>> {
		let descriptor = Self::descriptor_for(path)?;

		descriptor.is_file().then(|| {
			Box::new(MediaLoader {
				descriptor: Some(descriptor),
			}) as Box<dyn Loader>
		})
	}

	async fn load_metadata(&self, _path: &Path) -> Result<MetadataMap, LoaderError> {
		let Some(descriptor) = &self.descriptor else {
			return Ok(MetadataMap::new());
		};

		let media = self.parse_descriptor(descriptor).await?;

		let mut map = MetadataMap::new();
		map.insert("media".into(), Node::Branch(media));

		Ok(map)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::metadata::value::deep_get;

	const EPISODE_NFO: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<episodedetails>
	<title>Pilot</title>
	<season>1</season>
	<episode>3</episode>
	<rating>7.5</rating>
	<showtitle>Some Show</showtitle>
</episodedetails>"#;

	const SHOW_NFO: &str = r#"<tvshow>
	<title>Some Show</title>
	<genre>Drama</genre>
	<genre>Comedy</genre>
	<studio>NET</studio>
</tvshow>"#;

	const MOVIE_NFO: &str = r#"<movie>
	<title>A Film</title>
	<tagline>See it</tagline>
	<genre>Action</genre>
</movie>"#;

	#[tokio::test]
	async fn episode_descriptor_includes_show_context() {
		let dir = tempfile::tempdir().expect("tempdir");
		let video = dir.path().join("s01e03.mkv");

		tokio::fs::write(&video, b"video").await.expect("write");
		tokio::fs::write(dir.path().join("s01e03.nfo"), EPISODE_NFO)
			.await
			.expect("write nfo");
		tokio::fs::write(dir.path().join("tvshow.nfo"), SHOW_NFO)
			.await
			.expect("write show nfo");

		let loader = MediaLoader::default().for_path(&video).expect("descriptor found");
		let map = loader.load_metadata(&video).await.expect("load");

		assert_eq!(deep_get(&map, "media.type"), Some(&Scalar::from("episode")));
		assert_eq!(deep_get(&map, "media.title"), Some(&Scalar::from("Pilot")));
		assert_eq!(deep_get(&map, "media.season"), Some(&Scalar::Int(1)));
		assert_eq!(deep_get(&map, "media.rating"), Some(&Scalar::Float(7.5)));
		assert_eq!(
			deep_get(&map, "media.show.title"),
			Some(&Scalar::from("Some Show"))
		);
		assert_eq!(
			deep_get(&map, "media.show.genres"),
			Some(&Scalar::from("Drama, Comedy"))
		);
	}

	#[tokio::test]
	async fn movie_descriptor() {
		let dir = tempfile::tempdir().expect("tempdir");
		let video = dir.path().join("film.mp4");

		tokio::fs::write(&video, b"video").await.expect("write");
		tokio::fs::write(dir.path().join("film.nfo"), MOVIE_NFO)
			.await
			.expect("write nfo");

		let loader = MediaLoader::default().for_path(&video).expect("descriptor found");
		let map = loader.load_metadata(&video).await.expect("load");

		assert_eq!(deep_get(&map, "media.type"), Some(&Scalar::from("movie")));
		assert_eq!(deep_get(&map, "media.tagline"), Some(&Scalar::from("See it")));
		assert_eq!(deep_get(&map, "media.genres"), Some(&Scalar::from("Action")));
	}

	#[tokio::test]
	async fn does_not_apply_without_a_descriptor() {
		let dir = tempfile::tempdir().expect("tempdir");
		let video = dir.path().join("plain.mp4");
		tokio::fs::write(&video, b"video").await.expect("write");

		assert!(MediaLoader::default().for_path(&video).is_none());
	}

	#[tokio::test]
	async fn rejects_unknown_descriptor_roots() {
		let dir = tempfile::tempdir().expect("tempdir");
		let video = dir.path().join("thing.mp4");

		tokio::fs::write(&video, b"video").await.expect("write");
		tokio::fs::write(dir.path().join("thing.nfo"), "<unrelated/>")
			.await
			.expect("write nfo");

		let loader = MediaLoader::default().for_path(&video).expect("descriptor found");

		assert!(matches!(
			loader.load_metadata(&video).await,
			Err(LoaderError::UnrecognizedDescriptor(_))
		));
	}
}

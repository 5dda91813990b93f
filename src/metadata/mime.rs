//! Extension-based mimetype registry.
//!
//! Kept deliberately table-driven; the catalogue only needs stable
//! major/minor classification, not content sniffing.

use std::collections::HashMap;
use std::path::Path;

use once_cell::sync::Lazy;

use crate::domain::entry::EntryType;

static MIME_TYPES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
	HashMap::from([
		// audio
		("aac", "audio/aac"),
		("aiff", "audio/x-aiff"),
		("flac", "audio/flac"),
		("m4a", "audio/mp4"),
		("mid", "audio/midi"),
		("mp3", "audio/mpeg"),
		("oga", "audio/ogg"),
		("ogg", "audio/ogg"),
		("opus", "audio/opus"),
		("wav", "audio/x-wav"),
		("wma", "audio/x-ms-wma"),
		// video
		("3gp", "video/3gpp"),
		("avi", "video/x-msvideo"),
		("flv", "video/x-flv"),
		("m4v", "video/x-m4v"),
		("mkv", "video/x-matroska"),
		("mov", "video/quicktime"),
		("mp4", "video/mp4"),
		("mpeg", "video/mpeg"),
		("mpg", "video/mpeg"),
		("ts", "video/mp2t"),
		("webm", "video/webm"),
		("wmv", "video/x-ms-wmv"),
		// image
		("avif", "image/avif"),
		("bmp", "image/bmp"),
		("gif", "image/gif"),
		("heic", "image/heic"),
		("ico", "image/vnd.microsoft.icon"),
		("jpeg", "image/jpeg"),
		("jpg", "image/jpeg"),
		("png", "image/png"),
		("svg", "image/svg+xml"),
		("tif", "image/tiff"),
		("tiff", "image/tiff"),
		("webp", "image/webp"),
		// text and code
		("c", "text/x-csrc"),
		("cpp", "text/x-c++src"),
		("css", "text/css"),
		("csv", "text/csv"),
		("h", "text/x-chdr"),
		("hpp", "text/x-c++hdr"),
		("htm", "text/html"),
		("html", "text/html"),
		("java", "text/x-java"),
		("js", "application/javascript"),
		("json", "application/json"),
		("md", "text/markdown"),
		("mjs", "application/javascript"),
		("pas", "text/x-pascal"),
		("pl", "text/x-perl"),
		("py", "text/x-python"),
		("rb", "text/x-ruby"),
		("sh", "text/x-sh"),
		("sql", "application/x-sql"),
		("tcl", "text/x-tcl"),
		("tex", "text/x-tex"),
		("txt", "text/plain"),
		("xml", "application/xml"),
		("yaml", "application/x-yaml"),
		("yml", "application/x-yaml"),
		// documents and archives
		("7z", "application/x-7z-compressed"),
		("bz2", "application/x-bzip2"),
		("doc", "application/msword"),
		("epub", "application/epub+zip"),
		("gz", "application/gzip"),
		("pdf", "application/pdf"),
		("rar", "application/vnd.rar"),
		("tar", "application/x-tar"),
		("zip", "application/zip"),
	])
});

const CODE_MINORS: &[&str] = &[
	"ecmascript",
	"html",
	"javascript",
	"scriptlet",
	"vrml",
	"x-c++hdr",
	"x-c++src",
	"x-chdr",
	"x-csrc",
	"x-dsrc",
	"x-java",
	"x-moc",
	"x-pascal",
	"x-perl",
	"x-python",
	"x-ruby",
	"x-sh",
	"x-sql",
	"x-tcl",
	"x-tex-pk",
	"x-tex",
	"x-vrml",
];

/// A resolved mimetype split into its major and minor parts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MimeType {
	pub essence: &'static str,
	pub major: &'static str,
	pub minor: &'static str,
}

/// Resolve a path's mimetype from its extension.
pub fn lookup(path: impl AsRef<Path>) -> Option<MimeType> {
	let extension = path.as_ref().extension()?.to_str()?.to_lowercase();
	let essence = *MIME_TYPES.get(extension.as_str())?;
	let (major, minor) = essence.split_once('/')?;

	Some(MimeType { essence, major, minor })
}

/// Classify a path into the coarse entry types the catalogue stores.
pub fn general_file_type(path: impl AsRef<Path>) -> EntryType {
	let Some(mime) = lookup(path) else {
		return EntryType::File;
	};

	match mime.major {
		"audio" => EntryType::Audio,
		"video" => EntryType::Video,
		"image" => EntryType::Image,
		_ if CODE_MINORS.contains(&mime.minor) => EntryType::Code,
		_ => EntryType::File,
	}
}

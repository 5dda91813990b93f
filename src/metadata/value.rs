//! Nested metadata trees with dot-diffused keys.
//!
//! Loaders return flat-ish maps whose keys may contain `.` separators; the
//! scanner diffuses those into a nested tree before merging them into an
//! entry, keeping only non-empty leaves.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A typed scalar stored at the leaves of a metadata tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
	Bool(bool),
	Int(i64),
	Float(f64),
	String(String),
}

impl Scalar {
	/// Parse a string into the narrowest scalar that can represent it.
	pub fn autotype(value: &str) -> Scalar {
		if let Ok(b) = value.parse::<bool>() {
			return Scalar::Bool(b);
		}

		if let Ok(i) = value.parse::<i64>() {
			return Scalar::Int(i);
		}

		if let Ok(f) = value.parse::<f64>() {
			return Scalar::Float(f);
		}

		Scalar::String(value.to_string())
	}

	pub fn is_empty(&self) -> bool {
		match self {
			Scalar::String(s) => s.is_empty(),
			_ => false,
		}
	}

	fn as_f64(&self) -> Option<f64> {
		match self {
			Scalar::Int(i) => Some(*i as f64),
			Scalar::Float(f) => Some(*f),
			Scalar::String(s) => s.parse::<f64>().ok(),
			Scalar::Bool(_) => None,
		}
	}

	fn as_bool(&self) -> Option<bool> {
		match self {
			Scalar::Bool(b) => Some(*b),
			Scalar::String(s) => s.parse::<bool>().ok(),
			_ => None,
		}
	}

	/// Relaxed equality with numeric and boolean cross-type coercion:
	/// `0 == "0"`, `true == "true"`, but `0 != false` and string comparison
	/// stays case sensitive.
	pub fn relaxed_eq(a: Option<&Scalar>, b: Option<&Scalar>) -> bool {
		match (a, b) {
			(None, None) => true,
			(None, Some(_)) | (Some(_), None) => false,
			(Some(a), Some(b)) => {
				if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
					return x == y;
				}

				if let (Some(x), Some(y)) = (a.as_bool(), b.as_bool()) {
					return x == y;
				}

				a.render() == b.render()
			}
		}
	}

	/// Render the scalar the way it compares and serializes into manifests.
	pub fn render(&self) -> String {
		match self {
			Scalar::Bool(b) => b.to_string(),
			Scalar::Int(i) => i.to_string(),
			Scalar::Float(f) => f.to_string(),
			Scalar::String(s) => s.clone(),
		}
	}

	/// Ordering used by store sorts; scalars of different kinds compare by
	/// their rendered form.
	pub fn compare(&self, other: &Scalar) -> Ordering {
		match (self.as_f64(), other.as_f64()) {
			(Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
			_ => self.render().cmp(&other.render()),
		}
	}
}

impl From<&str> for Scalar {
	fn from(value: &str) -> Self {
		Scalar::String(value.to_string())
	}
}

impl From<String> for Scalar {
	fn from(value: String) -> Self {
		Scalar::String(value)
	}
}

impl From<bool> for Scalar {
	fn from(value: bool) -> Self {
		Scalar::Bool(value)
	}
}

impl From<i64> for Scalar {
	fn from(value: i64) -> Self {
		Scalar::Int(value)
	}
}

impl From<u64> for Scalar {
	fn from(value: u64) -> Self {
		Scalar::Int(value as i64)
	}
}

/// One node of a metadata tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Node {
	Branch(MetadataMap),
	Leaf(Scalar),
}

/// A nested metadata mapping keyed by loader namespace.
pub type MetadataMap = BTreeMap<String, Node>;

/// Expand dot-separated keys into nested branches. `{"a.b": 1}` becomes
/// `{"a": {"b": 1}}`; already-nested branches are diffused recursively.
pub fn diffuse(map: MetadataMap) -> MetadataMap {
	let mut out = MetadataMap::new();

	for (key, node) in map {
		let node = match node {
			Node::Branch(inner) => Node::Branch(diffuse(inner)),
			leaf => leaf,
		};

		let path = key.split('.').collect::<Vec<_>>();
		deep_set(&mut out, &path, node);
	}

	out
}

/// Set a node at a `/`-free key path, creating intermediate branches. An
/// existing leaf in the way is replaced by a branch.
pub fn deep_set(map: &mut MetadataMap, path: &[&str], node: Node) {
	let Some((head, rest)) = path.split_first() else {
		return;
	};

	if rest.is_empty() {
		map.insert((*head).to_string(), node);
		return;
	}

	let slot = map
		.entry((*head).to_string())
		.or_insert_with(|| Node::Branch(MetadataMap::new()));

	if !matches!(slot, Node::Branch(_)) {
		*slot = Node::Branch(MetadataMap::new());
	}

	if let Node::Branch(inner) = slot {
		deep_set(inner, rest, node);
	}
}

/// Fetch the leaf at a dot-separated key path.
pub fn deep_get<'a>(map: &'a MetadataMap, key: &str) -> Option<&'a Scalar> {
	let mut current = map;
	let mut parts = key.split('.').peekable();

	while let Some(part) = parts.next() {
		match current.get(part)? {
			Node::Leaf(scalar) => {
				return parts.peek().is_none().then_some(scalar);
			}
			Node::Branch(inner) => current = inner,
		}
	}

	None
}

/// Visit every leaf of the tree in key order.
pub fn walk(map: &MetadataMap, visit: &mut impl FnMut(&[String], &Scalar)) {
	fn inner(map: &MetadataMap, prefix: &mut Vec<String>, visit: &mut impl FnMut(&[String], &Scalar)) {
		for (key, node) in map {
			prefix.push(key.clone());

			match node {
				Node::Leaf(scalar) => visit(prefix, scalar),
				Node::Branch(inner_map) => inner(inner_map, prefix, visit),
			}

			prefix.pop();
		}
	}

	inner(map, &mut Vec::new(), visit);
}

/// Merge every non-empty leaf of `src` into `dst`, deep-setting by path.
pub fn merge_non_empty(dst: &mut MetadataMap, src: &MetadataMap) {
	let mut leaves = Vec::new();

	walk(src, &mut |path, scalar| {
		if !scalar.is_empty() {
			leaves.push((path.to_vec(), scalar.clone()));
		}
	});

	for (path, scalar) in leaves {
		let parts = path.iter().map(String::as_str).collect::<Vec<_>>();
		deep_set(dst, &parts, Node::Leaf(scalar));
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn leaf(s: impl Into<Scalar>) -> Node {
		Node::Leaf(s.into())
	}

	#[test]
	fn autotype_narrows() {
		assert_eq!(Scalar::autotype("true"), Scalar::Bool(true));
		assert_eq!(Scalar::autotype("42"), Scalar::Int(42));
		assert_eq!(Scalar::autotype("4.5"), Scalar::Float(4.5));
		assert_eq!(Scalar::autotype("s01e02"), Scalar::String("s01e02".into()));
	}

	#[test]
	fn diffuse_expands_dotted_keys() {
		let mut flat = MetadataMap::new();
		flat.insert("file.mime.major".into(), leaf("audio"));
		flat.insert("file.size".into(), leaf(42i64));
		flat.insert("plain".into(), leaf("x"));

		let tree = diffuse(flat);

		assert_eq!(deep_get(&tree, "file.mime.major"), Some(&Scalar::from("audio")));
		assert_eq!(deep_get(&tree, "file.size"), Some(&Scalar::Int(42)));
		assert_eq!(deep_get(&tree, "plain"), Some(&Scalar::from("x")));
		assert_eq!(deep_get(&tree, "file.mime"), None);
		assert_eq!(deep_get(&tree, "missing.key"), None);
	}

	#[test]
	fn merge_skips_empty_leaves() {
		let mut dst = MetadataMap::new();

		let mut src = MetadataMap::new();
		src.insert("a".into(), leaf(""));
		src.insert("b".into(), leaf("kept"));

		merge_non_empty(&mut dst, &src);

		assert_eq!(deep_get(&dst, "a"), None);
		assert_eq!(deep_get(&dst, "b"), Some(&Scalar::from("kept")));
	}

	#[test]
	fn walk_visits_leaves_with_paths() {
		let mut flat = MetadataMap::new();
		flat.insert("media.show.title".into(), leaf("t"));
		flat.insert("media.episode".into(), leaf(3i64));
		let tree = diffuse(flat);

		let mut seen = Vec::new();
		walk(&tree, &mut |path, _| seen.push(path.join(".")));

		assert_eq!(seen, vec!["media.episode", "media.show.title"]);
	}

	#[test]
	fn relaxed_equality() {
		use Scalar::*;

		assert!(Scalar::relaxed_eq(Some(&Int(0)), Some(&String("0".into()))));
		assert!(Scalar::relaxed_eq(Some(&String("0".into())), Some(&Int(0))));
		assert!(Scalar::relaxed_eq(Some(&Bool(true)), Some(&String("true".into()))));
		assert!(Scalar::relaxed_eq(None, None));

		assert!(!Scalar::relaxed_eq(Some(&Bool(true)), None));
		assert!(!Scalar::relaxed_eq(None, Some(&Int(123))));
		assert!(!Scalar::relaxed_eq(Some(&Int(0)), Some(&Bool(false))));
		assert!(!Scalar::relaxed_eq(
			Some(&String("tester".into())),
			Some(&String("Tester".into()))
		));
	}

	#[test]
	fn serializes_as_plain_nested_json() {
		let mut flat = MetadataMap::new();
		flat.insert("file.size".into(), leaf(42i64));
		let tree = diffuse(flat);

		let json = serde_json::to_string(&tree).expect("serialize");
		assert_eq!(json, r#"{"file":{"size":42}}"#);

		let back: MetadataMap = serde_json::from_str(&json).expect("deserialize");
		assert_eq!(back, tree);
	}
}

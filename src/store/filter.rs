//! Typed filter expressions and their string-encoded form.
//!
//! The mini-language uses `/` between criteria, `=` between a field and its
//! spec, `is:`/`not:` operator prefixes and `|`-separated value lists:
//! `root_group=is:music/group=is:true`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::entry::Entry;
use crate::metadata::value::Scalar;

pub const CRITERIA_SEPARATOR: char = '/';
pub const TERM_SEPARATOR: char = '=';
pub const VALUE_SEPARATOR: char = '|';

#[derive(Error, Debug)]
pub enum FilterError {
	#[error("invalid filter criterion {0:?}")]
	InvalidCriterion(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
	Is,
	Not,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
	pub field: String,
	pub op: Comparison,
	pub values: Vec<Scalar>,
}

impl Criterion {
	fn matches(&self, entry: &Entry) -> bool {
		let field = entry.field(&self.field);
		let any = self
			.values
			.iter()
			.any(|value| Scalar::relaxed_eq(field.as_ref(), Some(value)));

		match self.op {
			Comparison::Is => any,
			Comparison::Not => !any,
		}
	}

	fn encode(&self) -> String {
		let op = match self.op {
			Comparison::Is => "is",
			Comparison::Not => "not",
		};

		let values = self
			.values
			.iter()
			.map(Scalar::render)
			.collect::<Vec<_>>()
			.join(&VALUE_SEPARATOR.to_string());

		format!("{}{}{}:{}", self.field, TERM_SEPARATOR, op, values)
	}
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Expr {
	All,
	Conjunction(Vec<Criterion>),
}

/// A filter expression plus the projection, limit and sort options a store
/// may honour.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Filter {
	pub expr: Expr,

	/// Fields the caller needs back; an empty list means all of them.
	#[serde(default)]
	pub fields: Vec<String>,

	#[serde(default)]
	pub limit: Option<usize>,

	/// Sort fields, `-`-prefixed for descending.
	#[serde(default)]
	pub sort: Vec<String>,
}

impl Filter {
	pub fn all() -> Filter {
		Filter {
			expr: Expr::All,
			fields: Vec::new(),
			limit: None,
			sort: Vec::new(),
		}
	}

	/// Conjunction of `field == value` terms.
	pub fn where_all(terms: impl IntoIterator<Item = (String, Scalar)>) -> Filter {
		let criteria = terms
			.into_iter()
			.map(|(field, value)| Criterion {
				field,
				op: Comparison::Is,
				values: vec![value],
			})
			.collect();

		Filter {
			expr: Expr::Conjunction(criteria),
			..Filter::all()
		}
	}

	pub fn and(mut self, field: impl Into<String>, value: impl Into<Scalar>) -> Filter {
		self.push(Criterion {
			field: field.into(),
			op: Comparison::Is,
			values: vec![value.into()],
		});
		self
	}

	pub fn and_not(mut self, field: impl Into<String>, values: Vec<Scalar>) -> Filter {
		self.push(Criterion {
			field: field.into(),
			op: Comparison::Not,
			values,
		});
		self
	}

	fn push(&mut self, criterion: Criterion) {
		match &mut self.expr {
			Expr::Conjunction(criteria) => criteria.push(criterion),
			Expr::All => self.expr = Expr::Conjunction(vec![criterion]),
		}
	}

	pub fn with_limit(mut self, limit: usize) -> Filter {
		self.limit = Some(limit);
		self
	}

	pub fn with_sort<S: Into<String>>(mut self, sort: impl IntoIterator<Item = S>) -> Filter {
		self.sort = sort.into_iter().map(Into::into).collect();
		self
	}

	pub fn with_fields<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Filter {
		self.fields = fields.into_iter().map(Into::into).collect();
		self
	}

	/// Parse the string form. `all` selects everything.
	pub fn parse(spec: &str) -> Result<Filter, FilterError> {
		if spec == "all" {
			return Ok(Filter::all());
		}

		let mut criteria = Vec::new();

		for term in spec.split(CRITERIA_SEPARATOR) {
			if term.is_empty() {
				continue;
			}

			let (field, rest) = term
				.split_once(TERM_SEPARATOR)
				.ok_or_else(|| FilterError::InvalidCriterion(term.to_string()))?;

			let (op, raw_values) = match rest.split_once(':') {
				Some(("is", values)) => (Comparison::Is, values),
				Some(("not", values)) => (Comparison::Not, values),
				_ => (Comparison::Is, rest),
			};

			criteria.push(Criterion {
				field: field.to_string(),
				op,
				values: raw_values
					.split(VALUE_SEPARATOR)
					.map(Scalar::autotype)
					.collect(),
			});
		}

		if criteria.is_empty() {
			return Err(FilterError::InvalidCriterion(spec.to_string()));
		}

		Ok(Filter {
			expr: Expr::Conjunction(criteria),
			..Filter::all()
		})
	}

	/// The canonical string form of the expression.
	pub fn to_query_string(&self) -> String {
		match &self.expr {
			Expr::All => "all".to_string(),
			Expr::Conjunction(criteria) => criteria
				.iter()
				.map(Criterion::encode)
				.collect::<Vec<_>>()
				.join(&CRITERIA_SEPARATOR.to_string()),
		}
	}

	/// Whether an entry satisfies the expression (projection, limit and sort
	/// are applied by the store, not here).
	pub fn matches(&self, entry: &Entry) -> bool {
		match &self.expr {
			Expr::All => true,
			Expr::Conjunction(criteria) => criteria.iter().all(|c| c.matches(entry)),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn entry(id: &str, parent: &str, group: bool) -> Entry {
		let mut entry = Entry::new("music", "/srv/music", format!("/srv/music/{id}"));
		entry.parent = parent.to_string();
		entry.is_group = group;
		entry
	}

	#[test]
	fn parses_operators_and_value_lists() {
		let filter = Filter::parse("root_group=is:music/parent=not:a|b").expect("parse");

		let Expr::Conjunction(criteria) = &filter.expr else {
			panic!("expected conjunction");
		};

		assert_eq!(criteria.len(), 2);
		assert_eq!(criteria[0].op, Comparison::Is);
		assert_eq!(criteria[1].op, Comparison::Not);
		assert_eq!(criteria[1].values.len(), 2);
	}

	#[test]
	fn implicit_operator_is_equality() {
		let filter = Filter::parse("parent=root").expect("parse");
		assert_eq!(filter.to_query_string(), "parent=is:root");
	}

	#[test]
	fn round_trips_through_string_form() {
		let filter = Filter::where_all([("root_group".to_string(), Scalar::from("music"))])
			.and_not("parent", vec![Scalar::from("a"), Scalar::from("b")]);

		let encoded = filter.to_query_string();
		assert_eq!(encoded, "root_group=is:music/parent=not:a|b");

		let reparsed = Filter::parse(&encoded).expect("reparse");
		assert_eq!(reparsed.to_query_string(), encoded);
	}

	#[test]
	fn all_matches_everything() {
		assert_eq!(Filter::parse("all").expect("parse").expr, Expr::All);
		assert!(Filter::all().matches(&entry("a.mp3", "root", false)));
	}

	#[test]
	fn matching_honours_operators() {
		let keep = Filter::where_all([("parent".to_string(), Scalar::from("root"))]);
		let drop = Filter::all().and_not("parent", vec![Scalar::from("root")]);

		let e = entry("a.mp3", "root", false);

		assert!(keep.matches(&e));
		assert!(!drop.matches(&e));
	}

	#[test]
	fn boolean_fields_coerce() {
		let filter = Filter::parse("group=is:true").expect("parse");

		assert!(filter.matches(&entry("dir", "root", true)));
		assert!(!filter.matches(&entry("file", "root", false)));
	}

	#[test]
	fn rejects_malformed_terms() {
		assert!(Filter::parse("no-separator").is_err());
		assert!(Filter::parse("").is_err());
	}
}

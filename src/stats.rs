//! Statistics sink contract.
//!
//! The catalogue emits counters, gauges and timings through this trait; the
//! embedding application wires it to statsd, a time-series store, or
//! nothing at all.

use std::time::{Duration, Instant};

pub type Tags<'a> = &'a [(&'a str, &'a str)];

pub trait StatsSink: Send + Sync {
	fn increment(&self, name: &str, tags: Tags<'_>);

	fn gauge(&self, name: &str, value: f64, tags: Tags<'_>);

	fn timing(&self, name: &str, elapsed: Duration, tags: Tags<'_>);
}

/// Discards every metric.
pub struct NullStats;

impl StatsSink for NullStats {
	fn increment(&self, _name: &str, _tags: Tags<'_>) {}

	fn gauge(&self, _name: &str, _value: f64, _tags: Tags<'_>) {}

	fn timing(&self, _name: &str, _elapsed: Duration, _tags: Tags<'_>) {}
}

/// Emits every metric as a trace event; handy in development.
pub struct LogStats;

impl StatsSink for LogStats {
	fn increment(&self, name: &str, tags: Tags<'_>) {
		tracing::trace!(metric = name, ?tags, "increment");
	}

	fn gauge(&self, name: &str, value: f64, tags: Tags<'_>) {
		tracing::trace!(metric = name, value, ?tags, "gauge");
	}

	fn timing(&self, name: &str, elapsed: Duration, tags: Tags<'_>) {
		tracing::trace!(metric = name, elapsed_ms = elapsed.as_millis() as u64, ?tags, "timing");
	}
}

/// Forwards to another sink with a set of base tags merged into every
/// metric; per-call tags win on name collisions downstream.
pub struct TaggedStats {
	inner: std::sync::Arc<dyn StatsSink>,
	base: Vec<(String, String)>,
}

impl TaggedStats {
	pub fn new(inner: std::sync::Arc<dyn StatsSink>, base: Vec<(String, String)>) -> TaggedStats {
		TaggedStats { inner, base }
	}

	fn merged<'a>(&'a self, tags: Tags<'a>) -> Vec<(&'a str, &'a str)> {
		self.base
			.iter()
			.map(|(k, v)| (k.as_str(), v.as_str()))
			.chain(tags.iter().copied())
			.collect()
	}
}

impl StatsSink for TaggedStats {
	fn increment(&self, name: &str, tags: Tags<'_>) {
		self.inner.increment(name, &self.merged(tags));
	}

	fn gauge(&self, name: &str, value: f64, tags: Tags<'_>) {
		self.inner.gauge(name, value, &self.merged(tags));
	}

	fn timing(&self, name: &str, elapsed: Duration, tags: Tags<'_>) {
		self.inner.timing(name, elapsed, &self.merged(tags));
	}
}

/// Measures the time from construction to `send`.
pub struct Timing {
	started_at: Instant,
}

impl Timing {
	pub fn start() -> Timing {
		Timing {
			started_at: Instant::now(),
		}
	}

	pub fn send(&self, sink: &dyn StatsSink, name: &str, tags: Tags<'_>) {
		sink.timing(name, self.started_at.elapsed(), tags);
	}
}

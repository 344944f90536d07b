//! Protobuf message types for metric families.
//!
//! Hand-written types matching the Prometheus client data model
//! (`io.prometheus.client` in `metrics.proto`). Using prost derives avoids the
//! need for protoc and proto file management.
//!
//! The store treats a [`MetricFamily`] as an opaque value: it only looks at
//! the family name and at the label pairs of its samples. Everything else is
//! carried through persistence untouched by the family's own protobuf
//! encoding.

/// Type of the samples in a metric family.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum MetricType {
    /// Monotonically increasing counter.
    Counter = 0,
    /// Value that can go up and down.
    Gauge = 1,
    /// Client-side quantiles plus count and sum.
    Summary = 2,
    /// Value of unknown semantics.
    Untyped = 3,
    /// Cumulative bucket counts plus count and sum.
    Histogram = 4,
}

/// A label name/value pair attached to a sample.
#[derive(Clone, PartialEq, Eq, Hash, prost::Message)]
pub struct LabelPair {
    /// Label name.
    #[prost(string, tag = "1")]
    pub name: String,
    /// Label value.
    #[prost(string, tag = "2")]
    pub value: String,
}

/// Gauge sample value.
#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct Gauge {
    /// The value.
    #[prost(double, tag = "1")]
    pub value: f64,
}

/// Counter sample value.
#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct Counter {
    /// The value.
    #[prost(double, tag = "1")]
    pub value: f64,
}

/// A single quantile of a summary.
#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct Quantile {
    /// The quantile rank, between 0 and 1.
    #[prost(double, tag = "1")]
    pub quantile: f64,
    /// Observed value at that rank.
    #[prost(double, tag = "2")]
    pub value: f64,
}

/// Summary sample value.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Summary {
    /// Number of observations.
    #[prost(uint64, tag = "1")]
    pub sample_count: u64,
    /// Sum of all observations.
    #[prost(double, tag = "2")]
    pub sample_sum: f64,
    /// Precomputed quantiles.
    #[prost(message, repeated, tag = "3")]
    pub quantile: Vec<Quantile>,
}

/// Untyped sample value.
#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct Untyped {
    /// The value.
    #[prost(double, tag = "1")]
    pub value: f64,
}

/// A single cumulative histogram bucket.
#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct Bucket {
    /// Observations less than or equal to `upper_bound`.
    #[prost(uint64, tag = "1")]
    pub cumulative_count: u64,
    /// Inclusive upper bound of the bucket.
    #[prost(double, tag = "2")]
    pub upper_bound: f64,
}

/// Histogram sample value.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Histogram {
    /// Number of observations.
    #[prost(uint64, tag = "1")]
    pub sample_count: u64,
    /// Sum of all observations.
    #[prost(double, tag = "2")]
    pub sample_sum: f64,
    /// Buckets ordered by increasing upper bound.
    #[prost(message, repeated, tag = "3")]
    pub bucket: Vec<Bucket>,
}

/// One sample of a metric family: its labels plus exactly one value kind.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Metric {
    /// Labels identifying this sample within the family.
    #[prost(message, repeated, tag = "1")]
    pub label: Vec<LabelPair>,
    /// Set for gauge families.
    #[prost(message, optional, tag = "2")]
    pub gauge: Option<Gauge>,
    /// Set for counter families.
    #[prost(message, optional, tag = "3")]
    pub counter: Option<Counter>,
    /// Set for summary families.
    #[prost(message, optional, tag = "4")]
    pub summary: Option<Summary>,
    /// Set for untyped families.
    #[prost(message, optional, tag = "5")]
    pub untyped: Option<Untyped>,
    /// Set for histogram families.
    #[prost(message, optional, tag = "7")]
    pub histogram: Option<Histogram>,
    /// Optional explicit sample timestamp in milliseconds since epoch.
    #[prost(int64, optional, tag = "6")]
    pub timestamp_ms: Option<i64>,
}

/// A named group of samples sharing a type and help text.
#[derive(Clone, PartialEq, prost::Message)]
pub struct MetricFamily {
    /// Metric name.
    #[prost(string, tag = "1")]
    pub name: String,
    /// Help text.
    #[prost(string, tag = "2")]
    pub help: String,
    /// Sample type, see [`MetricType`].
    #[prost(enumeration = "MetricType", tag = "3")]
    pub r#type: i32,
    /// The samples.
    #[prost(message, repeated, tag = "4")]
    pub metric: Vec<Metric>,
}

/// Wall-clock instant stored alongside each persisted family.
///
/// Same shape as `google.protobuf.Timestamp`: seconds relative to the Unix
/// epoch plus non-negative nanoseconds.
#[derive(Clone, Copy, PartialEq, Eq, prost::Message)]
pub struct Timestamp {
    /// Seconds since the Unix epoch (negative before it).
    #[prost(int64, tag = "1")]
    pub seconds: i64,
    /// Nanoseconds within the second, in `0..1_000_000_000`.
    #[prost(int32, tag = "2")]
    pub nanos: i32,
}

impl LabelPair {
    /// Creates a label pair.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl Metric {
    /// Creates a gauge sample with the given labels.
    pub fn gauge(labels: Vec<LabelPair>, value: f64) -> Self {
        Self {
            label: labels,
            gauge: Some(Gauge { value }),
            ..Default::default()
        }
    }

    /// Creates a counter sample with the given labels.
    pub fn counter(labels: Vec<LabelPair>, value: f64) -> Self {
        Self {
            label: labels,
            counter: Some(Counter { value }),
            ..Default::default()
        }
    }

    /// Creates an untyped sample with the given labels.
    pub fn untyped(labels: Vec<LabelPair>, value: f64) -> Self {
        Self {
            label: labels,
            untyped: Some(Untyped { value }),
            ..Default::default()
        }
    }

    /// Returns the value of the first label with the given name.
    pub fn label_value(&self, name: &str) -> Option<&str> {
        self.label
            .iter()
            .find(|pair| pair.name == name)
            .map(|pair| pair.value.as_str())
    }
}

impl MetricFamily {
    /// Creates a family of the given type from its samples.
    pub fn new(name: impl Into<String>, kind: MetricType, metrics: Vec<Metric>) -> Self {
        let mut family = Self {
            name: name.into(),
            metric: metrics,
            ..Default::default()
        };
        family.set_type(kind);
        family
    }

    /// Sets the help text.
    #[must_use]
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = help.into();
        self
    }

    /// Returns `true` if the family carries no samples.
    pub fn is_empty(&self) -> bool {
        self.metric.is_empty()
    }
}

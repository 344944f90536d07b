//! Timestamped metric families and job/instance identity recovery.

use std::sync::Arc;
use std::time::SystemTime;

use crate::proto::MetricFamily;

/// Label name carrying the job a sample was pushed for.
pub const JOB_LABEL: &str = "job";

/// Label name carrying the instance a sample was pushed for.
pub const INSTANCE_LABEL: &str = "instance";

/// A metric family together with the wall-clock time it was recorded.
///
/// The family is held behind an [`Arc`] so reads can hand out copies of the
/// handle without cloning the samples.
#[derive(Debug, Clone, PartialEq)]
pub struct TimestampedFamily {
    /// The stored family.
    pub family: Arc<MetricFamily>,
    /// When the family was pushed.
    pub timestamp: SystemTime,
}

impl TimestampedFamily {
    /// Wraps a family with its push time.
    pub fn new(family: impl Into<Arc<MetricFamily>>, timestamp: SystemTime) -> Self {
        Self {
            family: family.into(),
            timestamp,
        }
    }

    /// Name of the wrapped family.
    pub fn name(&self) -> &str {
        &self.family.name
    }

    /// Number of samples in the wrapped family.
    pub fn sample_count(&self) -> usize {
        self.family.metric.len()
    }
}

/// The (job, instance) pair a family is grouped under.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Identity {
    /// Job name, empty if no `job` label was found.
    pub job: String,
    /// Instance name, empty if no `instance` label was found.
    pub instance: String,
}

/// Recovers the (job, instance) pair of a family from its sample labels.
///
/// Only the first sample is inspected: every family written through the
/// store was pushed for a single job and instance, so all of its samples
/// carry the same pair. Returns `None` for a family without samples, which
/// cannot be placed in the index.
///
/// Use [`mismatched_identity`] to check whether a family breaks that
/// assumption.
pub fn family_identity(family: &MetricFamily) -> Option<Identity> {
    let first = family.metric.first()?;
    let mut identity = Identity::default();
    for pair in &first.label {
        match pair.name.as_str() {
            JOB_LABEL => identity.job.clone_from(&pair.value),
            INSTANCE_LABEL => identity.instance.clone_from(&pair.value),
            _ => {}
        }
        if !identity.job.is_empty() && !identity.instance.is_empty() {
            break;
        }
    }
    Some(identity)
}

/// Returns the index of the first sample whose job/instance labels differ
/// from `identity`, if any.
pub fn mismatched_identity(family: &MetricFamily, identity: &Identity) -> Option<usize> {
    family.metric.iter().position(|metric| {
        metric.label_value(JOB_LABEL).unwrap_or_default() != identity.job
            || metric.label_value(INSTANCE_LABEL).unwrap_or_default() != identity.instance
    })
}

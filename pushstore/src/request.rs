//! Write requests submitted by producers.

use std::collections::HashMap;
use std::time::SystemTime;

use crate::proto::MetricFamily;

/// What a [`WriteRequest`] does to its job/instance entry.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteAction {
    /// Insert or replace the given families, keyed by family name.
    ///
    /// An empty map is accepted and changes nothing.
    Upsert {
        /// Families to store, keyed by family name.
        families: HashMap<String, MetricFamily>,
        /// When the families were pushed.
        timestamp: SystemTime,
    },
    /// Remove the job/instance entry. An empty instance removes the whole job.
    Delete,
}

/// A single mutation of the store, applied in submission order.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRequest {
    /// Job the request applies to.
    pub job: String,
    /// Instance within the job; may be empty.
    pub instance: String,
    /// The mutation to apply.
    pub action: WriteAction,
}

impl WriteRequest {
    /// Creates an upsert of `families` for the given job and instance.
    pub fn upsert(
        job: impl Into<String>,
        instance: impl Into<String>,
        families: HashMap<String, MetricFamily>,
        timestamp: SystemTime,
    ) -> Self {
        Self {
            job: job.into(),
            instance: instance.into(),
            action: WriteAction::Upsert {
                families,
                timestamp,
            },
        }
    }

    /// Creates an upsert from families keyed by their own names.
    pub fn upsert_families(
        job: impl Into<String>,
        instance: impl Into<String>,
        families: impl IntoIterator<Item = MetricFamily>,
        timestamp: SystemTime,
    ) -> Self {
        let families = families
            .into_iter()
            .map(|family| (family.name.clone(), family))
            .collect();
        Self::upsert(job, instance, families, timestamp)
    }

    /// Creates a delete request.
    ///
    /// With an empty `instance` the whole job is removed; otherwise only the
    /// job/instance entry.
    pub fn delete(job: impl Into<String>, instance: impl Into<String>) -> Self {
        Self {
            job: job.into(),
            instance: instance.into(),
            action: WriteAction::Delete,
        }
    }

    /// Returns `true` if this request removes data.
    pub fn is_delete(&self) -> bool {
        matches!(self.action, WriteAction::Delete)
    }
}

//! In-memory index of the latest family per job, instance and name.
//!
//! The index is a plain three-level map with no synchronization of its own;
//! the store engine guards it with a reader/writer lock and is the only
//! component that mutates it.

use std::collections::HashMap;
use std::sync::Arc;

use crate::family::TimestampedFamily;
use crate::proto::MetricFamily;
use crate::request::{WriteAction, WriteRequest};

type NameMap = HashMap<String, TimestampedFamily>;
type InstanceMap = HashMap<String, NameMap>;

/// Mapping `job -> instance -> family name -> TimestampedFamily`.
///
/// No empty inner map is ever left behind: a job without instances and an
/// instance without families are removed or never created.
#[derive(Debug, Default, Clone)]
pub struct Index {
    jobs: HashMap<String, InstanceMap>,
}

impl Index {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a write request.
    pub fn apply(&mut self, request: WriteRequest) {
        let WriteRequest {
            job,
            instance,
            action,
        } = request;

        match action {
            WriteAction::Delete if instance.is_empty() => self.delete_job(&job),
            WriteAction::Delete => self.delete_instance(&job, &instance),
            WriteAction::Upsert {
                families,
                timestamp,
            } => {
                for (name, family) in families {
                    self.insert(
                        &job,
                        &instance,
                        name,
                        TimestampedFamily::new(family, timestamp),
                    );
                }
            }
        }
    }

    /// Stores `family` under `name`, replacing any previous value.
    pub fn insert(&mut self, job: &str, instance: &str, name: String, family: TimestampedFamily) {
        self.jobs
            .entry(job.to_string())
            .or_default()
            .entry(instance.to_string())
            .or_default()
            .insert(name, family);
    }

    /// Removes every instance of `job`. Absent jobs are ignored.
    pub fn delete_job(&mut self, job: &str) {
        self.jobs.remove(job);
    }

    /// Removes one instance of `job`, and the job itself if it becomes empty.
    pub fn delete_instance(&mut self, job: &str, instance: &str) {
        if let Some(instances) = self.jobs.get_mut(job) {
            instances.remove(instance);
            if instances.is_empty() {
                self.jobs.remove(job);
            }
        }
    }

    /// Looks up a single stored family.
    pub fn get(&self, job: &str, instance: &str, name: &str) -> Option<&TimestampedFamily> {
        self.jobs.get(job)?.get(instance)?.get(name)
    }

    /// Iterates over `(job, instance, family)` for every stored family.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &TimestampedFamily)> {
        self.jobs.iter().flat_map(|(job, instances)| {
            instances.iter().flat_map(move |(instance, names)| {
                names
                    .values()
                    .map(move |family| (job.as_str(), instance.as_str(), family))
            })
        })
    }

    /// Copies the handles of every stored family.
    pub fn families(&self) -> Vec<Arc<MetricFamily>> {
        self.iter()
            .map(|(_, _, family)| Arc::clone(&family.family))
            .collect()
    }

    /// Copies every stored family together with its timestamp.
    pub fn timestamped_families(&self) -> Vec<TimestampedFamily> {
        self.iter().map(|(_, _, family)| family.clone()).collect()
    }

    /// Number of stored families.
    pub fn len(&self) -> usize {
        self.jobs
            .values()
            .flat_map(HashMap::values)
            .map(HashMap::len)
            .sum()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Number of jobs with at least one instance.
    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// Number of instances stored for `job`.
    pub fn instance_count(&self, job: &str) -> usize {
        self.jobs.get(job).map_or(0, HashMap::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::{LabelPair, Metric, MetricType};
    use std::time::{Duration, SystemTime};

    fn gauge(name: &str, value: f64) -> MetricFamily {
        MetricFamily::new(
            name,
            MetricType::Gauge,
            vec![Metric::gauge(vec![LabelPair::new("job", "batch")], value)],
        )
    }

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn test_upsert_creates_entries() {
        let mut index = Index::new();
        index.apply(WriteRequest::upsert_families(
            "batch",
            "",
            [gauge("up", 1.0), gauge("runs", 3.0)],
            at(10),
        ));

        assert_eq!(index.len(), 2);
        assert_eq!(index.job_count(), 1);
        assert_eq!(index.instance_count("batch"), 1);
        let up = index.get("batch", "", "up").unwrap();
        assert_eq!(up.timestamp, at(10));
        assert_eq!(up.family.metric[0].gauge.unwrap().value, 1.0);
    }

    #[test]
    fn test_upsert_replaces_whole_family() {
        let mut index = Index::new();
        index.apply(WriteRequest::upsert_families("batch", "h1", [gauge("up", 1.0)], at(10)));

        let replacement = MetricFamily::new(
            "up",
            MetricType::Gauge,
            vec![
                Metric::gauge(vec![LabelPair::new("zone", "a")], 0.0),
                Metric::gauge(vec![LabelPair::new("zone", "b")], 0.0),
            ],
        );
        index.apply(WriteRequest::upsert_families("batch", "h1", [replacement.clone()], at(20)));

        assert_eq!(index.len(), 1);
        let up = index.get("batch", "h1", "up").unwrap();
        assert_eq!(*up.family, replacement);
        assert_eq!(up.timestamp, at(20));
    }

    #[test]
    fn test_empty_upsert_is_noop() {
        let mut index = Index::new();
        index.apply(WriteRequest::upsert("batch", "h1", HashMap::new(), at(1)));

        assert!(index.is_empty());
        assert_eq!(index.job_count(), 0);
    }

    #[test]
    fn test_delete_whole_job() {
        let mut index = Index::new();
        index.apply(WriteRequest::upsert_families("batch", "h1", [gauge("up", 1.0)], at(1)));
        index.apply(WriteRequest::upsert_families("batch", "h2", [gauge("up", 1.0)], at(1)));
        index.apply(WriteRequest::upsert_families("other", "", [gauge("up", 1.0)], at(1)));

        index.apply(WriteRequest::delete("batch", ""));

        assert_eq!(index.job_count(), 1);
        assert!(index.get("batch", "h1", "up").is_none());
        assert!(index.get("other", "", "up").is_some());
    }

    #[test]
    fn test_delete_missing_job_is_noop() {
        let mut index = Index::new();
        index.apply(WriteRequest::delete("ghost", ""));
        index.apply(WriteRequest::delete("ghost", "h1"));
        assert!(index.is_empty());
    }

    #[test]
    fn test_delete_instance_keeps_siblings() {
        let mut index = Index::new();
        index.apply(WriteRequest::upsert_families("batch", "h1", [gauge("up", 1.0)], at(1)));
        index.apply(WriteRequest::upsert_families("batch", "h2", [gauge("up", 1.0)], at(1)));

        index.apply(WriteRequest::delete("batch", "h1"));

        assert_eq!(index.instance_count("batch"), 1);
        assert!(index.get("batch", "h2", "up").is_some());
    }

    #[test]
    fn test_delete_last_instance_cascades() {
        let mut index = Index::new();
        index.apply(WriteRequest::upsert_families("batch", "h1", [gauge("up", 1.0)], at(1)));

        index.apply(WriteRequest::delete("batch", "h1"));

        assert!(index.is_empty());
        assert_eq!(index.job_count(), 0);
    }

    #[test]
    fn test_repeated_write_delete_does_not_grow() {
        let mut index = Index::new();
        for i in 0..1000 {
            let instance = format!("h{i}");
            index.apply(WriteRequest::upsert_families("batch", &instance, [gauge("up", 1.0)], at(1)));
            index.apply(WriteRequest::delete("batch", &instance));
        }
        assert!(index.is_empty());
    }

    #[test]
    fn test_families_and_iter_cover_everything() {
        let mut index = Index::new();
        index.apply(WriteRequest::upsert_families("a", "", [gauge("x", 1.0), gauge("y", 1.0)], at(1)));
        index.apply(WriteRequest::upsert_families("b", "h", [gauge("x", 1.0)], at(2)));

        let mut names: Vec<_> = index.families().iter().map(|f| f.name.clone()).collect();
        names.sort();
        assert_eq!(names, vec!["x", "x", "y"]);

        let mut keys: Vec<_> = index
            .iter()
            .map(|(job, instance, f)| format!("{job}/{instance}/{}", f.name()))
            .collect();
        keys.sort();
        assert_eq!(keys, vec!["a//x", "a//y", "b/h/x"]);
        assert_eq!(index.timestamped_families().len(), 3);
    }
}

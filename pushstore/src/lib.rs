//! # pushstore
//!
//! In-memory store for pushed metric families with debounced, crash-safe
//! persistence.
//!
//! Producers push whole metric families for a (job, instance) pair. The store
//! keeps the latest family per job, instance and family name, serves reads
//! from memory, and periodically saves everything to a single file that is
//! replaced atomically, so a crash never leaves a half-written file behind.
//!
//! **Status**: This crate is in early development. The API is not yet stable.
//!
//! ## Key Properties
//!
//! - All mutations are applied by one control-loop thread, in submission order
//! - Reads never wait for persistence; they copy `Arc` handles under a shared lock
//! - Persistence runs at most once per interval and never overlaps itself
//! - Shutdown drains queued writes and persists one final time
//! - The persistence file is replaced by rename, never written in place
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pushstore::{DiskMetricStore, StoreConfig, WriteRequest};
//! use pushstore::proto::{LabelPair, Metric, MetricFamily, MetricType};
//! use std::time::{Duration, SystemTime};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = DiskMetricStore::open(
//!     StoreConfig::default()
//!         .with_persistence_file("./metrics.store")
//!         .with_persistence_interval(Duration::from_secs(300)),
//! )?;
//!
//! // Push a family for job "backup", instance "db-1"
//! let last_success = MetricFamily::new(
//!     "backup_last_success_timestamp_seconds",
//!     MetricType::Gauge,
//!     vec![Metric::gauge(
//!         vec![LabelPair::new("job", "backup"), LabelPair::new("instance", "db-1")],
//!         1_700_000_000.0,
//!     )],
//! );
//! store.submit(WriteRequest::upsert_families("backup", "db-1", [last_success], SystemTime::now()))?;
//!
//! // Remove everything pushed for the job
//! store.submit(WriteRequest::delete("backup", ""))?;
//!
//! store.shutdown()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`store`]: Store engine: control loop, persistence scheduling, shutdown
//! - [`index`]: The job, instance and name index
//! - [`request`]: Write and delete requests
//! - [`family`]: Timestamped families and job/instance recovery
//! - [`codec`]: Record format of the persistence file
//! - [`persist`]: Atomic replacement of the persistence file
//! - [`config`]: Store configuration
//! - [`proto`]: Metric family protobuf types
//! - [`error`]: Error types

pub mod codec;
pub mod config;
pub mod error;
pub mod family;
pub mod index;
pub mod persist;
pub mod proto;
pub mod request;
pub mod store;

// Re-export primary API types at crate root for convenience.
pub use config::StoreConfig;
pub use error::{PushstoreError, Result};
pub use family::TimestampedFamily;
pub use index::Index;
pub use request::{WriteAction, WriteRequest};
pub use store::{DiskMetricStore, MetricStore};

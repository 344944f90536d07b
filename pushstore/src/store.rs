//! Store engine: serialized writes, debounced persistence, graceful drain.
//!
//! # Design
//!
//! [`DiskMetricStore`] owns the [`Index`] and runs two threads:
//!
//! - **control loop** (`pushstore-loop`): the only code that mutates the
//!   index. It takes requests off a bounded queue in submission order,
//!   applies each under the exclusive lock, and decides when to persist.
//! - **persister** (`pushstore-persist`): takes a snapshot of the index under
//!   the shared lock and writes it with [`write_atomic`]. It only ever
//!   receives one job at a time.
//!
//! The control loop tracks persistence with a small state machine:
//!
//! ```text
//!            write, nothing pending           timer fires
//!   Idle ──────────────────────────▶ Scheduled ──────────▶ Persisting
//!    ▲                                                         │
//!    └──────────────── persistence done (re-check) ◀───────────┘
//!
//!   any state ── shutdown ──▶ Draining ──▶ final persist ──▶ exit
//! ```
//!
//! A timer is armed only when nothing is scheduled or running and a write
//! happened after the last persistence snapshot. It fires
//! `interval - (last_write - last_persist)` after arming, so a lone write is
//! on disk within one interval and a burst of writes causes one run.
//!
//! `last_persist` is the instant the snapshot was taken, not when the file
//! was renamed. A write applied while the persister is busy is therefore
//! newer than `last_persist` and schedules the next run.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, bounded, select};
use parking_lot::{Mutex, RwLock};

use crate::codec::restore_index;
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::index::Index;
use crate::persist::{self, write_atomic};
use crate::proto::MetricFamily;
use crate::request::WriteRequest;

/// The interface the transport and query layers program against.
pub trait MetricStore {
    /// Queues a write or delete. Blocks while the write queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Closed`] once the store has shut down.
    fn submit_write_request(&self, request: WriteRequest) -> Result<()>;

    /// Returns every stored family across all jobs and instances.
    fn metric_families(&self) -> Vec<Arc<MetricFamily>>;

    /// Drains queued writes, persists once more, and stops the store.
    ///
    /// # Errors
    ///
    /// Returns the error of the final persistence run, if any.
    fn shutdown(&self) -> Result<()>;
}

/// Metric store that keeps everything in memory and persists it to a file.
///
/// # Example
///
/// ```rust,no_run
/// use std::time::{Duration, SystemTime};
/// use pushstore::config::StoreConfig;
/// use pushstore::proto::{LabelPair, Metric, MetricFamily, MetricType};
/// use pushstore::request::WriteRequest;
/// use pushstore::store::DiskMetricStore;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = StoreConfig::default()
///     .with_persistence_file("./metrics.store")
///     .with_persistence_interval(Duration::from_secs(60));
/// let store = DiskMetricStore::open(config)?;
///
/// let up = MetricFamily::new(
///     "up",
///     MetricType::Gauge,
///     vec![Metric::gauge(vec![LabelPair::new("job", "batch")], 1.0)],
/// );
/// store.submit(WriteRequest::upsert_families("batch", "", [up], SystemTime::now()))?;
///
/// for family in store.families() {
///     println!("{}", family.name);
/// }
///
/// store.shutdown()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct DiskMetricStore {
    /// The index; written only by the control loop.
    index: Arc<RwLock<Index>>,
    /// Producer side of the bounded write queue; taken on shutdown.
    write_tx: RwLock<Option<Sender<WriteRequest>>>,
    /// Dropping the drain sender tells the loop to shut down.
    running: Mutex<Option<Running>>,
    /// Where the index is persisted, if anywhere.
    persistence_file: Option<PathBuf>,
}

#[derive(Debug)]
struct Running {
    drain_tx: Sender<()>,
    control: JoinHandle<Result<()>>,
}

impl DiskMetricStore {
    /// Opens a store, restoring the index from the persistence file if one
    /// is configured and present.
    ///
    /// A persistence file that cannot be read or decoded is logged and the
    /// store starts empty.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`](crate::error::ConfigError) if the config is
    /// invalid, or [`StoreError::Spawn`] if a worker thread cannot start.
    pub fn open(config: StoreConfig) -> Result<Self> {
        config.validate()?;

        let persistence_file = config.persistence_path().map(Path::to_path_buf);
        let index = persistence_file
            .as_deref()
            .map_or_else(Index::new, restore);
        let index = Arc::new(RwLock::new(index));

        let (write_tx, write_rx) = bounded(config.write_queue_capacity);
        let (drain_tx, drain_rx) = bounded(0);

        let persister = match &persistence_file {
            Some(path) => Some(Persister::spawn(Arc::clone(&index), path.clone())?),
            None => None,
        };

        let control_loop = ControlLoop {
            index: Arc::clone(&index),
            persistence_file: persistence_file.clone(),
            interval: config.persistence_interval,
            persister,
            state: PersistState::Idle,
            last_write: None,
            last_persist: Instant::now(),
        };
        let control = thread::Builder::new()
            .name("pushstore-loop".to_string())
            .spawn(move || control_loop.run(&write_rx, &drain_rx))
            .map_err(|source| StoreError::Spawn {
                name: "pushstore-loop",
                source,
            })?;

        tracing::debug!(
            "store opened (persistence: {}, interval: {:?})",
            persistence_file
                .as_deref()
                .map_or_else(|| "disabled".to_string(), |p| p.display().to_string()),
            config.persistence_interval
        );

        Ok(Self {
            index,
            write_tx: RwLock::new(Some(write_tx)),
            running: Mutex::new(Some(Running { drain_tx, control })),
            persistence_file,
        })
    }

    /// Queues a write or delete request.
    ///
    /// Requests are applied in submission order. The call blocks while the
    /// write queue is full and never drops a request.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Closed`] if the store has shut down.
    pub fn submit(&self, request: WriteRequest) -> Result<()> {
        let Some(write_tx) = self.write_tx.read().clone() else {
            return Err(StoreError::Closed.into());
        };
        write_tx
            .send(request)
            .map_err(|_| StoreError::Closed.into())
    }

    /// Returns every stored family.
    ///
    /// Only the family handles are copied, under the shared lock.
    pub fn families(&self) -> Vec<Arc<MetricFamily>> {
        self.index.read().families()
    }

    /// Number of stored families.
    pub fn family_count(&self) -> usize {
        self.index.read().len()
    }

    /// The persistence file, or `None` if persistence is disabled.
    pub fn persistence_file(&self) -> Option<&Path> {
        self.persistence_file.as_deref()
    }

    /// Stops the store.
    ///
    /// Stops accepting requests, cancels any scheduled persistence, waits
    /// for a running one to finish, applies every accepted request, and
    /// persists one last time. Blocks until the control loop has exited.
    ///
    /// A `submit` racing with shutdown either fails with
    /// [`StoreError::Closed`] or is applied and persisted.
    ///
    /// # Errors
    ///
    /// Returns the error of the final persistence run,
    /// [`StoreError::AlreadyShutDown`] on a second call, or
    /// [`StoreError::LoopPanicked`] if the control loop died.
    pub fn shutdown(&self) -> Result<()> {
        let Some(Running { drain_tx, control }) = self.running.lock().take() else {
            return Err(StoreError::AlreadyShutDown.into());
        };

        // Submitters already holding a sender finish their send; the loop
        // drains until the last of them is gone.
        drop(self.write_tx.write().take());
        drop(drain_tx);
        control
            .join()
            .map_err(|_| StoreError::LoopPanicked)?
    }
}

impl MetricStore for DiskMetricStore {
    fn submit_write_request(&self, request: WriteRequest) -> Result<()> {
        self.submit(request)
    }

    fn metric_families(&self) -> Vec<Arc<MetricFamily>> {
        self.families()
    }

    fn shutdown(&self) -> Result<()> {
        DiskMetricStore::shutdown(self)
    }
}

impl Drop for DiskMetricStore {
    fn drop(&mut self) {
        if self.running.get_mut().is_some()
            && let Err(e) = self.shutdown()
        {
            tracing::error!("error shutting down metric store: {e}");
        }
    }
}

/// Restores an index from `path`, falling back to an empty one.
fn restore(path: &Path) -> Index {
    match persist::load(path) {
        Ok(Some(records)) => {
            let index = restore_index(records);
            tracing::info!(
                "restored {} metric families from '{}'",
                index.len(),
                path.display()
            );
            index
        }
        Ok(None) => {
            tracing::debug!("no persistence file at '{}', starting empty", path.display());
            Index::new()
        }
        Err(e) => {
            tracing::warn!("could not load persisted metrics: {e}");
            Index::new()
        }
    }
}

/// Snapshots `index` under the shared lock and writes it to `path`.
fn persist_snapshot(index: &RwLock<Index>, path: &Path) -> Result<usize> {
    let snapshot = index.read().timestamped_families();
    write_atomic(path, &snapshot)
}

/// Persistence progress as seen by the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PersistState {
    /// Nothing scheduled or running.
    Idle,
    /// A timer is armed and fires at `deadline`.
    Scheduled { deadline: Instant },
    /// The persister is writing a snapshot.
    Persisting,
    /// Shutdown has begun; no further timed persistence.
    Draining,
}

/// Handle to the persister thread.
#[derive(Debug)]
struct Persister {
    /// One message per persistence run.
    job_tx: Sender<()>,
    /// Snapshot instant of each finished run.
    done_rx: Receiver<Instant>,
    thread: JoinHandle<()>,
}

impl Persister {
    fn spawn(index: Arc<RwLock<Index>>, path: PathBuf) -> Result<Self> {
        let (job_tx, job_rx) = bounded::<()>(1);
        let (done_tx, done_rx) = bounded(1);

        let thread = thread::Builder::new()
            .name("pushstore-persist".to_string())
            .spawn(move || {
                for () in job_rx {
                    let started = Instant::now();
                    match persist_snapshot(&index, &path) {
                        Ok(count) => tracing::info!(
                            "persisted {count} metric families to '{}'",
                            path.display()
                        ),
                        Err(e) => tracing::error!(
                            "error persisting metrics to '{}': {e}",
                            path.display()
                        ),
                    }
                    if done_tx.send(started).is_err() {
                        break;
                    }
                }
            })
            .map_err(|source| StoreError::Spawn {
                name: "pushstore-persist",
                source,
            })?;

        Ok(Self {
            job_tx,
            done_rx,
            thread,
        })
    }

    /// Stops the thread once it has finished its current job.
    fn stop(self) {
        drop(self.job_tx);
        if self.thread.join().is_err() {
            tracing::error!("persister thread panicked");
        }
    }
}

/// State owned by the control-loop thread.
struct ControlLoop {
    index: Arc<RwLock<Index>>,
    persistence_file: Option<PathBuf>,
    interval: Duration,
    persister: Option<Persister>,
    state: PersistState,
    last_write: Option<Instant>,
    last_persist: Instant,
}

impl ControlLoop {
    fn run(mut self, write_rx: &Receiver<WriteRequest>, drain_rx: &Receiver<()>) -> Result<()> {
        let done_rx = self
            .persister
            .as_ref()
            .map_or_else(crossbeam_channel::never, |p| p.done_rx.clone());

        loop {
            let timer = match self.state {
                PersistState::Scheduled { deadline } => crossbeam_channel::at(deadline),
                _ => crossbeam_channel::never(),
            };

            select! {
                recv(write_rx) -> request => match request {
                    Ok(request) => {
                        self.apply(request);
                        self.last_write = Some(Instant::now());
                        self.check_persist();
                    }
                    Err(_) => return self.drain(write_rx, &done_rx),
                },
                recv(timer) -> _ => self.start_persist(),
                recv(done_rx) -> started => {
                    if let Ok(started) = started {
                        self.last_persist = started;
                        self.state = PersistState::Idle;
                        self.check_persist();
                    }
                },
                recv(drain_rx) -> _ => return self.drain(write_rx, &done_rx),
            }
        }
    }

    fn apply(&self, request: WriteRequest) {
        self.index.write().apply(request);
    }

    /// Arms the persistence timer if a write is waiting to be persisted.
    fn check_persist(&mut self) {
        if self.persister.is_none() || self.state != PersistState::Idle {
            return;
        }
        let Some(last_write) = self.last_write else {
            return;
        };
        if last_write <= self.last_persist {
            return;
        }

        let delay = self
            .interval
            .saturating_sub(last_write.duration_since(self.last_persist));
        self.state = PersistState::Scheduled {
            deadline: Instant::now() + delay,
        };
    }

    fn start_persist(&mut self) {
        let Some(persister) = &self.persister else {
            return;
        };

        if persister.job_tx.send(()).is_ok() {
            self.state = PersistState::Persisting;
        } else {
            tracing::error!("persister thread is gone, skipping scheduled persistence");
            self.state = PersistState::Idle;
        }
    }

    /// Applies every accepted request and persists one last time.
    ///
    /// Returns once the write queue is empty and disconnected, so nothing
    /// acknowledged by `submit` is left behind.
    fn drain(mut self, write_rx: &Receiver<WriteRequest>, done_rx: &Receiver<Instant>) -> Result<()> {
        if self.state == PersistState::Persisting && done_rx.recv().is_err() {
            tracing::warn!("persister exited before finishing its last run");
        }
        self.state = PersistState::Draining;

        if let Some(persister) = self.persister.take() {
            persister.stop();
        }

        let mut drained = 0usize;
        while let Ok(request) = write_rx.recv() {
            self.apply(request);
            drained += 1;
        }
        tracing::debug!("drained {drained} queued write request(s)");

        let Some(path) = &self.persistence_file else {
            return Ok(());
        };
        let count = persist_snapshot(&self.index, path)?;
        tracing::info!("persisted {count} metric families to '{}'", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::{LabelPair, Metric, MetricType};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::SystemTime;

    fn family(name: &str, job: &str, instance: &str) -> MetricFamily {
        MetricFamily::new(
            name,
            MetricType::Gauge,
            vec![Metric::gauge(
                vec![LabelPair::new("job", job), LabelPair::new("instance", instance)],
                1.0,
            )],
        )
    }

    fn test_loop(interval: Duration, persistence: bool) -> ControlLoop {
        let dir = std::env::temp_dir().join("pushstore-never-written");
        let index = Arc::new(RwLock::new(Index::new()));
        let persister = persistence
            .then(|| Persister::spawn(Arc::clone(&index), dir.join("unused")).unwrap());
        ControlLoop {
            index,
            persistence_file: None,
            interval,
            persister,
            state: PersistState::Idle,
            last_write: None,
            last_persist: Instant::now(),
        }
    }

    /// A persister that only counts the runs it is asked for.
    fn counting_persister() -> (Persister, Arc<AtomicUsize>) {
        let (job_tx, job_rx) = bounded::<()>(1);
        let (done_tx, done_rx) = bounded(1);
        let runs = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&runs);
        let thread = thread::spawn(move || {
            for () in job_rx {
                let started = Instant::now();
                counted.fetch_add(1, Ordering::SeqCst);
                if done_tx.send(started).is_err() {
                    break;
                }
            }
        });
        (
            Persister {
                job_tx,
                done_rx,
                thread,
            },
            runs,
        )
    }

    #[test]
    fn test_check_persist_needs_a_write() {
        let mut control = test_loop(Duration::from_secs(60), true);
        control.check_persist();
        assert_eq!(control.state, PersistState::Idle);
    }

    #[test]
    fn test_check_persist_arms_within_interval() {
        let interval = Duration::from_secs(60);
        let mut control = test_loop(interval, true);
        let before = Instant::now();
        control.last_write = Some(Instant::now());

        control.check_persist();

        let PersistState::Scheduled { deadline } = control.state else {
            panic!("expected a scheduled persistence, got {:?}", control.state);
        };
        assert!(deadline <= before + interval + Duration::from_secs(1));
        assert!(deadline > before);
    }

    #[test]
    fn test_check_persist_does_not_rearm() {
        let mut control = test_loop(Duration::from_secs(60), true);
        control.last_write = Some(Instant::now());
        control.check_persist();
        let first = control.state;

        std::thread::sleep(Duration::from_millis(5));
        control.last_write = Some(Instant::now());
        control.check_persist();

        assert_eq!(control.state, first);
    }

    #[test]
    fn test_check_persist_waits_for_running_persistence() {
        let mut control = test_loop(Duration::from_secs(60), true);
        control.state = PersistState::Persisting;
        control.last_write = Some(Instant::now());

        control.check_persist();

        assert_eq!(control.state, PersistState::Persisting);
    }

    #[test]
    fn test_check_persist_disabled_without_persister() {
        let mut control = test_loop(Duration::ZERO, false);
        control.last_write = Some(Instant::now());
        control.check_persist();
        assert_eq!(control.state, PersistState::Idle);
    }

    #[test]
    fn test_overdue_write_fires_immediately() {
        let interval = Duration::from_millis(10);
        let mut control = test_loop(interval, true);
        control.last_persist = Instant::now() - Duration::from_secs(5);
        control.last_write = Some(Instant::now());

        control.check_persist();

        let PersistState::Scheduled { deadline } = control.state else {
            panic!("expected a scheduled persistence");
        };
        assert!(deadline <= Instant::now());
    }

    #[test]
    fn test_burst_of_writes_persists_once() {
        let interval = Duration::from_millis(400);
        let (persister, runs) = counting_persister();
        let mut control = test_loop(interval, false);
        control.persister = Some(persister);

        let (write_tx, write_rx) = bounded(16);
        let (drain_tx, drain_rx) = bounded::<()>(0);
        let handle = thread::spawn(move || control.run(&write_rx, &drain_rx));

        let burst_start = Instant::now();
        while burst_start.elapsed() < interval / 2 {
            write_tx
                .send(WriteRequest::upsert_families(
                    "burst",
                    "",
                    [family("counter", "burst", "")],
                    SystemTime::now(),
                ))
                .unwrap();
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        // The single run fires one interval after the first write.
        thread::sleep(interval);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        // No writes since that snapshot, so nothing is re-armed.
        thread::sleep(interval);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        drop(write_tx);
        drop(drain_tx);
        handle.join().unwrap().unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_each_write_after_a_run_schedules_another() {
        let interval = Duration::from_millis(50);
        let (persister, runs) = counting_persister();
        let mut control = test_loop(interval, false);
        control.persister = Some(persister);

        let (write_tx, write_rx) = bounded(16);
        let (drain_tx, drain_rx) = bounded::<()>(0);
        let handle = thread::spawn(move || control.run(&write_rx, &drain_rx));

        for name in ["first", "second"] {
            write_tx
                .send(WriteRequest::upsert_families(
                    "job",
                    "",
                    [family(name, "job", "")],
                    SystemTime::now(),
                ))
                .unwrap();
            thread::sleep(interval * 4);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        drop(write_tx);
        drop(drain_tx);
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn test_drain_survives_persister_that_never_reports() {
        let mut control = test_loop(Duration::from_secs(60), false);
        let (job_tx, _job_rx) = bounded::<()>(1);
        let (done_tx, done_rx) = bounded::<Instant>(1);
        drop(done_tx);
        control.persister = Some(Persister {
            job_tx,
            done_rx: done_rx.clone(),
            thread: thread::spawn(|| {}),
        });
        control.state = PersistState::Persisting;

        let (write_tx, write_rx) = bounded::<WriteRequest>(1);
        drop(write_tx);

        assert!(control.drain(&write_rx, &done_rx).is_ok());
    }

    #[test]
    fn test_submit_then_read_without_persistence() {
        let store = DiskMetricStore::open(StoreConfig::default()).unwrap();
        store
            .submit(WriteRequest::upsert_families(
                "batch",
                "",
                [family("up", "batch", "")],
                SystemTime::now(),
            ))
            .unwrap();
        store.shutdown().unwrap();

        let families = store.families();
        assert_eq!(families.len(), 1);
        assert_eq!(families[0].name, "up");
    }

    #[test]
    fn test_submit_after_shutdown_fails() {
        let store = DiskMetricStore::open(StoreConfig::default()).unwrap();
        store.shutdown().unwrap();

        let err = store.submit(WriteRequest::delete("batch", "")).unwrap_err();
        assert!(matches!(err, crate::PushstoreError::Store(StoreError::Closed)));
    }

    #[test]
    fn test_second_shutdown_reports_already_shut_down() {
        let store = DiskMetricStore::open(StoreConfig::default()).unwrap();
        store.shutdown().unwrap();

        let err = store.shutdown().unwrap_err();
        assert!(matches!(
            err,
            crate::PushstoreError::Store(StoreError::AlreadyShutDown)
        ));
    }

    #[test]
    fn test_shutdown_drains_queue_in_order() {
        let store = DiskMetricStore::open(StoreConfig::default()).unwrap();
        for i in 0..100 {
            store
                .submit(WriteRequest::upsert_families(
                    "batch",
                    format!("h{i}"),
                    [family("up", "batch", &format!("h{i}"))],
                    SystemTime::now(),
                ))
                .unwrap();
        }
        store.submit(WriteRequest::delete("batch", "h0")).unwrap();
        store.shutdown().unwrap();

        assert_eq!(store.family_count(), 99);
    }

    #[test]
    fn test_trait_object_usage() {
        let store: Box<dyn MetricStore> = Box::new(DiskMetricStore::open(StoreConfig::default()).unwrap());
        store
            .submit_write_request(WriteRequest::upsert_families(
                "batch",
                "h1",
                [family("up", "batch", "h1")],
                SystemTime::now(),
            ))
            .unwrap();
        store.shutdown().unwrap();
        assert_eq!(store.metric_families().len(), 1);
    }
}

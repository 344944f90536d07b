//! Error types for the pushstore metric store.

use std::path::PathBuf;

use thiserror::Error;

/// The main error type for all pushstore operations.
///
/// Each variant wraps the error enum of one subsystem, so callers can match
/// on the broad category and still reach the detailed cause.
#[derive(Error, Debug)]
pub enum PushstoreError {
    /// Error in the store engine lifecycle (open, submit, shutdown).
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Error while encoding or decoding persisted records.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Error while writing the persistence file.
    #[error("persistence error: {0}")]
    Persist(#[from] PersistError),

    /// Invalid store configuration.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors raised by the store engine itself.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A worker thread could not be spawned.
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        /// Name of the thread that failed to start.
        name: &'static str,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The engine is no longer accepting requests.
    #[error("store has been shut down")]
    Closed,

    /// `shutdown` was called on an engine that already shut down.
    #[error("store was already shut down")]
    AlreadyShutDown,

    /// The control loop panicked before reporting a result.
    #[error("store control loop panicked")]
    LoopPanicked,
}

/// Errors that can occur while encoding or decoding persisted records.
#[derive(Error, Debug)]
pub enum CodecError {
    /// A record could not be encoded.
    #[error("failed to encode record for family '{family}': {source}")]
    Encode {
        /// Name of the family being encoded.
        family: String,
        /// The protobuf encoding error.
        #[source]
        source: prost::EncodeError,
    },

    /// A record could not be decoded.
    #[error("failed to decode record {record} at byte offset {offset}: {source}")]
    Decode {
        /// Zero-based index of the failing record.
        record: usize,
        /// Byte offset of the failing field within the input.
        offset: usize,
        /// The protobuf decoding error.
        #[source]
        source: prost::DecodeError,
    },

    /// A decoded timestamp does not fit into `SystemTime`.
    #[error("record {record} carries an out-of-range timestamp ({seconds}s, {nanos}ns)")]
    InvalidTimestamp {
        /// Zero-based index of the failing record.
        record: usize,
        /// Seconds relative to the Unix epoch.
        seconds: i64,
        /// Sub-second nanoseconds.
        nanos: i32,
    },

    /// Reading from or writing to the underlying stream failed.
    #[error("record stream I/O failed: {source}")]
    Io {
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Errors that can occur while atomically replacing the persistence file.
#[derive(Error, Debug)]
pub enum PersistError {
    /// The temporary file next to the destination could not be created.
    #[error("failed to create temporary file in '{}': {source}", dir.display())]
    CreateTemp {
        /// Directory in which the temporary file was requested.
        dir: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Writing records into the temporary file failed.
    #[error("failed to write records to '{}': {source}", path.display())]
    Write {
        /// Path of the temporary file.
        path: PathBuf,
        /// The codec failure.
        #[source]
        source: CodecError,
    },

    /// Flushing or syncing the temporary file failed.
    #[error("failed to sync '{}': {source}", path.display())]
    Sync {
        /// Path of the temporary file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Renaming the temporary file over the destination failed.
    #[error("failed to rename temporary file over '{}': {source}", path.display())]
    Rename {
        /// Destination path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Reading an existing persistence file failed.
    #[error("failed to read persistence file '{}': {source}", path.display())]
    Read {
        /// The persistence file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised when validating or loading a [`StoreConfig`](crate::config::StoreConfig).
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The write queue must be able to hold at least one request.
    #[error("invalid write queue capacity: {capacity} (must be > 0)")]
    InvalidQueueCapacity {
        /// The rejected capacity.
        capacity: usize,
    },

    /// The persistence path names a directory rather than a file.
    #[error("persistence path '{}' is a directory", path.display())]
    PathIsDirectory {
        /// The rejected path.
        path: PathBuf,
    },

    /// The configuration file could not be read.
    #[error("failed to read config file '{}': {source}", path.display())]
    Load {
        /// The config file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON for a store config.
    #[error("failed to parse config file '{}': {source}", path.display())]
    Parse {
        /// The config file path.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

/// Type alias for `Result<T, PushstoreError>`.
pub type Result<T> = std::result::Result<T, PushstoreError>;

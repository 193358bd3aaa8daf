/* src/error.rs */

use std::path::PathBuf;
use std::process::ExitStatus;
use thiserror::Error;

/// A record type tag or value that fails validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("unknown record type: {0}")]
    UnknownType(String),

    #[error("invalid {record_type} record {value:?}: {reason}")]
    InvalidValue {
        record_type: &'static str,
        value: String,
        reason: String,
    },
}

impl RecordError {
    pub(crate) fn invalid(
        record_type: &'static str,
        value: &str,
        reason: impl Into<String>,
    ) -> Self {
        RecordError::InvalidValue {
            record_type,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ZoneError {
    #[error("invalid zone origin: {0}")]
    InvalidOrigin(String),

    #[error("invalid record owner name: {0:?}")]
    InvalidOwner(String),

    #[error("invalid SOA {field}: {value}")]
    InvalidSoa { field: &'static str, value: String },

    #[error("zone {zone}: {field} of {value}s exceeds the maximum of {max}s")]
    TimerOutOfRange {
        zone: String,
        field: &'static str,
        value: u32,
        max: u32,
    },

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error("failed to write zone data: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("zone {0} not found")]
    ZoneNotFound(i64),

    #[error("record {0} not found")]
    RecordNotFound(i64),

    #[error("store query timed out")]
    Timeout,

    #[error("failed to load store seed {path:?}: {reason}")]
    Seed { path: PathBuf, reason: String },

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error(transparent)]
    Zone(#[from] ZoneError),
}

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} exited with {status}: {output}")]
    Failed {
        command: String,
        status: ExitStatus,
        output: String,
    },

    #[error("{command} timed out")]
    Timeout { command: String },
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("unknown nameserver group: {0}")]
    UnknownNameserverGroup(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Zone(#[from] ZoneError),

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error(transparent)]
    Daemon(#[from] DaemonError),

    #[error("failed to stage {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum CommitError {
    #[error("commit transaction failed: {0}")]
    Store(#[from] StoreError),

    #[error("generation after commit failed: {0}")]
    Build(#[from] BuildError),

    #[error("notify failed: {0}")]
    Daemon(#[from] DaemonError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access config {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("could not find home directory")]
    NoHomeDir,
}

//! Error types for the state layer.
//!
//! Each subsystem has its own error enum so callers can tell a broken
//! configuration file apart from a lock that could not be taken. The
//! [`StateError`] enum wraps all of them for the operations exposed on
//! [`StateContext`](crate::StateContext).

use std::path::PathBuf;
use thiserror::Error;

use crate::shared::LockLevel;

/// Errors raised while loading configuration files (presets, plugin confs).
#[derive(Error, Debug)]
pub enum ConfError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Recursive include of {0}")]
    RecursiveInclude(PathBuf),

    #[error("Section \"{0}\" is declared more than once")]
    DuplicateSection(String),

    #[error("Section \"{section}\" inherits from unknown section \"{parent}\"")]
    UnknownParent { section: String, parent: String },

    #[error("Cyclic inheritance: {}", .0.join(" -> "))]
    CyclicInheritance(Vec<String>),

    #[error("Invalid configuration ({})", describe_validation(.invalid, .missing))]
    Validation {
        invalid: Vec<String>,
        missing: Vec<String>,
    },

    #[error("Unknown preset \"{0}\"")]
    UnknownPreset(String),

    #[error("Unknown reference(s): {}", .0.join(", "))]
    UnknownReference(Vec<String>),

    #[error("Table error in {path}: {source}")]
    Table {
        path: PathBuf,
        #[source]
        source: TableError,
    },
}

fn describe_validation(invalid: &[String], missing: &[String]) -> String {
    let mut parts = Vec::new();
    if !invalid.is_empty() {
        parts.push(format!("invalid value for {}", invalid.join(", ")));
    }
    if !missing.is_empty() {
        parts.push(format!("missing {}", missing.join(", ")));
    }
    parts.join("; ")
}

/// Errors raised by the table serialization engine.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum TableError {
    #[error("Invalid pattern on line {line}: {reason}")]
    InvalidPattern { line: usize, reason: String },

    #[error("Malformed record on line {line}: {reason}")]
    MalformedRecord { line: usize, reason: String },
}

/// Errors raised by the shared-data synchronization manager.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unable to acquire {level:?} lock on {path}")]
    LockFailed { path: PathBuf, level: LockLevel },

    #[error("Update of {0} attempted without holding its reserved lock")]
    NotLocked(PathBuf),

    #[error("Unable to decode {path}: {reason}")]
    Decode { path: PathBuf, reason: String },

    #[error("Unable to encode {name}: {reason}")]
    Encode { name: &'static str, reason: String },
}

/// Errors raised by the sqlite preference store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Runtime error: {0}")]
    Runtime(#[from] std::io::Error),

    #[error("Sqlite preferences must be opened outside of an async runtime, use spawn_blocking")]
    InsideRuntime,

    #[error("Schema migration failed: {0}")]
    Schema(String),
}

/// Errors returned by the collaborator-facing operations of the context.
#[derive(Error, Debug)]
pub enum StateError {
    #[error(transparent)]
    Conf(#[from] ConfError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Unknown preference \"{0}\"")]
    UnknownPreference(String),

    #[error("Invalid value \"{value}\" for {field}")]
    InvalidValue { field: String, value: String },

    #[error("Value \"{value}\" is not allowed for setting {param}")]
    NotAllowed { param: String, value: String },
}

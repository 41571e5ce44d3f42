//! Error types for Plugflow.
//!
//! All errors in Plugflow are represented by the `PlugflowError` enum,
//! which provides specific variants for different error categories.
//!
//! Failures of a single iteration item are not errors: handlers record them
//! in their outputs as `{index, error}` so sibling items keep going.

use std::{io::ErrorKind, string::FromUtf8Error};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for all Plugflow operations.
#[derive(Deserialize, Serialize, Error, Debug, Clone, PartialEq)]
pub enum PlugflowError {
    /// Engine-level errors (startup, shutdown, wiring).
    #[error("{0}")]
    Engine(String),

    /// Configuration parsing or validation errors.
    #[error("{0}")]
    Config(String),

    /// Data conversion errors (JSON, TOML).
    #[error("{0}")]
    Convert(String),

    /// The workflow graph is cyclic or malformed; it must not be scheduled.
    #[error("validation error: {0}")]
    Validation(String),

    /// Workflow definition errors.
    #[error("{0}")]
    Workflow(String),

    /// Node definition errors.
    #[error("{0}")]
    Node(String),

    /// Edge definition errors.
    #[error("{0}")]
    Edge(String),

    /// A node handler failed in a way that aborts the whole job.
    #[error("{0}")]
    Handler(String),

    /// The external binary failed or timed out.
    #[error("entrypoint failed: {0}")]
    Entrypoint(String),

    /// An exporter rejected its input.
    #[error("exporter error: {0}")]
    Exporter(String),

    /// Object storage errors.
    #[error("{0}")]
    Storage(String),

    /// Repository / status store errors.
    #[error("{0}")]
    Store(String),

    /// Worker pool errors.
    #[error("{0}")]
    Pool(String),

    /// Message queue errors.
    #[error("{0}")]
    Queue(String),

    /// I/O operation errors.
    #[error("{0}")]
    IoError(String),

    /// Runtime execution errors.
    #[error("{0}")]
    Runtime(String),
}

impl From<PlugflowError> for String {
    fn from(val: PlugflowError) -> Self {
        val.to_string()
    }
}

impl From<std::io::Error> for PlugflowError {
    fn from(error: std::io::Error) -> Self {
        PlugflowError::IoError(error.to_string())
    }
}

impl From<PlugflowError> for std::io::Error {
    fn from(val: PlugflowError) -> Self {
        #[allow(clippy::io_other_error)]
        std::io::Error::new(ErrorKind::Other, val.to_string())
    }
}

impl From<FromUtf8Error> for PlugflowError {
    fn from(_: FromUtf8Error) -> Self {
        PlugflowError::Runtime("Error with utf-8 string convert".to_string())
    }
}

impl From<serde_json::Error> for PlugflowError {
    fn from(error: serde_json::Error) -> Self {
        PlugflowError::Convert(error.to_string())
    }
}

impl From<toml::de::Error> for PlugflowError {
    fn from(error: toml::de::Error) -> Self {
        PlugflowError::Config(error.to_string())
    }
}

impl From<jsonschema::ValidationError<'_>> for PlugflowError {
    fn from(error: jsonschema::ValidationError<'_>) -> Self {
        PlugflowError::Validation(error.to_string())
    }
}

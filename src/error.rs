//! Error types for benchtree
//!
//! Contract violations (leaf/composite misuse, double suppression) panic and
//! never show up here. Task body failures are captured as [`TaskFailure`] on the
//! task itself. Everything else that a caller can act on is a [`BenchError`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by decoding, configuration, sampling and rendering
#[derive(Error, Debug)]
pub enum BenchError {
    #[error("Failed to decode benchmark document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to inflate gzip-compressed profile: {0}")]
    Decompress(std::io::Error),

    #[error("Failed to decode profile: {0}")]
    ProfileDecode(#[from] prost::DecodeError),

    #[error("Malformed profile: {0}")]
    MalformedProfile(String),

    #[error("Failed to parse TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Sampler error: {0}")]
    Sampler(String),

    #[error("Failed to execute dot. Is Graphviz installed? {0}")]
    GraphLayout(String),
}

/// Result type for benchtree operations
pub type Result<T> = std::result::Result<T, BenchError>;

/// Failure returned by a task body
///
/// Holds the rendered error chain so that a failed task survives a JSON
/// round trip unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{0}")]
#[serde(transparent)]
pub struct TaskFailure(String);

impl TaskFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

impl From<anyhow::Error> for TaskFailure {
    fn from(err: anyhow::Error) -> Self {
        Self(format!("{:#}", err))
    }
}

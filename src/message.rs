//! Tagged diagnostic messages attached to a task
//!
//! A task's message log is append-only and keeps insertion order. `Opt`
//! entries are free-form performance annotations rather than log lines.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Severity or category of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    #[serde(rename = "MsgError")]
    Error,
    #[serde(rename = "MsgInfo")]
    Info,
    #[serde(rename = "MsgDebug")]
    Debug,
    #[serde(rename = "MsgOpt")]
    Opt,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Error => "MsgError",
            MessageKind::Info => "MsgInfo",
            MessageKind::Debug => "MsgDebug",
            MessageKind::Opt => "MsgOpt",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MsgError" => Ok(MessageKind::Error),
            "MsgInfo" => Ok(MessageKind::Info),
            "MsgDebug" => Ok(MessageKind::Debug),
            "MsgOpt" => Ok(MessageKind::Opt),
            other => Err(format!("invalid message kind {}", other)),
        }
    }
}

/// A single message in a task's log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Message {
    pub kind: MessageKind,
    pub text: String,
}

impl Message {
    pub fn new(kind: MessageKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }
}

/// Append an error message with a format template: `task_error!(t, "lost {} rows", n)`
#[macro_export]
macro_rules! task_error {
    ($task:expr, $($arg:tt)+) => {
        $task.error(format_args!($($arg)+))
    };
}

/// Append an info message with a format template
#[macro_export]
macro_rules! task_info {
    ($task:expr, $($arg:tt)+) => {
        $task.info(format_args!($($arg)+))
    };
}

/// Append a debug message with a format template
#[macro_export]
macro_rules! task_debug {
    ($task:expr, $($arg:tt)+) => {
        $task.debug(format_args!($($arg)+))
    };
}

//! Errors raised by task targets and their classification.

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// ErrorKind は失敗の分類。リトライ対象の判定に使う。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connection,
    Timeout,
    Io,
    InvalidInput,
    Panicked,
    Other,
}

/// Failure reported by a task target.
///
/// Cloneable so the last one can be kept on the task for status reporting
/// while also being handed to middleware for logging.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("i/o error: {0}")]
    Io(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("target panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Other(String),
}

impl TaskError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout(message.into())
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            TaskError::Connection(_) => ErrorKind::Connection,
            TaskError::Timeout(_) => ErrorKind::Timeout,
            TaskError::Io(_) => ErrorKind::Io,
            TaskError::InvalidInput(_) => ErrorKind::InvalidInput,
            TaskError::Panicked(_) => ErrorKind::Panicked,
            TaskError::Other(_) => ErrorKind::Other,
        }
    }
}

impl From<io::Error> for TaskError {
    fn from(err: io::Error) -> Self {
        let message = err.to_string();
        match err.kind() {
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe => TaskError::Connection(message),
            io::ErrorKind::TimedOut => TaskError::Timeout(message),
            io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData => {
                TaskError::InvalidInput(message)
            }
            _ => TaskError::Io(message),
        }
    }
}

impl From<serde_json::Error> for TaskError {
    fn from(err: serde_json::Error) -> Self {
        TaskError::InvalidInput(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(io::ErrorKind::ConnectionRefused, ErrorKind::Connection)]
    #[case(io::ErrorKind::ConnectionReset, ErrorKind::Connection)]
    #[case(io::ErrorKind::TimedOut, ErrorKind::Timeout)]
    #[case(io::ErrorKind::InvalidData, ErrorKind::InvalidInput)]
    #[case(io::ErrorKind::NotFound, ErrorKind::Io)]
    fn io_errors_are_classified(#[case] io_kind: io::ErrorKind, #[case] expected: ErrorKind) {
        let err = TaskError::from(io::Error::new(io_kind, "boom"));
        assert_eq!(err.kind(), expected);
    }

    #[test]
    fn display_keeps_message() {
        let err = TaskError::connection("router unreachable");
        assert_eq!(err.to_string(), "connection error: router unreachable");
    }

    #[test]
    fn json_errors_are_invalid_input() {
        let err: TaskError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }
}

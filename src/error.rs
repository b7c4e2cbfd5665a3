//! Error types for the CDC agent.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CdcError {
    /// MySQL connection or protocol failure (either session).
    #[error("MySQL error: {0}")]
    MySql(String),

    /// Replication stream failure: dump protocol or event decoding.
    #[error("Replication error: {0}")]
    Replication(String),

    /// Schema catalog failure.
    #[error("Schema error: {0}")]
    Schema(String),

    /// Invalid or incomplete configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The downstream sink refused an event.
    #[error("Sink error: {0}")]
    Sink(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CdcError {
    pub fn mysql(msg: impl Into<String>) -> Self {
        Self::MySql(msg.into())
    }

    pub fn replication(msg: impl Into<String>) -> Self {
        Self::Replication(msg.into())
    }

    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn sink(msg: impl Into<String>) -> Self {
        Self::Sink(msg.into())
    }

    pub(crate) fn from_mysql(e: mysql_async::Error) -> Self {
        Self::MySql(e.to_string())
    }

    /// Whether the controller should retry after this error. Connection and
    /// stream failures are retried indefinitely; configuration, schema
    /// interpretation, and serialization failures are not.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::MySql(_) | Self::Replication(_) => true,
            Self::Io(e) => {
                use std::io::ErrorKind;
                matches!(
                    e.kind(),
                    ErrorKind::ConnectionReset
                        | ErrorKind::ConnectionAborted
                        | ErrorKind::TimedOut
                        | ErrorKind::Interrupted
                        | ErrorKind::UnexpectedEof
                )
            }
            Self::Schema(_) | Self::Config(_) | Self::Sink(_) | Self::Json(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, CdcError>;

//! Resolved agent configuration.
//!
//! The agent does not read configuration files itself; whatever loads them
//! hands over an already-resolved `CdcConfig` (connection endpoint, start
//! point, include sets, stop position, checkpoint target).

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::binlog::header::EventType;
use crate::checkpoint::Position;
use crate::error::{CdcError, Result};

/// Configuration consumed by [`BinlogAgent`](crate::source::BinlogAgent).
#[derive(Clone)]
pub struct CdcConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    /// Default database for both sessions (optional).
    pub database: Option<String>,
    /// Server id advertised in `COM_BINLOG_DUMP`; must be non-zero and
    /// unique among the master's replicas.
    pub server_id: u32,
    /// Start point. An empty file name means "ask the master"
    /// (`SHOW MASTER STATUS`).
    pub binlog_file: String,
    pub binlog_position: u32,
    /// Databases to deliver events for; empty means all.
    pub databases: HashSet<String>,
    /// Event types to deliver; events of other types are dropped.
    pub event_types: HashSet<EventType>,
    /// Stop and close once the stream reaches this position.
    pub max_position: Option<Position>,
    /// Checkpoint file for the current `"<file>:<position>"`.
    pub checkpoint_path: Option<PathBuf>,
    pub checkpoint_interval: Duration,
}

impl std::fmt::Debug for CdcConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CdcConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("database", &self.database)
            .field("server_id", &self.server_id)
            .field("binlog_file", &self.binlog_file)
            .field("binlog_position", &self.binlog_position)
            .field("databases", &self.databases)
            .field("event_types", &self.event_types)
            .field("max_position", &self.max_position)
            .field("checkpoint_path", &self.checkpoint_path)
            .field("checkpoint_interval", &self.checkpoint_interval)
            .finish()
    }
}

impl Default for CdcConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3306,
            user: "root".to_string(),
            password: None,
            database: None,
            server_id: 1001,
            binlog_file: String::new(),
            binlog_position: 4,
            databases: HashSet::new(),
            event_types: HashSet::new(),
            max_position: None,
            checkpoint_path: None,
            checkpoint_interval: Duration::from_secs(1),
        }
    }
}

impl CdcConfig {
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            ..Default::default()
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn with_server_id(mut self, server_id: u32) -> Self {
        self.server_id = server_id;
        self
    }

    pub fn with_start_position(mut self, file: impl Into<String>, position: u32) -> Self {
        self.binlog_file = file.into();
        self.binlog_position = position;
        self
    }

    pub fn with_stop_position(mut self, file: impl Into<String>, position: u32) -> Self {
        self.max_position = Some(Position::new(file, position));
        self
    }

    /// Restrict delivery to one database (additive).
    pub fn watch_database(mut self, database: impl Into<String>) -> Self {
        self.databases.insert(database.into());
        self
    }

    /// Subscribe to one event type (additive).
    pub fn subscribe(mut self, event_type: EventType) -> Self {
        self.event_types.insert(event_type);
        self
    }

    /// Subscribe to all row events (write/update/delete, v0 through v2).
    pub fn subscribe_rows(mut self) -> Self {
        for t in [
            EventType::WriteRowsV0,
            EventType::WriteRowsV1,
            EventType::WriteRowsV2,
            EventType::UpdateRowsV0,
            EventType::UpdateRowsV1,
            EventType::UpdateRowsV2,
            EventType::DeleteRowsV0,
            EventType::DeleteRowsV1,
            EventType::DeleteRowsV2,
        ] {
            self.event_types.insert(t);
        }
        self
    }

    pub fn with_checkpoint(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint_path = Some(path.into());
        self
    }

    pub fn with_checkpoint_interval(mut self, interval: Duration) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.server_id == 0 {
            return Err(CdcError::config("server_id must be non-zero"));
        }
        if self.host.is_empty() {
            return Err(CdcError::config("host must not be empty"));
        }
        if self.event_types.is_empty() {
            return Err(CdcError::config(
                "no event types subscribed; nothing would ever be delivered",
            ));
        }
        Ok(())
    }
}

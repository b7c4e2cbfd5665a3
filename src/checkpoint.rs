//! Position tracking and checkpoint persistence.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{CdcError, Result};

/// A resumable point in the binlog stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Position {
    pub file: String,
    pub position: u32,
}

impl Position {
    pub fn new(file: impl Into<String>, position: u32) -> Self {
        Self {
            file: file.into(),
            position,
        }
    }

    /// True before any start point is known.
    pub fn is_empty(&self) -> bool {
        self.file.is_empty()
    }

    /// Parse the checkpoint format `"<file>:<position>"`.
    pub fn parse(s: &str) -> Result<Self> {
        let (file, position) = s
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| CdcError::config(format!("invalid checkpoint {s:?}")))?;
        let position = position
            .parse()
            .map_err(|_| CdcError::config(format!("invalid checkpoint offset in {s:?}")))?;
        if file.is_empty() {
            return Err(CdcError::config(format!("empty file name in {s:?}")));
        }
        Ok(Self::new(file, position))
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.position)
    }
}

/// Checkpoint file holding a single `"<file>:<position>"` line,
/// truncate-written on every update.
pub struct PositionFile {
    path: PathBuf,
}

impl PositionFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn write(&self, line: &str) -> Result<()> {
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o777);
        let mut file = options.open(&self.path).await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    pub async fn read(&self) -> Result<Position> {
        let contents = tokio::fs::read_to_string(&self.path).await?;
        Position::parse(&contents)
    }
}

/// Optional external coordinator mirroring the checkpoint (the
/// high-availability wrapper's slot). The core only ever calls `publish`.
#[async_trait]
pub trait PositionCoordinator: Send + Sync {
    async fn publish(&self, position: &str) -> Result<()>;
}

/// Deduplicating writer used by the periodic checkpoint task: persists only
/// when the formatted position actually changed.
pub struct CheckpointWriter {
    file: Option<PositionFile>,
    coordinator: Option<Arc<dyn PositionCoordinator>>,
    last: Option<String>,
}

impl CheckpointWriter {
    pub fn new(
        path: Option<PathBuf>,
        coordinator: Option<Arc<dyn PositionCoordinator>>,
    ) -> Self {
        Self {
            file: path.map(PositionFile::new),
            coordinator,
            last: None,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.file.is_none() && self.coordinator.is_none()
    }

    pub async fn sync(&mut self, position: &Position) -> Result<()> {
        let formatted = position.to_string();
        if self.last.as_deref() == Some(formatted.as_str()) {
            return Ok(());
        }
        if let Some(file) = &self.file {
            file.write(&formatted).await?;
        }
        if let Some(coordinator) = &self.coordinator {
            coordinator.publish(&formatted).await?;
        }
        debug!(position = %formatted, "checkpoint persisted");
        self.last = Some(formatted);
        Ok(())
    }
}

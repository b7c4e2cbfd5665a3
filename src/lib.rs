//! # binrelay — MySQL/MariaDB binlog CDC agent
//!
//! `binrelay` impersonates a replication slave: it issues `COM_BINLOG_DUMP`,
//! streams the master's row-based binary log, decodes every data
//! modification into rows keyed by the source table's column names (resolved
//! live from `information_schema` over a second session), and hands each
//! event to an in-process sink. The current `(file, position)` is
//! checkpointed so a restart resumes exactly where it stopped.
//!
//! ## Architecture
//!
//! ```text
//! MySQL master ──dump session──▶ BinlogParser ──filter──▶ EventSink
//!       │                           ▲
//!       └──schema session───────────┘   (column names, types, literals)
//!
//! BinlogAgent: lifecycle, reconnect, watchdog, checkpoint task
//! ```
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use binrelay::{BinlogAgent, CdcConfig, ChannelSink, EventType};
//!
//! # async fn example() -> binrelay::Result<()> {
//! let (tx, mut rx) = tokio::sync::mpsc::channel(1024);
//!
//! let config = CdcConfig::new("127.0.0.1", "repl")
//!     .with_password("secret")
//!     .with_server_id(4242)
//!     .subscribe_rows()
//!     .subscribe(EventType::Query)
//!     .with_checkpoint("/var/lib/binrelay/dump.pos");
//!
//! let agent = BinlogAgent::new(config, Arc::new(ChannelSink::new(tx)));
//! agent.start()?;
//!
//! while let Some(event) = rx.recv().await {
//!     println!("{}.{} {:?}", event.schema, event.table, event.kind());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! To resume from a previous run, load the checkpoint file into the start
//! position: `CdcConfig::with_start_position` accepts the two halves of
//! [`Position::parse`]'s result.
//!
//! Delivery is at-least-once: after a crash the last delivered event may be
//! replayed, so sinks must be idempotent.

pub mod binlog;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod event;
pub mod filter;
pub mod protocol;
pub mod schema;
pub mod source;

pub use binlog::decoder::{
    alter_table_target, BinlogParser, ColumnType, FormatDescription, TableMap,
};
pub use binlog::header::{EventHeader, EventType};
pub use binlog::value::{ColumnValue, Row, RowPair};
pub use checkpoint::{CheckpointWriter, Position, PositionCoordinator, PositionFile};
pub use config::CdcConfig;
pub use error::{CdcError, Result};
pub use event::{ChangeEvent, ChannelSink, EventKind, EventSink, FnSink};
pub use filter::EventFilter;
pub use schema::{ColumnSchema, ConnectionInfo, SchemaClient};
pub use source::{BinlogAgent, DumpCommand, Status};

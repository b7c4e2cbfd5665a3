//! Replication controller.
//!
//! [`BinlogAgent`] owns the whole lifecycle: it bootstraps a dump session,
//! drives the packet loop, filters and delivers decoded events, and keeps
//! reconnecting until it is closed. A watchdog task probes the dump
//! connection through the schema session, and a checkpoint task persists the
//! current position once a second.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::anyhow;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::binlog::decoder::{alter_table_target, BinlogParser};
use crate::binlog::header::EventType;
use crate::checkpoint::{CheckpointWriter, Position, PositionCoordinator};
use crate::config::CdcConfig;
use crate::error::Result;
use crate::event::EventSink;
use crate::filter::EventFilter;
use crate::protocol::{DumpConn, DumpPacket};
use crate::schema::SchemaClient;

const RECONNECT_DELAY: Duration = Duration::from_secs(2);
const PAUSE_POLL: Duration = Duration::from_secs(1);
const WATCHDOG_INTERVAL: Duration = Duration::from_secs(9);
const WATCHDOG_MISSES: u32 = 3;

/// The one dump-protocol error that is not worth retrying: the requested
/// file is gone from the master's index.
const FATAL_DUMP_ERROR: &str = "Could not find first log file name in binary log index file";

/// Observable agent state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Starting = 0,
    Running = 1,
    Stop = 2,
    Close = 3,
    Error = 4,
}

impl Status {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Status::Starting,
            1 => Status::Running,
            3 => Status::Close,
            4 => Status::Error,
            _ => Status::Stop,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Starting => "starting",
            Status::Running => "running",
            Status::Stop => "stop",
            Status::Close => "close",
            Status::Error => "error",
        };
        f.write_str(s)
    }
}

/// Command register steering the dump loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DumpCommand {
    /// Idle without dropping the connection.
    Pause = 0,
    Run = 1,
    /// Finish the current event and shut down for good.
    Close = 2,
    /// Close hard, killing the server-side dump thread.
    Kill = 3,
}

impl DumpCommand {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => DumpCommand::Pause,
            2 => DumpCommand::Close,
            3 => DumpCommand::Kill,
            _ => DumpCommand::Run,
        }
    }
}

/// State shared between the dump loop, the watchdog, the checkpoint task,
/// and the control API. The dump loop is the only position writer.
struct Shared {
    status: AtomicU8,
    command: AtomicU8,
    connection_id: AtomicU32,
    position: RwLock<Position>,
    shutdown: Notify,
}

impl Shared {
    fn status(&self) -> Status {
        Status::from_u8(self.status.load(Ordering::SeqCst))
    }

    fn set_status(&self, status: Status) {
        self.status.store(status as u8, Ordering::SeqCst);
        debug!(%status, "agent status");
    }

    fn command(&self) -> DumpCommand {
        DumpCommand::from_u8(self.command.load(Ordering::SeqCst))
    }

    fn set_command(&self, command: DumpCommand) {
        self.command.store(command as u8, Ordering::SeqCst);
    }

    fn position(&self) -> Position {
        self.position
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn set_position(&self, position: Position) {
        *self.position.write().unwrap_or_else(|e| e.into_inner()) = position;
    }
}

enum LoopExit {
    Reconnect,
    Close,
    Kill,
}

/// MySQL/MariaDB binlog CDC agent.
pub struct BinlogAgent {
    config: CdcConfig,
    sink: Arc<dyn EventSink>,
    schema: Arc<SchemaClient>,
    coordinator: Option<Arc<dyn PositionCoordinator>>,
    shared: Arc<Shared>,
    started: AtomicBool,
}

impl BinlogAgent {
    pub fn new(config: CdcConfig, sink: Arc<dyn EventSink>) -> Self {
        let schema = Arc::new(SchemaClient::new(&config));
        let shared = Arc::new(Shared {
            status: AtomicU8::new(Status::Stop as u8),
            command: AtomicU8::new(DumpCommand::Run as u8),
            connection_id: AtomicU32::new(0),
            position: RwLock::new(Position::new(
                config.binlog_file.clone(),
                config.binlog_position,
            )),
            shutdown: Notify::new(),
        });
        Self {
            config,
            sink,
            schema,
            coordinator: None,
            shared,
            started: AtomicBool::new(false),
        }
    }

    /// Mirror checkpoints to an external coordinator as well.
    pub fn with_coordinator(mut self, coordinator: Arc<dyn PositionCoordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    pub fn status(&self) -> Status {
        self.shared.status()
    }

    /// Snapshot of the current read position.
    pub fn position(&self) -> Position {
        self.shared.position()
    }

    /// Validate the configuration and launch the controller tasks. Calling
    /// `start` on a running agent is a no-op.
    pub fn start(&self) -> Result<()> {
        self.config.validate()?;
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.shared.set_command(DumpCommand::Run);

        let writer = CheckpointWriter::new(self.config.checkpoint_path.clone(), self.coordinator.clone());
        if !writer.is_noop() {
            tokio::spawn(checkpoint_loop(
                self.shared.clone(),
                writer,
                self.config.checkpoint_interval,
            ));
        }

        tokio::spawn(run_loop(
            self.config.clone(),
            self.sink.clone(),
            self.schema.clone(),
            self.shared.clone(),
        ));
        Ok(())
    }

    /// Pause delivery without dropping the dump connection.
    pub fn stop(&self) {
        self.shared.set_command(DumpCommand::Pause);
    }

    /// Resume after [`stop`](Self::stop).
    pub fn resume(&self) {
        self.shared.set_command(DumpCommand::Run);
    }

    /// Shut down for good. The dump loop exits at its next iteration or its
    /// next blocked read.
    pub fn close(&self) {
        self.shared.set_command(DumpCommand::Close);
        self.shared.shutdown.notify_waiters();
    }

    /// Hard stop: also `KILL`s the server-side dump thread via the schema
    /// session.
    pub async fn kill_dump(&self) {
        self.shared.set_command(DumpCommand::Kill);
        let id = self.shared.connection_id.load(Ordering::SeqCst);
        if id != 0 {
            self.schema.kill(id).await;
        }
        self.shared.shutdown.notify_waiters();
    }
}

async fn run_loop(
    config: CdcConfig,
    sink: Arc<dyn EventSink>,
    schema: Arc<SchemaClient>,
    shared: Arc<Shared>,
) {
    loop {
        match shared.command() {
            DumpCommand::Close | DumpCommand::Kill => {
                shared.set_status(Status::Close);
                break;
            }
            _ => {}
        }

        shared.set_status(Status::Starting);
        match dump_once(&config, &sink, &schema, &shared).await {
            Ok(LoopExit::Close) | Ok(LoopExit::Kill) => {
                shared.set_status(Status::Close);
                break;
            }
            Ok(LoopExit::Reconnect) => shared.set_status(Status::Stop),
            Err(e) => {
                error!(error = %format!("{e:#}"), "dump session failed");
                shared.set_status(Status::Error);
            }
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
    info!("replication controller stopped");
}

/// One connection attempt: bootstrap, then the dump loop until it ends.
async fn dump_once(
    config: &CdcConfig,
    sink: &Arc<dyn EventSink>,
    schema: &Arc<SchemaClient>,
    shared: &Arc<Shared>,
) -> anyhow::Result<LoopExit> {
    let mut conn = DumpConn::connect(
        &config.host,
        config.port,
        &config.user,
        config.password.as_deref(),
        config.database.as_deref(),
    )
    .await?;
    shared
        .connection_id
        .store(conn.connection_id(), Ordering::SeqCst);

    // No start point configured or persisted: take the master's current one.
    if shared.position().is_empty() {
        let (file, position) = schema.master_status().await?;
        info!(file = %file, position, "start position from SHOW MASTER STATUS");
        shared.set_position(Position::new(file, position));
    }

    // Checksum negotiation, latched once for the whole session.
    let mut parser = BinlogParser::new();
    match schema.binlog_checksum_enabled().await {
        Ok(true) => {
            conn.query("SET @master_binlog_checksum = @@global.binlog_checksum")
                .await?;
            parser.set_checksum(true);
            debug!("binlog checksum enabled, stripping CRC trailers");
        }
        Ok(false) => {}
        Err(e) => warn!(error = %e, "checksum probe failed, assuming no checksum"),
    }

    let start = shared.position();
    parser.set_position(start.file.clone(), start.position);
    let filter = EventFilter::from_config(config);

    let mut stream = conn
        .binlog_dump(config.server_id, &start.file, start.position)
        .await?;
    let watchdog = tokio::spawn(watchdog_loop(schema.clone(), shared.clone()));
    shared.set_status(Status::Running);

    let exit = loop {
        match shared.command() {
            DumpCommand::Pause => {
                tokio::time::sleep(PAUSE_POLL).await;
                continue;
            }
            DumpCommand::Close => break LoopExit::Close,
            DumpCommand::Kill => break LoopExit::Kill,
            DumpCommand::Run => {}
        }

        let packet = tokio::select! {
            _ = shared.shutdown.notified() => {
                break match shared.command() {
                    DumpCommand::Close => LoopExit::Close,
                    DumpCommand::Kill => LoopExit::Kill,
                    _ => LoopExit::Reconnect,
                };
            }
            packet = stream.next_event() => packet?,
        };

        match packet {
            DumpPacket::Eof => {
                warn!("dump stream ended with EOF");
                break LoopExit::Reconnect;
            }
            DumpPacket::Err { code, message } => {
                error!(code, message = %message, "binlog dump error");
                if message.contains(FATAL_DUMP_ERROR) {
                    break LoopExit::Close;
                }
                continue;
            }
            DumpPacket::Unknown { header, hex } => {
                error!(header, "unknown dump packet:\n{hex}");
                continue;
            }
            DumpPacket::Event(data) => {
                let Some(mut event) = parser.decode(&data)? else {
                    continue;
                };

                // Resolve column schemas for freshly mapped tables before
                // the row events that follow them.
                for (table_id, db, table) in parser.missing_schemas() {
                    let columns = schema.get_columns_retry(&db, &table).await;
                    parser.install_schema(table_id, columns);
                }

                // DDL invalidates the cached schema of the altered table.
                if event.header.event_type == EventType::Query {
                    if let Some((db, table)) =
                        event.query.as_deref().and_then(alter_table_target)
                    {
                        if !db.is_empty() {
                            event.schema = db;
                        }
                        event.table = table;
                        if let Some(table_id) = parser.table_id_for(&event.schema, &event.table) {
                            info!(schema = %event.schema, table = %event.table, "refreshing schema after ALTER TABLE");
                            let columns =
                                schema.get_columns_retry(&event.schema, &event.table).await;
                            parser.install_schema(table_id, columns);
                        }
                    }
                }

                if !filter.allows_database(&event.schema) {
                    continue;
                }
                if !filter.subscribes(event.header.event_type) {
                    continue;
                }
                if filter.reached_stop(&event.binlog_file, event.binlog_position) {
                    info!(
                        file = %event.binlog_file,
                        position = event.binlog_position,
                        "configured stop position reached"
                    );
                    shared.set_command(DumpCommand::Close);
                    break LoopExit::Close;
                }

                // The sink sees the event before the position moves past it.
                let after = Position::new(event.binlog_file.clone(), event.binlog_position);
                sink.deliver(event)
                    .await
                    .map_err(|e| anyhow!("sink delivery failed: {e}"))?;
                shared.set_position(after);
            }
        }
    };

    watchdog.abort();
    drop(stream);
    Ok(exit)
}

/// Probe the dump connection through the schema session; after three
/// consecutive empty probes, force the blocked dump read to unwind so the
/// controller reconnects.
async fn watchdog_loop(schema: Arc<SchemaClient>, shared: Arc<Shared>) {
    let mut misses = 0u32;
    loop {
        tokio::time::sleep(WATCHDOG_INTERVAL).await;
        if matches!(shared.command(), DumpCommand::Close | DumpCommand::Kill) {
            break;
        }
        let id = shared.connection_id.load(Ordering::SeqCst);
        if id == 0 {
            continue;
        }
        match schema.connection_info(id).await {
            Ok(Some(info)) => {
                misses = 0;
                debug!(connection_id = id, time = info.time, "dump connection alive");
            }
            Ok(None) => {
                misses += 1;
                warn!(connection_id = id, misses, "dump connection missing from PROCESSLIST");
            }
            Err(e) => {
                misses += 1;
                warn!(connection_id = id, misses, error = %e, "watchdog probe failed");
            }
        }
        if misses >= WATCHDOG_MISSES {
            warn!(connection_id = id, "dump connection presumed dead, forcing reconnect");
            shared.shutdown.notify_waiters();
            break;
        }
    }
}

/// Once per interval, persist the position if it changed. Never touches the
/// dump loop; it only reads the shared snapshot.
async fn checkpoint_loop(shared: Arc<Shared>, mut writer: CheckpointWriter, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;
        let position = shared.position();
        if !position.is_empty() {
            if let Err(e) = writer.sync(&position).await {
                warn!(error = %e, "checkpoint write failed");
            }
        }
        if shared.status() == Status::Close {
            break;
        }
    }
    debug!("checkpoint task stopped");
}

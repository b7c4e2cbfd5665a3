//! Decoded change events and the sink contract.

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::binlog::header::{EventHeader, EventType};
use crate::binlog::value::RowPair;
use crate::error::{CdcError, Result};

/// One decoded binlog event, as handed to the sink.
///
/// `binlog_position` is the offset *after* the event (the header's
/// next-position field; for a rotate, the position of the first event in the
/// next file), so persisting it resumes the stream without re-reading this
/// event.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeEvent {
    pub header: EventHeader,
    pub binlog_file: String,
    pub binlog_position: u32,
    /// Database name; empty for events without one (XID, rotate, ...).
    pub schema: String,
    pub table: String,
    /// Statement text, for QUERY events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    /// Row images, for WRITE/UPDATE/DELETE events.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rows: Vec<RowPair>,
    /// Name of the first column with `COLUMN_KEY = 'PRI'`, when one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary: Option<String>,
}

/// Coarse classification of an event for sink-side dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventKind {
    Insert,
    Update,
    Delete,
    Query,
    Rotate,
    Other,
}

impl ChangeEvent {
    pub fn kind(&self) -> EventKind {
        let t = self.header.event_type;
        if t.is_write() {
            EventKind::Insert
        } else if t.is_update() {
            EventKind::Update
        } else if t.is_delete() {
            EventKind::Delete
        } else {
            match t {
                EventType::Query => EventKind::Query,
                EventType::Rotate => EventKind::Rotate,
                _ => EventKind::Other,
            }
        }
    }

    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Downstream consumer of decoded events.
///
/// Delivery is awaited before the agent's position advances, so a sink that
/// persists events synchronously gets at-least-once semantics across
/// restarts; consumers must tolerate a replayed tail event.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn deliver(&self, event: ChangeEvent) -> Result<()>;
}

/// Sink forwarding into a tokio channel.
pub struct ChannelSink {
    tx: mpsc::Sender<ChangeEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<ChangeEvent>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn deliver(&self, event: ChangeEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| CdcError::sink("event channel closed"))
    }
}

/// Sink wrapping a synchronous closure; handy for embedding and tests.
pub struct FnSink<F>(F);

impl<F> FnSink<F>
where
    F: Fn(ChangeEvent) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F> EventSink for FnSink<F>
where
    F: Fn(ChangeEvent) + Send + Sync,
{
    async fn deliver(&self, event: ChangeEvent) -> Result<()> {
        (self.0)(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(event_type: EventType) -> ChangeEvent {
        ChangeEvent {
            header: EventHeader {
                timestamp: 0,
                event_type,
                server_id: 1,
                event_length: 19,
                log_pos: 120,
                flags: 0,
            },
            binlog_file: "mysql-bin.000007".into(),
            binlog_position: 120,
            schema: String::new(),
            table: String::new(),
            query: None,
            rows: Vec::new(),
            primary: None,
        }
    }

    #[test]
    fn kind_classification() {
        assert_eq!(event(EventType::WriteRowsV2).kind(), EventKind::Insert);
        assert_eq!(event(EventType::UpdateRowsV1).kind(), EventKind::Update);
        assert_eq!(event(EventType::DeleteRowsV0).kind(), EventKind::Delete);
        assert_eq!(event(EventType::Query).kind(), EventKind::Query);
        assert_eq!(event(EventType::Rotate).kind(), EventKind::Rotate);
        assert_eq!(event(EventType::Xid).kind(), EventKind::Other);
    }

    #[test]
    fn empty_sections_are_omitted_from_json() {
        let json = serde_json::to_string(&event(EventType::Xid)).unwrap();
        assert!(!json.contains("\"rows\""));
        assert!(!json.contains("\"query\""));
        assert!(!json.contains("\"primary\""));
        assert!(json.contains("\"binlog_file\""));
    }

    #[tokio::test]
    async fn channel_sink_forwards() {
        let (tx, mut rx) = mpsc::channel(4);
        let sink = ChannelSink::new(tx);
        sink.deliver(event(EventType::Xid)).await.unwrap();
        let got = rx.recv().await.unwrap();
        assert_eq!(got.binlog_position, 120);
    }

    #[tokio::test]
    async fn channel_sink_reports_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sink = ChannelSink::new(tx);
        assert!(sink.deliver(event(EventType::Xid)).await.is_err());
    }
}

//! Common event header and the binlog v4 event-type table.

use anyhow::{bail, Result};
use serde::Serialize;

use super::codec;

/// Binlog event types, binlog v4 numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum EventType {
    Unknown = 0,
    StartV3 = 1,
    Query = 2,
    Stop = 3,
    Rotate = 4,
    Intvar = 5,
    Load = 6,
    Slave = 7,
    CreateFile = 8,
    AppendBlock = 9,
    ExecLoad = 10,
    DeleteFile = 11,
    NewLoad = 12,
    Rand = 13,
    UserVar = 14,
    FormatDescription = 15,
    Xid = 16,
    BeginLoadQuery = 17,
    ExecuteLoadQuery = 18,
    TableMap = 19,
    DeleteRowsV0 = 20,
    UpdateRowsV0 = 21,
    WriteRowsV0 = 22,
    WriteRowsV1 = 23,
    UpdateRowsV1 = 24,
    DeleteRowsV1 = 25,
    Incident = 26,
    Heartbeat = 27,
    Ignorable = 28,
    RowsQuery = 29,
    WriteRowsV2 = 30,
    UpdateRowsV2 = 31,
    DeleteRowsV2 = 32,
    Gtid = 33,
    AnonymousGtid = 34,
    PreviousGtids = 35,
}

impl EventType {
    pub fn from_u8(value: u8) -> Self {
        use EventType::*;
        match value {
            1 => StartV3,
            2 => Query,
            3 => Stop,
            4 => Rotate,
            5 => Intvar,
            6 => Load,
            7 => Slave,
            8 => CreateFile,
            9 => AppendBlock,
            10 => ExecLoad,
            11 => DeleteFile,
            12 => NewLoad,
            13 => Rand,
            14 => UserVar,
            15 => FormatDescription,
            16 => Xid,
            17 => BeginLoadQuery,
            18 => ExecuteLoadQuery,
            19 => TableMap,
            20 => DeleteRowsV0,
            21 => UpdateRowsV0,
            22 => WriteRowsV0,
            23 => WriteRowsV1,
            24 => UpdateRowsV1,
            25 => DeleteRowsV1,
            26 => Incident,
            27 => Heartbeat,
            28 => Ignorable,
            29 => RowsQuery,
            30 => WriteRowsV2,
            31 => UpdateRowsV2,
            32 => DeleteRowsV2,
            33 => Gtid,
            34 => AnonymousGtid,
            35 => PreviousGtids,
            _ => Unknown,
        }
    }

    pub fn is_row_event(&self) -> bool {
        self.is_write() || self.is_update() || self.is_delete()
    }

    pub fn is_write(&self) -> bool {
        matches!(
            self,
            EventType::WriteRowsV0 | EventType::WriteRowsV1 | EventType::WriteRowsV2
        )
    }

    pub fn is_update(&self) -> bool {
        matches!(
            self,
            EventType::UpdateRowsV0 | EventType::UpdateRowsV1 | EventType::UpdateRowsV2
        )
    }

    pub fn is_delete(&self) -> bool {
        matches!(
            self,
            EventType::DeleteRowsV0 | EventType::DeleteRowsV1 | EventType::DeleteRowsV2
        )
    }

    /// v2 row events carry a variable extra-data block after the post-header.
    pub fn is_rows_v2(&self) -> bool {
        matches!(
            self,
            EventType::WriteRowsV2 | EventType::UpdateRowsV2 | EventType::DeleteRowsV2
        )
    }
}

/// Header flag bits, surfaced for diagnostics only.
pub mod flags {
    pub const BINLOG_IN_USE: u16 = 0x0001;
    pub const FORCED_ROTATE: u16 = 0x0002;
    pub const THREAD_SPECIFIC: u16 = 0x0004;
    pub const SUPPRESS_USE: u16 = 0x0008;
    pub const UPDATE_TABLE_MAP_VERSION: u16 = 0x0010;
    pub const ARTIFICIAL: u16 = 0x0020;
    pub const RELAY_LOG: u16 = 0x0040;
    pub const IGNORABLE: u16 = 0x0080;
    pub const NO_FILTER: u16 = 0x0100;
    pub const MTS_ISOLATE: u16 = 0x0200;
}

/// The 19-byte header every binlog v4 event starts with.
///
/// `event_length` covers header, body, and the trailing CRC32 when
/// checksums are negotiated. `log_pos` is the offset of the next event in
/// the current file, i.e. the position *after* this event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventHeader {
    pub timestamp: u32,
    pub event_type: EventType,
    pub server_id: u32,
    pub event_length: u32,
    pub log_pos: u32,
    pub flags: u16,
}

impl EventHeader {
    pub const SIZE: usize = 19;

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            bail!("event header too short: {} bytes", data.len());
        }
        let mut buf = data;
        Ok(Self {
            timestamp: codec::read_u32_le(&mut buf)?,
            event_type: EventType::from_u8(codec::read_u8(&mut buf)?),
            server_id: codec::read_u32_le(&mut buf)?,
            event_length: codec::read_u32_le(&mut buf)?,
            log_pos: codec::read_u32_le(&mut buf)?,
            flags: codec::read_u16_le(&mut buf)?,
        })
    }

    /// Names of the set flag bits.
    pub fn flag_names(&self) -> Vec<&'static str> {
        let table: [(u16, &'static str); 10] = [
            (flags::BINLOG_IN_USE, "BINLOG_IN_USE"),
            (flags::FORCED_ROTATE, "FORCED_ROTATE"),
            (flags::THREAD_SPECIFIC, "THREAD_SPECIFIC"),
            (flags::SUPPRESS_USE, "SUPPRESS_USE"),
            (flags::UPDATE_TABLE_MAP_VERSION, "UPDATE_TABLE_MAP_VERSION"),
            (flags::ARTIFICIAL, "ARTIFICIAL"),
            (flags::RELAY_LOG, "RELAY_LOG"),
            (flags::IGNORABLE, "IGNORABLE"),
            (flags::NO_FILTER, "NO_FILTER"),
            (flags::MTS_ISOLATE, "MTS_ISOLATE"),
        ];
        table
            .iter()
            .filter(|(bit, _)| self.flags & bit != 0)
            .map(|(_, name)| *name)
            .collect()
    }
}

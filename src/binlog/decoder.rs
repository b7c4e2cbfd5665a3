//! Binlog event parser.
//!
//! [`BinlogParser`] consumes raw event records (the payload after the dump
//! packet's OK byte) and yields [`ChangeEvent`]s. It owns the per-file state
//! the format requires: the format description, the table-id → table-map
//! binding, and the table-id → column-schema cache fed by the caller from
//! the schema catalog.

use std::collections::HashMap;

use anyhow::{anyhow, bail, Result};
use tracing::{debug, trace};

use super::codec::{self, Bitfield};
use super::header::{EventHeader, EventType};
use super::rows;
use crate::event::ChangeEvent;
use crate::schema::ColumnSchema;

/// MySQL wire column types (`Protocol::ColumnType`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ColumnType {
    Decimal = 0,
    Tiny = 1,
    Short = 2,
    Long = 3,
    Float = 4,
    Double = 5,
    Null = 6,
    Timestamp = 7,
    LongLong = 8,
    Int24 = 9,
    Date = 10,
    Time = 11,
    DateTime = 12,
    Year = 13,
    NewDate = 14,
    Varchar = 15,
    Bit = 16,
    Timestamp2 = 17,
    DateTime2 = 18,
    Time2 = 19,
    NewDecimal = 246,
    Enum = 247,
    Set = 248,
    TinyBlob = 249,
    MediumBlob = 250,
    LongBlob = 251,
    Blob = 252,
    VarString = 253,
    String = 254,
    Geometry = 255,
}

impl ColumnType {
    pub fn from_u8(value: u8) -> Result<Self> {
        use ColumnType::*;
        Ok(match value {
            0 => Decimal,
            1 => Tiny,
            2 => Short,
            3 => Long,
            4 => Float,
            5 => Double,
            6 => Null,
            7 => Timestamp,
            8 => LongLong,
            9 => Int24,
            10 => Date,
            11 => Time,
            12 => DateTime,
            13 => Year,
            14 => NewDate,
            15 => Varchar,
            16 => Bit,
            17 => Timestamp2,
            18 => DateTime2,
            19 => Time2,
            246 => NewDecimal,
            247 => Enum,
            248 => Set,
            249 => TinyBlob,
            250 => MediumBlob,
            251 => LongBlob,
            252 => Blob,
            253 => VarString,
            254 => String,
            255 => Geometry,
            other => bail!("unknown column type {}", other),
        })
    }
}

/// Per-column metadata extracted from a table-map event.
///
/// Which fields are meaningful depends on `decode_type`; the rest stay zero.
#[derive(Debug, Clone)]
pub struct ColumnMeta {
    /// The type the row decoder dispatches on. Differs from the declared
    /// wire type for ENUM/SET columns, which arrive as STRING and are
    /// rewritten from the metadata's high byte.
    pub decode_type: ColumnType,
    pub max_length: u16,
    pub length_size: u8,
    pub precision: u8,
    pub decimals: u8,
    /// ENUM/SET storage width in bytes.
    pub size: u16,
    /// BIT width in bits and the bytes it occupies on the wire.
    pub bits: u16,
    pub bytes: u8,
    /// Fractional-seconds precision for TIMESTAMP2/DATETIME2/TIME2.
    pub fsp: u8,
}

impl ColumnMeta {
    fn new(decode_type: ColumnType) -> Self {
        Self {
            decode_type,
            max_length: 0,
            length_size: 0,
            precision: 0,
            decimals: 0,
            size: 0,
            bits: 0,
            bytes: 0,
            fsp: 0,
        }
    }
}

/// Format-description event: binlog v4 layout table, cached per file.
#[derive(Debug, Clone)]
pub struct FormatDescription {
    pub binlog_version: u16,
    pub server_version: String,
    pub create_timestamp: u32,
    pub header_length: u8,
    /// Post-header length per event type, indexed by `event type - 1`.
    pub post_header_lengths: Vec<u8>,
}

impl FormatDescription {
    /// Table ids shrink to 4 bytes when the post-header of the event type is
    /// declared as 6 bytes; otherwise they are 6.
    pub fn table_id_width(&self, event_type: EventType) -> usize {
        let idx = (event_type as u8) as usize;
        if idx >= 1 && self.post_header_lengths.get(idx - 1) == Some(&6) {
            4
        } else {
            6
        }
    }
}

/// Table-map event: binds a transient table id to a table and its on-wire
/// column layout. Valid only within the current binlog file.
#[derive(Debug, Clone)]
pub struct TableMap {
    pub table_id: u64,
    pub flags: u16,
    pub schema: String,
    pub table: String,
    pub column_types: Vec<ColumnType>,
    pub column_meta: Vec<ColumnMeta>,
    pub null_bitmap: Bitfield,
}

/// Extract `(database, table)` from an `ALTER TABLE` statement, or `None`
/// for any other text. The database part is empty when the statement names
/// the table without qualification.
pub fn alter_table_target(sql: &str) -> Option<(String, String)> {
    let sql = sql.trim();
    if !sql.get(..11)?.eq_ignore_ascii_case("ALTER TABLE") {
        return None;
    }
    let token = sql.split_whitespace().nth(2)?.replace('`', "");
    match token.split_once('.') {
        Some((db, table)) => Some((db.to_string(), table.to_string())),
        None => Some((String::new(), token)),
    }
}

/// Stateful binlog event parser.
pub struct BinlogParser {
    format: Option<FormatDescription>,
    table_map: HashMap<u64, TableMap>,
    table_schema: HashMap<u64, Vec<ColumnSchema>>,
    table_ids: HashMap<String, u64>,
    checksum: bool,
    file: String,
    position: u32,
}

impl Default for BinlogParser {
    fn default() -> Self {
        Self::new()
    }
}

impl BinlogParser {
    pub fn new() -> Self {
        Self {
            format: None,
            table_map: HashMap::new(),
            table_schema: HashMap::new(),
            table_ids: HashMap::new(),
            checksum: false,
            file: String::new(),
            position: 0,
        }
    }

    /// Latch the session checksum flag. Set once before the dump loop
    /// starts; a trailing CRC32 is then stripped from every event.
    pub fn set_checksum(&mut self, enabled: bool) {
        self.checksum = enabled;
    }

    pub fn checksum(&self) -> bool {
        self.checksum
    }

    pub fn set_position(&mut self, file: impl Into<String>, position: u32) {
        self.file = file.into();
        self.position = position;
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn position(&self) -> u32 {
        self.position
    }

    /// Table ids that have a table map but no column schema yet; the caller
    /// resolves these against the schema catalog before the next row event.
    pub fn missing_schemas(&self) -> Vec<(u64, String, String)> {
        self.table_map
            .iter()
            .filter(|(id, _)| !self.table_schema.contains_key(id))
            .map(|(id, tm)| (*id, tm.schema.clone(), tm.table.clone()))
            .collect()
    }

    /// Install (or refresh) the column schema for a table id.
    pub fn install_schema(&mut self, table_id: u64, columns: Vec<ColumnSchema>) {
        if let Some(tm) = self.table_map.get(&table_id) {
            self.table_ids
                .insert(format!("{}.{}", tm.schema, tm.table), table_id);
        }
        self.table_schema.insert(table_id, columns);
    }

    pub fn table_id_for(&self, schema: &str, table: &str) -> Option<u64> {
        self.table_ids.get(&format!("{schema}.{table}")).copied()
    }

    pub fn has_schema(&self, table_id: u64) -> bool {
        self.table_schema.contains_key(&table_id)
    }

    /// Decode one event record.
    ///
    /// Returns `None` for stream-control events the agent does not surface
    /// (heartbeats and the GTID family). Everything else becomes a
    /// [`ChangeEvent`]; whether it reaches the sink is the filter's call.
    pub fn decode(&mut self, payload: &[u8]) -> Result<Option<ChangeEvent>> {
        let data = if self.checksum {
            let crc_split = payload
                .len()
                .checked_sub(4)
                .ok_or_else(|| anyhow!("event shorter than its checksum trailer"))?;
            &payload[..crc_split]
        } else {
            payload
        };

        let header = EventHeader::parse(data)?;
        let body = &data[EventHeader::SIZE..];
        trace!(event = ?header.event_type, len = body.len(), "decoding event");

        match header.event_type {
            EventType::Heartbeat
            | EventType::Ignorable
            | EventType::Gtid
            | EventType::AnonymousGtid
            | EventType::PreviousGtids => Ok(None),

            EventType::FormatDescription => {
                let format = parse_format_description(body)?;
                debug!(
                    binlog_version = format.binlog_version,
                    server_version = %format.server_version,
                    "format description"
                );
                self.format = Some(format);
                Ok(Some(self.bare_event(header)))
            }

            EventType::Rotate => {
                let mut buf = body;
                let position = codec::read_u64_le(&mut buf)? as u32;
                let file = String::from_utf8_lossy(buf).to_string();
                debug!(file = %file, position, "rotate");

                self.file = file;
                self.position = position;
                // Table ids are not stable across files.
                self.table_map.clear();
                self.table_schema.clear();
                self.table_ids.clear();

                let mut event = self.bare_event(header);
                event.binlog_position = position;
                Ok(Some(event))
            }

            EventType::Query => {
                let query = parse_query(body)?;
                let mut event = self.bare_event(header);
                event.schema = query.schema;
                event.query = Some(query.query);
                Ok(Some(event))
            }

            EventType::TableMap => {
                let format = self
                    .format
                    .as_ref()
                    .ok_or_else(|| anyhow!("table map before format description"))?;
                let tm = parse_table_map(format, body)?;
                let mut event = self.bare_event(header);
                event.schema = tm.schema.clone();
                event.table = tm.table.clone();
                self.table_map.insert(tm.table_id, tm);
                Ok(Some(event))
            }

            t if t.is_row_event() => {
                let format = self
                    .format
                    .as_ref()
                    .ok_or_else(|| anyhow!("row event before format description"))?;
                let decoded = rows::parse_rows_event(
                    format,
                    &header,
                    body,
                    &self.table_map,
                    &self.table_schema,
                )?;
                let tm = self
                    .table_map
                    .get(&decoded.table_id)
                    .ok_or_else(|| anyhow!("table map vanished for id {}", decoded.table_id))?;
                let mut event = self.bare_event(header);
                event.schema = tm.schema.clone();
                event.table = tm.table.clone();
                event.rows = decoded.rows;
                event.primary = decoded.primary;
                Ok(Some(event))
            }

            // XID, STOP, INCIDENT, ROWS_QUERY, ... — header is all the agent
            // surfaces for these.
            _ => Ok(Some(self.bare_event(header))),
        }
    }

    fn bare_event(&self, header: EventHeader) -> ChangeEvent {
        ChangeEvent {
            binlog_file: self.file.clone(),
            binlog_position: header.log_pos,
            schema: String::new(),
            table: String::new(),
            query: None,
            rows: Vec::new(),
            primary: None,
            header,
        }
    }
}

fn parse_format_description(body: &[u8]) -> Result<FormatDescription> {
    let mut buf = body;
    let binlog_version = codec::read_u16_le(&mut buf)?;
    let server_version_raw = codec::take(&mut buf, 50)?;
    let server_version = String::from_utf8_lossy(server_version_raw)
        .trim_end_matches('\0')
        .to_string();
    let create_timestamp = codec::read_u32_le(&mut buf)?;
    let header_length = codec::read_u8(&mut buf)?;
    Ok(FormatDescription {
        binlog_version,
        server_version,
        create_timestamp,
        header_length,
        post_header_lengths: buf.to_vec(),
    })
}

struct ParsedQuery {
    schema: String,
    query: String,
}

fn parse_query(body: &[u8]) -> Result<ParsedQuery> {
    let mut buf = body;
    let _slave_proxy_id = codec::read_u32_le(&mut buf)?;
    let _execution_time = codec::read_u32_le(&mut buf)?;
    let schema_len = codec::read_u8(&mut buf)? as usize;
    let _error_code = codec::read_u16_le(&mut buf)?;
    let status_vars_len = codec::read_u16_le(&mut buf)? as usize;
    codec::take(&mut buf, status_vars_len)?;
    let schema = String::from_utf8_lossy(codec::take(&mut buf, schema_len)?).to_string();
    codec::read_u8(&mut buf)?; // NUL after the schema name
    let query = String::from_utf8_lossy(buf).to_string();
    Ok(ParsedQuery { schema, query })
}

fn parse_table_map(format: &FormatDescription, body: &[u8]) -> Result<TableMap> {
    let mut buf = body;
    let table_id = codec::read_fixed_uint(&mut buf, format.table_id_width(EventType::TableMap))?;
    let flags = codec::read_u16_le(&mut buf)?;

    let schema_len = codec::read_u8(&mut buf)? as usize;
    let schema = String::from_utf8_lossy(codec::take(&mut buf, schema_len)?).to_string();
    codec::read_u8(&mut buf)?;
    let table_len = codec::read_u8(&mut buf)? as usize;
    let table = String::from_utf8_lossy(codec::take(&mut buf, table_len)?).to_string();
    codec::read_u8(&mut buf)?;

    let column_count = codec::read_lenc_int(&mut buf)? as usize;
    let column_types = codec::take(&mut buf, column_count)?
        .iter()
        .map(|&b| ColumnType::from_u8(b))
        .collect::<Result<Vec<_>>>()?;

    let meta_block = codec::read_lenc_bytes(&mut buf)?;
    let column_meta = parse_column_meta(&column_types, meta_block)?;

    let null_bitmap = Bitfield::from(codec::take(&mut buf, column_count.div_ceil(8))?);

    Ok(TableMap {
        table_id,
        flags,
        schema,
        table,
        column_types,
        column_meta,
        null_bitmap,
    })
}

/// Metadata is a packed blob whose per-column width depends on the type.
fn parse_column_meta(types: &[ColumnType], block: &[u8]) -> Result<Vec<ColumnMeta>> {
    let mut buf = block;
    let mut out = Vec::with_capacity(types.len());
    for &t in types {
        let mut meta = ColumnMeta::new(t);
        match t {
            ColumnType::String => {
                let b0 = codec::read_u8(&mut buf)? as u16;
                let b1 = codec::read_u8(&mut buf)? as u16;
                let word = (b0 << 8) | b1;
                let real = word >> 8;
                if real == ColumnType::Enum as u16 || real == ColumnType::Set as u16 {
                    meta.decode_type = ColumnType::from_u8(real as u8)?;
                    meta.size = word & 0x00FF;
                } else {
                    meta.max_length = (((word >> 4) & 0x300) ^ 0x300) + (word & 0x00FF);
                }
            }
            ColumnType::Varchar | ColumnType::VarString | ColumnType::Decimal => {
                meta.max_length = codec::read_u16_le(&mut buf)?;
            }
            ColumnType::Blob
            | ColumnType::Geometry
            | ColumnType::Double
            | ColumnType::Float
            | ColumnType::TinyBlob
            | ColumnType::MediumBlob
            | ColumnType::LongBlob => {
                meta.length_size = codec::read_u8(&mut buf)?;
            }
            ColumnType::NewDecimal => {
                meta.precision = codec::read_u8(&mut buf)?;
                meta.decimals = codec::read_u8(&mut buf)?;
            }
            ColumnType::Bit => {
                let low_bits = codec::read_u8(&mut buf)? as u16;
                let bytes = codec::read_u8(&mut buf)? as u16;
                meta.bits = bytes * 8 + low_bits;
                meta.bytes = meta.bits.div_ceil(8) as u8;
            }
            ColumnType::Timestamp2 | ColumnType::DateTime2 | ColumnType::Time2 => {
                meta.fsp = codec::read_u8(&mut buf)?;
            }
            ColumnType::Date
            | ColumnType::DateTime
            | ColumnType::Timestamp
            | ColumnType::Time
            | ColumnType::Tiny
            | ColumnType::Short
            | ColumnType::Int24
            | ColumnType::Long
            | ColumnType::LongLong
            | ColumnType::Null
            | ColumnType::Year
            | ColumnType::NewDate => {}
            other => bail!("column type {:?} is not valid in a table map", other),
        }
        out.push(meta);
    }
    Ok(out)
}

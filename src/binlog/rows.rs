//! Row-event decoder.
//!
//! WRITE/UPDATE/DELETE events carry raw row images whose layout is defined
//! by the preceding table-map event; names, signedness, booleans, and
//! enum/set literals come from the cached column schema. Both caches must be
//! populated before a row event is decodable.

use std::collections::HashMap;

use anyhow::{anyhow, bail, Result};
use chrono::DateTime;

use super::codec::{self, Bitfield};
use super::decoder::{ColumnMeta, ColumnType, FormatDescription, TableMap};
use super::header::EventHeader;
use super::value::{ColumnValue, Row, RowPair};
use crate::schema::ColumnSchema;

pub(crate) struct DecodedRows {
    pub table_id: u64,
    #[allow(dead_code)]
    pub flags: u16,
    pub rows: Vec<RowPair>,
    pub primary: Option<String>,
}

pub(crate) fn parse_rows_event(
    format: &FormatDescription,
    header: &EventHeader,
    body: &[u8],
    table_map: &HashMap<u64, TableMap>,
    table_schema: &HashMap<u64, Vec<ColumnSchema>>,
) -> Result<DecodedRows> {
    let mut buf = body;
    let table_id = codec::read_fixed_uint(&mut buf, format.table_id_width(header.event_type))?;
    let flags = codec::read_u16_le(&mut buf)?;

    // v2 events insert a variable extra-data block; its declared length
    // includes the two length bytes themselves.
    if header.event_type.is_rows_v2() {
        let extra_len = codec::read_u16_le(&mut buf)? as usize;
        let skip = extra_len
            .checked_sub(2)
            .ok_or_else(|| anyhow!("rows extra-data length {} below 2", extra_len))?;
        codec::take(&mut buf, skip)?;
    }

    let column_count = codec::read_lenc_int(&mut buf)? as usize;
    let bitmap_len = column_count.div_ceil(8);
    let _columns_present1 = Bitfield::from(codec::take(&mut buf, bitmap_len)?);
    if header.event_type.is_update() {
        let _columns_present2 = Bitfield::from(codec::take(&mut buf, bitmap_len)?);
    }

    let tm = table_map
        .get(&table_id)
        .ok_or_else(|| anyhow!("row event for unmapped table id {}", table_id))?;
    let schema = table_schema.get(&table_id).ok_or_else(|| {
        anyhow!(
            "no cached schema for {}.{} (table id {})",
            tm.schema,
            tm.table,
            table_id
        )
    })?;
    if schema.len() != tm.column_types.len() {
        bail!(
            "schema/table-map column count mismatch for {}.{}: {} vs {}",
            tm.schema,
            tm.table,
            schema.len(),
            tm.column_types.len()
        );
    }
    if column_count != tm.column_types.len() {
        bail!(
            "row event declares {} columns, table map has {}",
            column_count,
            tm.column_types.len()
        );
    }

    let is_update = header.event_type.is_update();
    let is_delete = header.event_type.is_delete();

    let mut rows = Vec::new();
    while !buf.is_empty() {
        let image = parse_row_image(&mut buf, tm, schema, column_count)?;
        rows.push(if is_update {
            let after = parse_row_image(&mut buf, tm, schema, column_count)?;
            RowPair {
                before: Some(image),
                after: Some(after),
            }
        } else if is_delete {
            RowPair {
                before: Some(image),
                after: None,
            }
        } else {
            RowPair {
                before: None,
                after: Some(image),
            }
        });
    }

    let primary = schema
        .iter()
        .find(|c| c.column_key == "PRI")
        .map(|c| c.name.clone());

    Ok(DecodedRows {
        table_id,
        flags,
        rows,
        primary,
    })
}

fn parse_row_image(
    buf: &mut &[u8],
    tm: &TableMap,
    schema: &[ColumnSchema],
    column_count: usize,
) -> Result<Row> {
    let null_bitmap = Bitfield::from(codec::take(buf, column_count.div_ceil(8))?);
    let mut row = Row::new();
    for (i, column) in schema.iter().enumerate().take(column_count) {
        if null_bitmap.is_set(i) {
            row.insert(column.name.clone(), ColumnValue::Null);
            continue;
        }
        let value = decode_value(buf, &tm.column_meta[i], column)
            .map_err(|e| anyhow!("column {} ({}): {}", i, column.name, e))?;
        row.insert(column.name.clone(), value);
    }
    Ok(row)
}

/// Decode one non-null column, dispatching on the table-map type (never on
/// the `information_schema` type text).
fn decode_value(buf: &mut &[u8], meta: &ColumnMeta, column: &ColumnSchema) -> Result<ColumnValue> {
    match meta.decode_type {
        ColumnType::Null => Ok(ColumnValue::Null),

        ColumnType::Tiny => {
            let b = codec::read_u8(buf)?;
            if column.is_bool {
                match b {
                    0 => return Ok(ColumnValue::Bool(false)),
                    1 => return Ok(ColumnValue::Bool(true)),
                    _ => {}
                }
            }
            Ok(if column.unsigned {
                ColumnValue::UnsignedInt(b as u64)
            } else {
                ColumnValue::SignedInt(b as i8 as i64)
            })
        }

        ColumnType::Short => Ok(if column.unsigned {
            ColumnValue::UnsignedInt(codec::read_u16_le(buf)? as u64)
        } else {
            ColumnValue::SignedInt(codec::read_i16_le(buf)? as i64)
        }),

        ColumnType::Int24 => {
            let raw = codec::read_fixed_uint(buf, 3)?;
            Ok(if column.unsigned {
                ColumnValue::UnsignedInt(raw)
            } else {
                let v = raw as i64;
                ColumnValue::SignedInt(if v & 0x80_0000 != 0 { v - 0x100_0000 } else { v })
            })
        }

        ColumnType::Long => Ok(if column.unsigned {
            ColumnValue::UnsignedInt(codec::read_u32_le(buf)? as u64)
        } else {
            ColumnValue::SignedInt(codec::read_i32_le(buf)? as i64)
        }),

        ColumnType::LongLong => Ok(if column.unsigned {
            ColumnValue::UnsignedInt(codec::read_u64_le(buf)?)
        } else {
            ColumnValue::SignedInt(codec::read_i64_le(buf)?)
        }),

        ColumnType::Float => Ok(ColumnValue::Float(codec::read_f32_le(buf)?)),
        ColumnType::Double => Ok(ColumnValue::Double(codec::read_f64_le(buf)?)),

        ColumnType::Year => {
            let y = codec::read_u8(buf)?;
            Ok(if y == 0 {
                ColumnValue::Null
            } else {
                ColumnValue::String((1900 + y as u32).to_string())
            })
        }

        ColumnType::NewDecimal => decode_new_decimal(buf, meta.precision, meta.decimals),

        ColumnType::Varchar => {
            let len = if meta.max_length > 255 {
                codec::read_u16_le(buf)? as usize
            } else {
                codec::read_u8(buf)? as usize
            };
            let raw = codec::take(buf, len)?;
            Ok(ColumnValue::String(String::from_utf8_lossy(raw).to_string()))
        }

        ColumnType::String => {
            let len = codec::read_u8(buf)? as usize;
            let raw = codec::take(buf, len)?;
            Ok(ColumnValue::String(String::from_utf8_lossy(raw).to_string()))
        }

        ColumnType::Enum => {
            let index = match meta.size {
                1 => codec::read_u8(buf)? as usize,
                2 => codec::read_u16_le(buf)? as usize,
                n => bail!("enum storage size {} out of range", n),
            };
            let slot = index
                .checked_sub(1)
                .ok_or_else(|| anyhow!("enum index 0"))?;
            let literal = column
                .enum_values
                .get(slot)
                .ok_or_else(|| anyhow!("enum index {} out of range", index))?;
            Ok(ColumnValue::String(literal.clone()))
        }

        ColumnType::Set => {
            let size = meta.size as usize;
            if size == 0 {
                return Ok(ColumnValue::Null);
            }
            if size > 4 {
                bail!("set storage size {} out of range", size);
            }
            let bitmap = codec::read_fixed_uint(buf, size)?;
            let members = column
                .set_values
                .iter()
                .enumerate()
                .filter(|(i, _)| *i < 64 && bitmap & (1u64 << i) != 0)
                .map(|(_, v)| v.clone())
                .collect();
            Ok(ColumnValue::Set(members))
        }

        ColumnType::Blob
        | ColumnType::TinyBlob
        | ColumnType::MediumBlob
        | ColumnType::LongBlob
        | ColumnType::VarString => {
            let n = meta.length_size as usize;
            let len = if n == 0 {
                0
            } else {
                codec::read_fixed_uint(buf, n)? as usize
            };
            Ok(ColumnValue::Bytes(codec::take(buf, len)?.to_vec()))
        }

        ColumnType::Bit => {
            let total_bytes = meta.bytes as usize;
            let mut out: u64 = 0;
            // Stored big-endian; only the low `bits % 8` bits of the leading
            // byte are significant (all 8 when the width is a multiple of 8).
            for k in 0..total_bytes {
                let b = codec::read_u8(buf)? as u64;
                let significant = if k == 0 {
                    if total_bytes == 1 {
                        meta.bits as u32
                    } else {
                        match meta.bits % 8 {
                            0 => 8,
                            r => r as u32,
                        }
                    }
                } else {
                    8
                };
                out = (out << significant) | (b & ((1u64 << significant) - 1));
            }
            Ok(ColumnValue::Bit(out as i64))
        }

        ColumnType::Date | ColumnType::NewDate => {
            let d = codec::read_fixed_uint(buf, 3)?;
            if d == 0 {
                return Ok(ColumnValue::Null);
            }
            let year = (d >> 9) & 0x7FFF;
            let month = (d >> 5) & 0xF;
            let day = d & 0x1F;
            Ok(ColumnValue::String(format!(
                "{year:04}-{month:02}-{day:02}"
            )))
        }

        ColumnType::Time => {
            let t = codec::read_fixed_uint(buf, 3)?;
            if t == 0 {
                return Ok(ColumnValue::Null);
            }
            let hour = t / 10000;
            let minute = (t % 10000) / 100;
            let second = t % 100;
            Ok(ColumnValue::String(format!(
                "{hour:02}:{minute:02}:{second:02}"
            )))
        }

        ColumnType::Time2 => {
            let mut t = codec::read_be_uint(buf, 3)? as i64;
            if t >= 0x80_0000 {
                t -= 0x100_0000;
            }
            let packed = t as u64;
            let hour = codec::read_binary_slice(packed, 2, 10, 24);
            let minute = codec::read_binary_slice(packed, 12, 6, 24);
            let second = codec::read_binary_slice(packed, 18, 6, 24);
            skip_fractional(buf, meta.fsp)?;
            Ok(ColumnValue::String(format!(
                "{hour:02}:{minute:02}:{second:02}"
            )))
        }

        ColumnType::Timestamp => {
            let secs = codec::read_u32_le(buf)?;
            Ok(ColumnValue::String(format_epoch(secs as i64)?))
        }

        ColumnType::Timestamp2 => {
            let secs = codec::read_u32_be(buf)?;
            skip_fractional(buf, meta.fsp)?;
            Ok(ColumnValue::String(format_epoch(secs as i64)?))
        }

        ColumnType::DateTime => {
            let t = codec::read_u64_le(buf)?;
            let second = t % 100;
            let minute = (t % 10000) / 100;
            let hour = (t % 1_000_000) / 10000;
            let d = t / 1_000_000;
            let day = d % 100;
            let month = (d % 10000) / 100;
            let year = d / 10000;
            Ok(ColumnValue::String(format!(
                "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}"
            )))
        }

        ColumnType::DateTime2 => {
            // 1 sign bit | 17 bits year*13+month | 5 day | 5 hour | 6 minute | 6 second
            let packed = codec::read_be_uint(buf, 5)?;
            let year_month = codec::read_binary_slice(packed, 1, 17, 40);
            let year = year_month / 13;
            let month = year_month % 13;
            let day = codec::read_binary_slice(packed, 18, 5, 40);
            let hour = codec::read_binary_slice(packed, 23, 5, 40);
            let minute = codec::read_binary_slice(packed, 28, 6, 40);
            let second = codec::read_binary_slice(packed, 34, 6, 40);
            skip_fractional(buf, meta.fsp)?;
            Ok(ColumnValue::String(format!(
                "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}"
            )))
        }

        ColumnType::Geometry | ColumnType::Decimal => {
            bail!("unsupported column type {:?}", meta.decode_type)
        }
    }
}

/// Consume the fractional-seconds trailer of a TIMESTAMP2/DATETIME2/TIME2
/// value: `(fsp + 1) / 2` bytes. The fraction is not rendered (canonical
/// strings are second-granular) but must be consumed to keep the row cursor
/// aligned with the next column.
fn skip_fractional(buf: &mut &[u8], fsp: u8) -> Result<()> {
    codec::take(buf, (fsp as usize + 1) / 2).map(|_| ())
}

fn format_epoch(secs: i64) -> Result<String> {
    let dt = DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| anyhow!("timestamp {} out of range", secs))?;
    Ok(dt.format("%Y-%m-%d %H:%M:%S").to_string())
}

/// Sign-embedded packed decimal: groups of nine base-10 digits live in four
/// big-endian bytes, partial groups in a compact byte count; bit 7 of the
/// first byte is the sign (set = non-negative) and negative values store the
/// remaining bits complemented.
fn decode_new_decimal(buf: &mut &[u8], precision: u8, decimals: u8) -> Result<ColumnValue> {
    const GROUP_DIGITS: usize = 9;
    const COMPRESSED_BYTES: [usize; 10] = [0, 1, 1, 2, 2, 3, 3, 4, 4, 4];

    let precision = precision as usize;
    let decimals = decimals as usize;
    let integral = precision.checked_sub(decimals).ok_or_else(|| {
        anyhow!(
            "decimal scale {} exceeds precision {}",
            decimals,
            precision
        )
    })?;
    let full_integral = integral / GROUP_DIGITS;
    let full_fractional = decimals / GROUP_DIGITS;
    let comp_integral = integral % GROUP_DIGITS;
    let comp_fractional = decimals % GROUP_DIGITS;

    let total = COMPRESSED_BYTES[comp_integral]
        + full_integral * 4
        + full_fractional * 4
        + COMPRESSED_BYTES[comp_fractional];
    let mut bytes = codec::take(buf, total)?.to_vec();
    if bytes.is_empty() {
        bail!("zero-width decimal");
    }

    let non_negative = bytes[0] & 0x80 != 0;
    bytes[0] ^= 0x80;
    if !non_negative {
        for b in bytes.iter_mut() {
            *b = !*b;
        }
    }

    let mut cursor: &[u8] = &bytes;
    let mut out = String::new();
    if !non_negative {
        out.push('-');
    }

    let lead = COMPRESSED_BYTES[comp_integral];
    if lead > 0 {
        out.push_str(&codec::read_be_uint(&mut cursor, lead)?.to_string());
    }
    for _ in 0..full_integral {
        let group = codec::read_be_uint(&mut cursor, 4)?;
        out.push_str(&format!("{group:09}"));
    }
    if lead == 0 && full_integral == 0 {
        out.push('0');
    }

    if decimals > 0 {
        out.push('.');
        for _ in 0..full_fractional {
            let group = codec::read_be_uint(&mut cursor, 4)?;
            out.push_str(&format!("{group:09}"));
        }
        let trail = COMPRESSED_BYTES[comp_fractional];
        if trail > 0 {
            let group = codec::read_be_uint(&mut cursor, trail)?;
            out.push_str(&format!("{group:0width$}", width = comp_fractional));
        }
    }

    Ok(ColumnValue::Decimal(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(t: ColumnType) -> ColumnMeta {
        ColumnMeta {
            decode_type: t,
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

    fn col(ctype: &str) -> ColumnSchema {
        ColumnSchema::from_information_schema(
            "c".into(),
            String::new(),
            ctype.into(),
            None,
            None,
            None,
            String::new(),
        )
    }

    fn decode(data: &[u8], m: &ColumnMeta, c: &ColumnSchema) -> ColumnValue {
        let mut buf = data;
        let v = decode_value(&mut buf, m, c).unwrap();
        assert!(buf.is_empty(), "decoder left {} bytes behind", buf.len());
        v
    }

    #[test]
    fn tiny_boolean_and_numeric() {
        let bool_col = col("tinyint(1)");
        let m = meta(ColumnType::Tiny);
        assert_eq!(decode(&[1], &m, &bool_col), ColumnValue::Bool(true));
        assert_eq!(decode(&[0], &m, &bool_col), ColumnValue::Bool(false));
        // Out-of-range values fall back to the numeric reading.
        assert_eq!(decode(&[5], &m, &bool_col), ColumnValue::SignedInt(5));

        assert_eq!(
            decode(&[0xFF], &m, &col("tinyint(4)")),
            ColumnValue::SignedInt(-1)
        );
        assert_eq!(
            decode(&[0xFF], &m, &col("tinyint(3) unsigned")),
            ColumnValue::UnsignedInt(255)
        );
    }

    #[test]
    fn int24_sign_extends() {
        let m = meta(ColumnType::Int24);
        assert_eq!(
            decode(&[0xFF, 0xFF, 0xFF], &m, &col("mediumint(9)")),
            ColumnValue::SignedInt(-1)
        );
        assert_eq!(
            decode(&[0x00, 0x00, 0x80], &m, &col("mediumint(9)")),
            ColumnValue::SignedInt(-8_388_608)
        );
        assert_eq!(
            decode(&[0xFF, 0xFF, 0xFF], &m, &col("mediumint(8) unsigned")),
            ColumnValue::UnsignedInt(16_777_215)
        );
    }

    #[test]
    fn year_zero_is_null() {
        let m = meta(ColumnType::Year);
        assert_eq!(decode(&[0], &m, &col("year(4)")), ColumnValue::Null);
        assert_eq!(
            decode(&[124], &m, &col("year(4)")),
            ColumnValue::String("2024".into())
        );
    }

    #[test]
    fn varchar_length_prefix_boundary() {
        let mut m = meta(ColumnType::Varchar);
        m.max_length = 255;
        assert_eq!(
            decode(&[3, b'a', b'b', b'c'], &m, &col("varchar(255)")),
            ColumnValue::String("abc".into())
        );

        m.max_length = 256;
        assert_eq!(
            decode(&[3, 0, b'a', b'b', b'c'], &m, &col("varchar(256)")),
            ColumnValue::String("abc".into())
        );
    }

    #[test]
    fn blob_uses_length_size() {
        let mut m = meta(ColumnType::Blob);
        m.length_size = 2;
        assert_eq!(
            decode(&[2, 0, 0xDE, 0xAD], &m, &col("blob")),
            ColumnValue::Bytes(vec![0xDE, 0xAD])
        );
    }

    #[test]
    fn enum_resolves_literal() {
        let c = col("enum('small','medium','large')");
        let mut m = meta(ColumnType::Enum);
        m.size = 1;
        assert_eq!(decode(&[2], &m, &c), ColumnValue::String("medium".into()));

        let mut buf: &[u8] = &[0];
        assert!(decode_value(&mut buf, &m, &c).is_err());
        let mut buf: &[u8] = &[9];
        assert!(decode_value(&mut buf, &m, &c).is_err());
    }

    #[test]
    fn set_membership() {
        let c = col("set('a','b','c')");
        let mut m = meta(ColumnType::Set);
        m.size = 1;
        assert_eq!(
            decode(&[0b101], &m, &c),
            ColumnValue::Set(vec!["a".into(), "c".into()])
        );
        assert_eq!(decode(&[0], &m, &c), ColumnValue::Set(vec![]));

        m.size = 0;
        assert_eq!(decode(&[], &m, &c), ColumnValue::Null);
    }

    #[test]
    fn bit_widths() {
        let c = col("bit(1)");
        let mut m = meta(ColumnType::Bit);
        m.bits = 1;
        m.bytes = 1;
        assert_eq!(decode(&[0x01], &m, &c), ColumnValue::Bit(1));

        m.bits = 9;
        m.bytes = 2;
        assert_eq!(decode(&[0x01, 0xFF], &m, &c), ColumnValue::Bit(511));

        m.bits = 64;
        m.bytes = 8;
        assert_eq!(
            decode(&[0x7F, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF], &m, &c),
            ColumnValue::Bit(i64::MAX)
        );
    }

    #[test]
    fn date_and_time_rendering() {
        let m = meta(ColumnType::Date);
        let d: u64 = (2024 << 9) | (1 << 5) | 15;
        let enc = d.to_le_bytes();
        assert_eq!(
            decode(&enc[..3], &m, &col("date")),
            ColumnValue::String("2024-01-15".into())
        );
        assert_eq!(decode(&[0, 0, 0], &m, &col("date")), ColumnValue::Null);

        let m = meta(ColumnType::Time);
        let t: u64 = 123456;
        let enc = t.to_le_bytes();
        assert_eq!(
            decode(&enc[..3], &m, &col("time")),
            ColumnValue::String("12:34:56".into())
        );
        assert_eq!(decode(&[0, 0, 0], &m, &col("time")), ColumnValue::Null);
    }

    #[test]
    fn time2_packed_fields_and_fraction_consumed() {
        let mut m = meta(ColumnType::Time2);
        m.fsp = 3;
        let packed: u64 = (1 << 23) | (10 << 12) | (15 << 6) | 11; // 10:15:11, non-negative
        let enc = packed.to_be_bytes();
        let mut data = enc[5..8].to_vec();
        data.extend_from_slice(&[0xAB, 0xCD]); // (3 + 1) / 2 fractional bytes
        assert_eq!(
            decode(&data, &m, &col("time(3)")),
            ColumnValue::String("10:15:11".into())
        );
    }

    #[test]
    fn timestamps_render_utc() {
        let m = meta(ColumnType::Timestamp);
        assert_eq!(
            decode(&1_577_836_800u32.to_le_bytes(), &m, &col("timestamp")),
            ColumnValue::String("2020-01-01 00:00:00".into())
        );

        let mut m = meta(ColumnType::Timestamp2);
        m.fsp = 2;
        let mut data = 1_577_836_800u32.to_be_bytes().to_vec();
        data.push(0x00);
        assert_eq!(
            decode(&data, &m, &col("timestamp(2)")),
            ColumnValue::String("2020-01-01 00:00:00".into())
        );
    }

    #[test]
    fn datetime_packed_decimal() {
        let m = meta(ColumnType::DateTime);
        assert_eq!(
            decode(&20_240_115_123_456u64.to_le_bytes(), &m, &col("datetime")),
            ColumnValue::String("2024-01-15 12:34:56".into())
        );
    }

    #[test]
    fn datetime2_fields_and_zero_value() {
        let m = meta(ColumnType::DateTime2);
        let packed: u64 =
            (1 << 39) | ((2024 * 13 + 1) << 22) | (15 << 17) | (12 << 12) | (34 << 6) | 56;
        let enc = packed.to_be_bytes();
        assert_eq!(
            decode(&enc[3..8], &m, &col("datetime")),
            ColumnValue::String("2024-01-15 12:34:56".into())
        );

        // The zero datetime must decode, not error: year 0, month 0.
        let zero = (1u64 << 39).to_be_bytes();
        assert_eq!(
            decode(&zero[3..8], &m, &col("datetime")),
            ColumnValue::String("0000-00-00 00:00:00".into())
        );
    }

    #[test]
    fn decimal_vectors() {
        // DECIMAL(5,2): -123.45
        let mut m = meta(ColumnType::NewDecimal);
        m.precision = 5;
        m.decimals = 2;
        assert_eq!(
            decode(&[0x7F, 0x84, 0xD2], &m, &col("decimal(5,2)")),
            ColumnValue::Decimal("-123.45".into())
        );
        assert_eq!(
            decode(&[0x80, 0x7B, 0x2D], &m, &col("decimal(5,2)")),
            ColumnValue::Decimal("123.45".into())
        );

        // DECIMAL(2,1): 0.0
        m.precision = 2;
        m.decimals = 1;
        assert_eq!(
            decode(&[0x80, 0x00], &m, &col("decimal(2,1)")),
            ColumnValue::Decimal("0.0".into())
        );

        // DECIMAL(10,3): 9999999.999
        m.precision = 10;
        m.decimals = 3;
        assert_eq!(
            decode(&[0x80, 0x98, 0x96, 0x7F, 0x03, 0xE7], &m, &col("decimal(10,3)")),
            ColumnValue::Decimal("9999999.999".into())
        );
    }

    #[test]
    fn decimal_at_type_limits() {
        // DECIMAL(65,30): 35 integral digits (8 compact + 3 full groups),
        // 30 fractional (3 full groups + 3 compact digits).
        let mut m = meta(ColumnType::NewDecimal);
        m.precision = 65;
        m.decimals = 30;

        let mut max = vec![0x85, 0xF5, 0xE0, 0xFF]; // 99999999, sign bit set
        for _ in 0..6 {
            max.extend_from_slice(&[0x3B, 0x9A, 0xC9, 0xFF]); // 999999999
        }
        max.extend_from_slice(&[0x03, 0xE7]); // 999

        let digits = format!(
            "99999999{}.{}999",
            "999999999".repeat(3),
            "999999999".repeat(3)
        );
        assert_eq!(
            decode(&max, &m, &col("decimal(65,30)")),
            ColumnValue::Decimal(digits.clone())
        );

        let min: Vec<u8> = max.iter().map(|b| !b).collect();
        assert_eq!(
            decode(&min, &m, &col("decimal(65,30)")),
            ColumnValue::Decimal(format!("-{digits}"))
        );

        let mut zero = vec![0x80, 0, 0, 0];
        zero.extend_from_slice(&[0u8; 26]);
        assert_eq!(
            decode(&zero, &m, &col("decimal(65,30)")),
            ColumnValue::Decimal(format!(
                "0{}.{}000",
                "000000000".repeat(3),
                "000000000".repeat(3)
            ))
        );
    }

    #[test]
    fn geometry_and_old_decimal_are_unsupported() {
        let mut buf: &[u8] = &[0u8; 16];
        assert!(decode_value(&mut buf, &meta(ColumnType::Geometry), &col("geometry")).is_err());
        let mut buf: &[u8] = &[0u8; 16];
        assert!(decode_value(&mut buf, &meta(ColumnType::Decimal), &col("decimal(5,2)")).is_err());
    }
}

//! Decoded row values.

use std::collections::BTreeMap;

use base64::Engine;
use serde::ser::SerializeSeq;
use serde::{Serialize, Serializer};

/// A single decoded column value.
///
/// Temporal types are rendered as canonical strings (`YYYY-MM-DD`,
/// `HH:MM:SS`, `YYYY-MM-DD HH:MM:SS`) and decimals keep their exact digits
/// as text; no lossy promotion to floats happens here.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Null,
    Bool(bool),
    SignedInt(i64),
    UnsignedInt(u64),
    Float(f32),
    Double(f64),
    Decimal(String),
    String(String),
    Bytes(Vec<u8>),
    Set(Vec<String>),
    Bit(i64),
}

impl Serialize for ColumnValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ColumnValue::Null => serializer.serialize_none(),
            ColumnValue::Bool(v) => serializer.serialize_bool(*v),
            ColumnValue::SignedInt(v) => serializer.serialize_i64(*v),
            ColumnValue::UnsignedInt(v) => serializer.serialize_u64(*v),
            ColumnValue::Float(v) => serializer.serialize_f32(*v),
            ColumnValue::Double(v) => serializer.serialize_f64(*v),
            ColumnValue::Decimal(v) | ColumnValue::String(v) => serializer.serialize_str(v),
            ColumnValue::Bytes(v) => {
                let encoded = base64::engine::general_purpose::STANDARD.encode(v);
                serializer.serialize_str(&encoded)
            }
            ColumnValue::Set(members) => {
                let mut seq = serializer.serialize_seq(Some(members.len()))?;
                for m in members {
                    seq.serialize_element(m)?;
                }
                seq.end()
            }
            ColumnValue::Bit(v) => serializer.serialize_i64(*v),
        }
    }
}

/// One row image, keyed by column name.
pub type Row = BTreeMap<String, ColumnValue>;

/// A decoded row: INSERT fills `after`, DELETE fills `before`, UPDATE both.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RowPair {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<Row>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<Row>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_to_natural_json() {
        let mut row = Row::new();
        row.insert("id".into(), ColumnValue::UnsignedInt(7));
        row.insert("ok".into(), ColumnValue::Bool(true));
        row.insert("note".into(), ColumnValue::Null);
        row.insert("tags".into(), ColumnValue::Set(vec!["a".into(), "b".into()]));
        row.insert("payload".into(), ColumnValue::Bytes(vec![1, 2, 3]));

        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["ok"], true);
        assert!(json["note"].is_null());
        assert_eq!(json["tags"], serde_json::json!(["a", "b"]));
        assert_eq!(json["payload"], "AQID");
    }

    #[test]
    fn row_pair_omits_absent_images() {
        let pair = RowPair {
            before: None,
            after: Some(Row::new()),
        };
        let json = serde_json::to_string(&pair).unwrap();
        assert!(!json.contains("before"));
        assert!(json.contains("after"));
    }
}

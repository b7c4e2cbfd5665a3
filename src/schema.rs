//! Schema catalog client.
//!
//! Row events carry column types and values but no names, signedness, or
//! enum literals; those live in `information_schema`. This client owns the
//! second MySQL session (a [`mysql_async`] pool, opened lazily and reopened
//! transparently after failures) and answers the lookups the decoder and the
//! watchdog need.

use std::time::Duration;

use mysql_async::prelude::Queryable;
use mysql_async::{Opts, OptsBuilder, Pool, Row};
use tracing::{debug, warn};

use crate::config::CdcConfig;
use crate::error::{CdcError, Result};

const COLUMNS_QUERY: &str = "SELECT COLUMN_NAME, COLUMN_KEY, COLUMN_TYPE, CHARACTER_SET_NAME, \
     COLLATION_NAME, NUMERIC_SCALE, EXTRA \
     FROM information_schema.columns \
     WHERE table_schema = ? AND table_name = ? \
     ORDER BY ORDINAL_POSITION ASC";

/// Retry pacing for schema lookups that must not give up.
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Column metadata for one table, in ordinal position order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    pub name: String,
    pub column_key: String,
    pub column_type: String,
    pub character_set: Option<String>,
    pub collation: Option<String>,
    pub numeric_scale: Option<u64>,
    pub extra: String,
    /// Declared as `tinyint(1)`, decoded as boolean.
    pub is_bool: bool,
    pub unsigned: bool,
    pub is_primary: bool,
    pub auto_increment: bool,
    pub enum_values: Vec<String>,
    pub set_values: Vec<String>,
}

impl ColumnSchema {
    /// Build a column from its `information_schema.columns` projection,
    /// deriving the decode-time flags.
    pub fn from_information_schema(
        name: String,
        column_key: String,
        column_type: String,
        character_set: Option<String>,
        collation: Option<String>,
        numeric_scale: Option<u64>,
        extra: String,
    ) -> Self {
        let is_bool = column_type == "tinyint(1)";
        let unsigned = column_type.contains("unsigned");
        let is_primary = !column_key.is_empty();
        let auto_increment = extra == "auto_increment";
        let enum_values = parse_literal_list(&column_type, "enum(");
        let set_values = parse_literal_list(&column_type, "set(");
        Self {
            name,
            column_key,
            column_type,
            character_set,
            collation,
            numeric_scale,
            extra,
            is_bool,
            unsigned,
            is_primary,
            auto_increment,
            enum_values,
            set_values,
        }
    }
}

/// Split the quoted member list out of an `enum(...)` / `set(...)` type text.
fn parse_literal_list(column_type: &str, prefix: &str) -> Vec<String> {
    if !column_type.starts_with(prefix) {
        return Vec::new();
    }
    column_type[prefix.len()..]
        .trim_end_matches(')')
        .split(',')
        .map(|v| v.trim_matches('\'').to_string())
        .collect()
}

/// Process info for the watchdog, from `information_schema.PROCESSLIST`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub time: i64,
    pub state: Option<String>,
}

/// The control session: schema lookups, watchdog probes, and the handful of
/// result-set queries the OK/ERR-only dump connection cannot run.
pub struct SchemaClient {
    pool: Pool,
}

impl SchemaClient {
    pub fn new(config: &CdcConfig) -> Self {
        let opts: Opts = OptsBuilder::default()
            .ip_or_hostname(config.host.clone())
            .tcp_port(config.port)
            .user(Some(config.user.clone()))
            .pass(config.password.clone())
            .db_name(config.database.clone())
            .into();
        Self {
            pool: Pool::new(opts),
        }
    }

    /// Ordered column metadata for one table.
    pub async fn get_columns(&self, schema: &str, table: &str) -> Result<Vec<ColumnSchema>> {
        let mut conn = self.pool.get_conn().await.map_err(CdcError::from_mysql)?;
        let rows: Vec<(
            String,
            String,
            String,
            Option<String>,
            Option<String>,
            Option<u64>,
            String,
        )> = conn
            .exec(COLUMNS_QUERY, (schema, table))
            .await
            .map_err(CdcError::from_mysql)?;

        Ok(rows
            .into_iter()
            .map(|(name, key, ctype, charset, collation, scale, extra)| {
                ColumnSchema::from_information_schema(
                    name, key, ctype, charset, collation, scale, extra,
                )
            })
            .collect())
    }

    /// Like [`get_columns`](Self::get_columns), but never gives up: the dump
    /// loop must not advance past a row whose schema is unknown.
    pub async fn get_columns_retry(&self, schema: &str, table: &str) -> Vec<ColumnSchema> {
        loop {
            match self.get_columns(schema, table).await {
                Ok(columns) => {
                    debug!(schema, table, count = columns.len(), "fetched table schema");
                    return columns;
                }
                Err(e) => {
                    warn!(schema, table, error = %e, "schema lookup failed, retrying");
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }
    }

    /// TIME/STATE of a server connection, `None` when it is gone.
    pub async fn connection_info(&self, connection_id: u32) -> Result<Option<ConnectionInfo>> {
        let mut conn = self.pool.get_conn().await.map_err(CdcError::from_mysql)?;
        let row: Option<(Option<i64>, Option<String>)> = conn
            .exec_first(
                "SELECT TIME, STATE FROM information_schema.PROCESSLIST WHERE ID = ?",
                (connection_id,),
            )
            .await
            .map_err(CdcError::from_mysql)?;
        Ok(row.map(|(time, state)| ConnectionInfo {
            time: time.unwrap_or(0),
            state,
        }))
    }

    /// Issue `KILL <id>` against the server; true on success.
    pub async fn kill(&self, connection_id: u32) -> bool {
        let mut conn = match self.pool.get_conn().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "KILL skipped, no control connection");
                return false;
            }
        };
        match conn.query_drop(format!("KILL {connection_id}")).await {
            Ok(()) => true,
            Err(e) => {
                warn!(connection_id, error = %e, "KILL failed");
                false
            }
        }
    }

    /// Current (file, position) of the master via `SHOW MASTER STATUS`.
    pub async fn master_status(&self) -> Result<(String, u32)> {
        let mut conn = self.pool.get_conn().await.map_err(CdcError::from_mysql)?;
        let row: Option<Row> = conn
            .query_first("SHOW MASTER STATUS")
            .await
            .map_err(CdcError::from_mysql)?;
        let row = row.ok_or_else(|| {
            CdcError::replication("SHOW MASTER STATUS returned no rows; is binary logging enabled?")
        })?;
        let file: Option<String> = row.get(0);
        let position: Option<u64> = row.get(1);
        match (file, position) {
            (Some(file), Some(position)) if !file.is_empty() => Ok((file, position as u32)),
            _ => Err(CdcError::replication(
                "SHOW MASTER STATUS returned an empty file name",
            )),
        }
    }

    /// Whether the server reports a binlog checksum algorithm.
    pub async fn binlog_checksum_enabled(&self) -> Result<bool> {
        let mut conn = self.pool.get_conn().await.map_err(CdcError::from_mysql)?;
        let row: Option<(String, String)> = conn
            .query_first("SHOW GLOBAL VARIABLES LIKE 'BINLOG_CHECKSUM'")
            .await
            .map_err(CdcError::from_mysql)?;
        Ok(matches!(row, Some((_, value)) if !value.is_empty()))
    }

    pub async fn disconnect(self) {
        if let Err(e) = self.pool.disconnect().await {
            debug!(error = %e, "control pool disconnect");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(ctype: &str, key: &str, extra: &str) -> ColumnSchema {
        ColumnSchema::from_information_schema(
            "c".into(),
            key.into(),
            ctype.into(),
            None,
            None,
            None,
            extra.into(),
        )
    }

    #[test]
    fn tinyint1_is_bool() {
        assert!(column("tinyint(1)", "", "").is_bool);
        assert!(!column("tinyint(4)", "", "").is_bool);
        assert!(!column("tinyint(1) unsigned", "", "").is_bool);
    }

    #[test]
    fn unsigned_and_auto_increment_flags() {
        let c = column("int(10) unsigned", "", "auto_increment");
        assert!(c.unsigned);
        assert!(c.auto_increment);
        assert!(!column("int(11)", "", "").unsigned);
    }

    #[test]
    fn any_column_key_marks_indexed() {
        assert!(column("int(11)", "PRI", "").is_primary);
        assert!(column("int(11)", "MUL", "").is_primary);
        assert!(!column("int(11)", "", "").is_primary);
    }

    #[test]
    fn enum_and_set_literals() {
        let c = column("enum('small','medium','large')", "", "");
        assert_eq!(c.enum_values, vec!["small", "medium", "large"]);
        assert!(c.set_values.is_empty());

        let c = column("set('a','b')", "", "");
        assert_eq!(c.set_values, vec!["a", "b"]);
        assert!(c.enum_values.is_empty());

        assert!(column("varchar(20)", "", "").enum_values.is_empty());
    }
}

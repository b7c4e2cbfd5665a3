//! MySQL client protocol for the dump connection.
//!
//! This is deliberately a minimal client: handshake and authentication
//! (`mysql_native_password`, plus the cached fast path of
//! `caching_sha2_password`), `COM_QUERY` for OK-only session statements, and
//! `COM_BINLOG_DUMP`. Result-set queries belong on the schema session; the
//! dump connection only ever needs OK, ERR, and event packets.

use anyhow::{anyhow, bail, Context, Result};
use bytes::{BufMut, Bytes, BytesMut};
use sha1::{Digest, Sha1};
use sha2::Sha256;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, trace};

use crate::binlog::codec;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Payloads of exactly this size continue in a follow-up packet.
const MAX_PACKET_CHUNK: usize = 0xFF_FFFF;
/// utf8mb4_general_ci
const CHARSET_UTF8MB4: u8 = 45;

const COM_QUERY: u8 = 0x03;
const COM_BINLOG_DUMP: u8 = 0x12;

mod caps {
    pub const CLIENT_LONG_PASSWORD: u32 = 0x0000_0001;
    pub const CLIENT_CONNECT_WITH_DB: u32 = 0x0000_0008;
    pub const CLIENT_PROTOCOL_41: u32 = 0x0000_0200;
    pub const CLIENT_TRANSACTIONS: u32 = 0x0000_2000;
    pub const CLIENT_SECURE_CONNECTION: u32 = 0x0000_8000;
    pub const CLIENT_PLUGIN_AUTH: u32 = 0x0008_0000;
}

/// Initial greeting from the server (protocol v10).
struct Handshake {
    server_version: String,
    connection_id: u32,
    capabilities: u32,
    auth_data: Vec<u8>,
    auth_plugin: String,
}

fn parse_handshake(payload: &[u8]) -> Result<Handshake> {
    let mut buf = payload;
    let protocol_version = codec::read_u8(&mut buf)?;
    if protocol_version != 10 {
        bail!("unsupported handshake protocol version {}", protocol_version);
    }

    let nul = buf
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| anyhow!("handshake missing server-version terminator"))?;
    let server_version = String::from_utf8_lossy(&buf[..nul]).to_string();
    let mut buf = &buf[nul + 1..];

    let connection_id = codec::read_u32_le(&mut buf)?;
    let mut auth_data = codec::take(&mut buf, 8)?.to_vec();
    codec::read_u8(&mut buf)?; // filler

    let cap_low = codec::read_u16_le(&mut buf)? as u32;
    let _charset = codec::read_u8(&mut buf)?;
    let _status_flags = codec::read_u16_le(&mut buf)?;
    let cap_high = codec::read_u16_le(&mut buf)? as u32;
    let capabilities = (cap_high << 16) | cap_low;

    let auth_data_len = codec::read_u8(&mut buf)? as usize;
    codec::take(&mut buf, 10)?; // reserved

    if capabilities & caps::CLIENT_SECURE_CONNECTION != 0 {
        let part2_len = if auth_data_len > 8 {
            auth_data_len - 8
        } else {
            13
        };
        let part2_take = part2_len.min(buf.len());
        let mut part2 = codec::take(&mut buf, part2_take)?.to_vec();
        if let Some(nul) = part2.iter().position(|&b| b == 0) {
            part2.truncate(nul);
        }
        auth_data.extend_from_slice(&part2);
    }

    let auth_plugin = if capabilities & caps::CLIENT_PLUGIN_AUTH != 0 {
        let nul = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        String::from_utf8_lossy(&buf[..nul]).to_string()
    } else {
        String::new()
    };

    Ok(Handshake {
        server_version,
        connection_id,
        capabilities,
        auth_data,
        auth_plugin,
    })
}

/// ERR packet: 0xFF, u16 code, optional '#' + 5-byte SQL state, message.
fn parse_err_packet(packet: &[u8]) -> (u16, String) {
    if packet.len() < 3 {
        return (0, String::from_utf8_lossy(packet).to_string());
    }
    let code = u16::from_le_bytes([packet[1], packet[2]]);
    let message_start = if packet.len() > 9 && packet[3] == b'#' {
        9
    } else {
        3
    };
    (
        code,
        String::from_utf8_lossy(&packet[message_start..]).to_string(),
    )
}

fn hex_dump(data: &[u8]) -> String {
    data.chunks(16)
        .map(|chunk| {
            chunk
                .iter()
                .map(|b| format!("{b:02x}"))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// `SHA1(password) XOR SHA1(salt + SHA1(SHA1(password)))`
fn native_password_scramble(password: &str, salt: &[u8]) -> Vec<u8> {
    let mut hasher = Sha1::new();
    hasher.update(password.as_bytes());
    let stage1 = hasher.finalize();

    let mut hasher = Sha1::new();
    hasher.update(stage1);
    let stage2 = hasher.finalize();

    let mut hasher = Sha1::new();
    hasher.update(salt);
    hasher.update(stage2);
    let stage3 = hasher.finalize();

    stage1
        .iter()
        .zip(stage3.iter())
        .map(|(a, b)| a ^ b)
        .collect()
}

/// `XOR(SHA256(password), SHA256(SHA256(SHA256(password)) + salt))`
fn caching_sha2_scramble(password: &str, salt: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    let hash1 = hasher.finalize();

    let mut hasher = Sha256::new();
    hasher.update(hash1);
    let hash2 = hasher.finalize();

    let mut hasher = Sha256::new();
    hasher.update(hash2);
    hasher.update(salt);
    let hash3 = hasher.finalize();

    hash1.iter().zip(hash3.iter()).map(|(a, b)| a ^ b).collect()
}

fn scramble(plugin: &str, password: Option<&str>, salt: &[u8]) -> Result<Vec<u8>> {
    let password = match password {
        None | Some("") => return Ok(Vec::new()),
        Some(p) => p,
    };
    match plugin {
        "" | "mysql_native_password" => Ok(native_password_scramble(password, salt)),
        "caching_sha2_password" => Ok(caching_sha2_scramble(password, salt)),
        other => bail!("unsupported auth plugin {:?}", other),
    }
}

/// The replication session: one TCP connection, authenticated, used for the
/// checksum session variable and the binlog dump itself.
pub struct DumpConn {
    stream: BufReader<TcpStream>,
    sequence_id: u8,
    server_version: String,
    connection_id: u32,
}

impl std::fmt::Debug for DumpConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DumpConn")
            .field("server_version", &self.server_version)
            .field("connection_id", &self.connection_id)
            .finish_non_exhaustive()
    }
}

impl DumpConn {
    pub async fn connect(
        host: &str,
        port: u16,
        user: &str,
        password: Option<&str>,
        database: Option<&str>,
    ) -> Result<Self> {
        let addr = format!("{host}:{port}");
        let tcp = timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr))
            .await
            .map_err(|_| anyhow!("connect to {} timed out after {:?}", addr, CONNECT_TIMEOUT))?
            .with_context(|| format!("tcp connect to {addr} failed"))?;

        let mut conn = Self {
            stream: BufReader::new(tcp),
            sequence_id: 0,
            server_version: String::new(),
            connection_id: 0,
        };

        let greeting = conn.read_packet().await?;
        let handshake = parse_handshake(&greeting).context("malformed server handshake")?;
        conn.server_version = handshake.server_version.clone();
        conn.connection_id = handshake.connection_id;
        info!(
            server = %conn.server_version,
            connection_id = conn.connection_id,
            plugin = %handshake.auth_plugin,
            "connected to {addr}"
        );

        conn.authenticate(user, password, database, &handshake)
            .await?;
        Ok(conn)
    }

    pub fn server_version(&self) -> &str {
        &self.server_version
    }

    /// Server-assigned id of this session, as seen in PROCESSLIST.
    pub fn connection_id(&self) -> u32 {
        self.connection_id
    }

    async fn read_packet(&mut self) -> Result<Vec<u8>> {
        let mut payload = Vec::new();
        loop {
            let mut header = [0u8; 4];
            self.stream.read_exact(&mut header).await?;
            let len = (header[0] as usize) | ((header[1] as usize) << 8) | ((header[2] as usize) << 16);
            self.sequence_id = header[3].wrapping_add(1);

            let start = payload.len();
            payload.resize(start + len, 0);
            self.stream.read_exact(&mut payload[start..]).await?;

            if len < MAX_PACKET_CHUNK {
                break;
            }
        }
        Ok(payload)
    }

    async fn write_packet(&mut self, data: &[u8]) -> Result<()> {
        if data.len() >= MAX_PACKET_CHUNK {
            bail!("packet too large: {} bytes", data.len());
        }
        let mut packet = Vec::with_capacity(4 + data.len());
        packet.push((data.len() & 0xFF) as u8);
        packet.push(((data.len() >> 8) & 0xFF) as u8);
        packet.push(((data.len() >> 16) & 0xFF) as u8);
        packet.push(self.sequence_id);
        packet.extend_from_slice(data);

        self.stream.get_mut().write_all(&packet).await?;
        self.stream.get_mut().flush().await?;
        self.sequence_id = self.sequence_id.wrapping_add(1);
        Ok(())
    }

    async fn authenticate(
        &mut self,
        user: &str,
        password: Option<&str>,
        database: Option<&str>,
        handshake: &Handshake,
    ) -> Result<()> {
        let mut flags = caps::CLIENT_LONG_PASSWORD
            | caps::CLIENT_PROTOCOL_41
            | caps::CLIENT_TRANSACTIONS
            | caps::CLIENT_SECURE_CONNECTION
            | caps::CLIENT_PLUGIN_AUTH;
        if database.is_some() {
            flags |= caps::CLIENT_CONNECT_WITH_DB;
        }

        let auth_response = scramble(&handshake.auth_plugin, password, &handshake.auth_data)?;

        let mut response = BytesMut::with_capacity(128);
        response.put_u32_le(flags);
        response.put_u32_le(MAX_PACKET_CHUNK as u32);
        response.put_u8(CHARSET_UTF8MB4);
        response.put_slice(&[0u8; 23]);
        response.put_slice(user.as_bytes());
        response.put_u8(0);
        response.put_u8(auth_response.len() as u8);
        response.put_slice(&auth_response);
        if let Some(db) = database {
            response.put_slice(db.as_bytes());
            response.put_u8(0);
        }
        response.put_slice(handshake.auth_plugin.as_bytes());
        response.put_u8(0);

        self.write_packet(&response).await?;

        let mut plugin = handshake.auth_plugin.clone();
        let mut reply = self.read_packet().await?;
        loop {
            match reply.first() {
                Some(0x00) => {
                    debug!("authenticated");
                    return Ok(());
                }
                Some(0xFF) => {
                    let (code, message) = parse_err_packet(&reply);
                    bail!("authentication failed: {} {}", code, message);
                }
                Some(0xFE) => {
                    // Auth switch: new plugin name + new salt.
                    let rest = &reply[1..];
                    let nul = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
                    plugin = String::from_utf8_lossy(&rest[..nul]).to_string();
                    let mut salt = rest.get(nul + 1..).unwrap_or(&[]).to_vec();
                    if salt.last() == Some(&0) {
                        salt.pop();
                    }
                    debug!(plugin = %plugin, "auth switch");
                    let response = scramble(&plugin, password, &salt)?;
                    self.write_packet(&response).await?;
                    reply = self.read_packet().await?;
                }
                Some(0x01) if plugin == "caching_sha2_password" => match reply.get(1) {
                    Some(0x03) => {
                        debug!("caching_sha2_password fast auth ok");
                        reply = self.read_packet().await?;
                    }
                    Some(0x04) => bail!(
                        "caching_sha2_password requires full authentication; the server has \
                         no cached entry for this account. Log in once with a regular client \
                         or use a mysql_native_password replication account"
                    ),
                    other => bail!("unexpected caching_sha2_password state {:?}", other),
                },
                other => bail!("unexpected authentication reply {:?}", other),
            }
        }
    }

    /// Run a statement that answers with a bare OK (session `SET`s). Result
    /// sets are not read here; those queries belong on the schema session.
    pub async fn query(&mut self, sql: &str) -> Result<()> {
        self.sequence_id = 0;
        let mut packet = BytesMut::with_capacity(sql.len() + 1);
        packet.put_u8(COM_QUERY);
        packet.put_slice(sql.as_bytes());
        self.write_packet(&packet).await?;

        let reply = self.read_packet().await?;
        match reply.first() {
            Some(0xFF) => {
                let (code, message) = parse_err_packet(&reply);
                bail!("query failed: {} {}", code, message);
            }
            _ => Ok(()),
        }
    }

    /// Subscribe to the binlog stream from `(file, position)`.
    pub async fn binlog_dump(
        &mut self,
        server_id: u32,
        file: &str,
        position: u32,
    ) -> Result<BinlogStream<'_>> {
        if server_id == 0 {
            bail!("server id must be non-zero");
        }
        self.sequence_id = 0;
        let mut packet = BytesMut::with_capacity(11 + file.len());
        packet.put_u8(COM_BINLOG_DUMP);
        packet.put_u32_le(position);
        packet.put_u16_le(0); // flags
        packet.put_u32_le(server_id);
        packet.put_slice(file.as_bytes());
        self.write_packet(&packet).await?;

        info!(file, position, server_id, "binlog dump started");
        Ok(BinlogStream { conn: self })
    }
}

/// One framed packet from the dump stream, discriminated on its first byte.
#[derive(Debug)]
pub enum DumpPacket {
    /// OK byte followed by an event record.
    Event(Bytes),
    /// End of stream.
    Eof,
    /// Server-reported error.
    Err { code: u16, message: String },
    /// Anything else; `hex` carries the full packet for diagnostics.
    Unknown { header: u8, hex: String },
}

pub struct BinlogStream<'a> {
    conn: &'a mut DumpConn,
}

impl BinlogStream<'_> {
    pub async fn next_event(&mut self) -> Result<DumpPacket> {
        let packet = self.conn.read_packet().await?;
        trace!(len = packet.len(), "dump packet");
        match packet.first() {
            Some(0x00) => Ok(DumpPacket::Event(Bytes::copy_from_slice(&packet[1..]))),
            Some(0xFE) => Ok(DumpPacket::Eof),
            Some(0xFF) => {
                let (code, message) = parse_err_packet(&packet);
                Ok(DumpPacket::Err { code, message })
            }
            Some(&header) => Ok(DumpPacket::Unknown {
                header,
                hex: hex_dump(&packet),
            }),
            None => Ok(DumpPacket::Eof),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_password_scramble_shape() {
        let salt = b"12345678901234567890";
        assert_eq!(native_password_scramble("password", salt).len(), 20);
        assert!(scramble("mysql_native_password", None, salt)
            .unwrap()
            .is_empty());
        assert!(scramble("mysql_native_password", Some(""), salt)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn caching_sha2_scramble_shape() {
        let salt = b"12345678901234567890";
        let a = caching_sha2_scramble("password", salt);
        assert_eq!(a.len(), 32);
        assert_eq!(a, caching_sha2_scramble("password", salt));
        assert_ne!(a, caching_sha2_scramble("different", salt));
        assert_ne!(a, caching_sha2_scramble("password", b"other_salt_20_bytes_"));
    }

    #[test]
    fn unknown_plugin_is_rejected() {
        assert!(scramble("client_ed25519", Some("pw"), b"salt").is_err());
    }

    #[test]
    fn err_packet_with_sql_state() {
        let mut packet = vec![0xFF, 0x48, 0x04, b'#'];
        packet.extend_from_slice(b"HY000");
        packet.extend_from_slice(b"Could not find first log file name in binary log index file");
        let (code, message) = parse_err_packet(&packet);
        assert_eq!(code, 0x0448);
        assert!(message.starts_with("Could not find first log file"));
    }

    #[test]
    fn err_packet_without_sql_state() {
        let mut packet = vec![0xFF, 0x15, 0x04];
        packet.extend_from_slice(b"Access denied");
        let (code, message) = parse_err_packet(&packet);
        assert_eq!(code, 0x0415);
        assert_eq!(message, "Access denied");
    }

    #[test]
    fn handshake_parse() {
        let mut payload = vec![10u8];
        payload.extend_from_slice(b"5.7.30-log\0");
        payload.extend_from_slice(&77u32.to_le_bytes()); // connection id
        payload.extend_from_slice(b"abcdefgh"); // auth data part 1
        payload.push(0); // filler
        let cap_low: u16 = (caps::CLIENT_PROTOCOL_41 | caps::CLIENT_SECURE_CONNECTION) as u16;
        payload.extend_from_slice(&cap_low.to_le_bytes());
        payload.push(CHARSET_UTF8MB4);
        payload.extend_from_slice(&2u16.to_le_bytes()); // status
        let cap_high: u16 = (caps::CLIENT_PLUGIN_AUTH >> 16) as u16;
        payload.extend_from_slice(&cap_high.to_le_bytes());
        payload.push(21); // auth data length
        payload.extend_from_slice(&[0u8; 10]); // reserved
        payload.extend_from_slice(b"ijklmnopqrst\0"); // auth data part 2
        payload.extend_from_slice(b"mysql_native_password\0");

        let handshake = parse_handshake(&payload).unwrap();
        assert_eq!(handshake.server_version, "5.7.30-log");
        assert_eq!(handshake.connection_id, 77);
        assert_eq!(handshake.auth_plugin, "mysql_native_password");
        assert_eq!(handshake.auth_data, b"abcdefghijklmnopqrst");
        assert_ne!(handshake.capabilities & caps::CLIENT_PLUGIN_AUTH, 0);
    }

    #[test]
    fn hex_dump_wraps_lines() {
        let dump = hex_dump(&[0u8; 20]);
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("00 00"));
    }
}

//! Minimal Source RCON client, as spoken by the Minecraft server console.
//!
//! Packet layout (little endian): `len:i32 | id:i32 | type:i32 | body | 0x00 0x00`,
//! where `len` counts everything after itself.

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const LOGIN: i32 = 3;
const COMMAND: i32 = 2;
const AUTH_RESPONSE: i32 = 2;
const RESPONSE_VALUE: i32 = 0;

/// Largest command body the server accepts from a client.
pub const MAX_COMMAND_LEN: usize = 1446;
const MAX_PACKET_LEN: i32 = 4096 + 10;
const MIN_PACKET_LEN: i32 = 10;

#[derive(Debug, Error)]
pub enum RconError {
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),
    #[error("authentication rejected")]
    AuthFailed,
    #[error("command too long ({0} bytes)")]
    CommandTooLong(usize),
    #[error("protocol error: {0}")]
    Protocol(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    pub id: i32,
    pub kind: i32,
    pub body: String,
}

impl Packet {
    pub fn encode(&self) -> Vec<u8> {
        let body = self.body.as_bytes();
        let len = (body.len() + MIN_PACKET_LEN as usize) as i32;
        let mut buf = Vec::with_capacity(body.len() + 14);
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&self.id.to_le_bytes());
        buf.extend_from_slice(&self.kind.to_le_bytes());
        buf.extend_from_slice(body);
        buf.extend_from_slice(&[0, 0]);
        buf
    }

    pub async fn read_from<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Self, RconError> {
        let len = reader.read_i32_le().await?;
        if !(MIN_PACKET_LEN..=MAX_PACKET_LEN).contains(&len) {
            return Err(RconError::Protocol(format!("invalid packet length {len}")));
        }
        let mut buf = vec![0u8; len as usize];
        reader.read_exact(&mut buf).await?;
        let id = i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let kind = i32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let body = &buf[8..buf.len() - 2];
        Ok(Self { id, kind, body: String::from_utf8_lossy(body).into_owned() })
    }
}

pub struct RconClient {
    stream: TcpStream,
    next_id: i32,
}

impl RconClient {
    pub async fn connect(addr: &str, password: &str) -> Result<Self, RconError> {
        let stream = TcpStream::connect(addr).await?;
        let mut client = Self { stream, next_id: 1 };
        client.login(password).await?;
        Ok(client)
    }

    async fn login(&mut self, password: &str) -> Result<(), RconError> {
        let id = self.send(LOGIN, password).await?;
        loop {
            let packet = Packet::read_from(&mut self.stream).await?;
            // Some servers send an empty value packet ahead of the auth response.
            if packet.kind != AUTH_RESPONSE { continue; }
            if packet.id == -1 { return Err(RconError::AuthFailed); }
            if packet.id != id { return Err(RconError::Protocol(format!("auth response for request {}", packet.id))); }
            return Ok(());
        }
    }

    pub async fn command(&mut self, command: &str) -> Result<String, RconError> {
        if command.len() > MAX_COMMAND_LEN { return Err(RconError::CommandTooLong(command.len())); }
        let id = self.send(COMMAND, command).await?;
        let packet = Packet::read_from(&mut self.stream).await?;
        if packet.kind != RESPONSE_VALUE || packet.id != id {
            return Err(RconError::Protocol(format!("unexpected packet type {} for request {}", packet.kind, packet.id)));
        }
        Ok(packet.body)
    }

    async fn send(&mut self, kind: i32, body: &str) -> Result<i32, RconError> {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        self.stream.write_all(&Packet { id, kind, body: body.to_string() }.encode()).await?;
        Ok(id)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Fake console: accepts `password`, echoes each command back and records it.
    pub(crate) async fn fake_server(password: &'static str) -> (String, tokio::sync::mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(async move {
                    while let Ok(packet) = Packet::read_from(&mut socket).await {
                        let reply = match packet.kind {
                            LOGIN if packet.body == password => Packet { id: packet.id, kind: AUTH_RESPONSE, body: String::new() },
                            LOGIN => Packet { id: -1, kind: AUTH_RESPONSE, body: String::new() },
                            _ => {
                                let _ = tx.send(packet.body.clone());
                                Packet { id: packet.id, kind: RESPONSE_VALUE, body: format!("ok: {}", packet.body) }
                            }
                        };
                        if socket.write_all(&reply.encode()).await.is_err() { break; }
                    }
                });
            }
        });
        (addr, rx)
    }

    #[test]
    fn test_packet_layout() {
        let bytes = Packet { id: 7, kind: COMMAND, body: "list".into() }.encode();
        assert_eq!(&bytes[0..4], &14i32.to_le_bytes());
        assert_eq!(&bytes[4..8], &7i32.to_le_bytes());
        assert_eq!(&bytes[12..16], b"list");
        assert_eq!(&bytes[16..], &[0, 0]);
    }

    #[tokio::test]
    async fn test_decode_rejects_bad_length() {
        let mut bytes: &[u8] = &[1, 0, 0, 0];
        assert!(matches!(Packet::read_from(&mut bytes).await, Err(RconError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_command_round_trip() {
        let (addr, mut seen) = fake_server("hunter2").await;
        let mut client = RconClient::connect(&addr, "hunter2").await.unwrap();
        assert_eq!(client.command("list").await.unwrap(), "ok: list");
        assert_eq!(seen.recv().await.as_deref(), Some("list"));
    }

    #[tokio::test]
    async fn test_wrong_password() {
        let (addr, _) = fake_server("hunter2").await;
        assert!(matches!(RconClient::connect(&addr, "nope").await, Err(RconError::AuthFailed)));
    }
}

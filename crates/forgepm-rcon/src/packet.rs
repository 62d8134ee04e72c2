//! Source-style RCON framing
//!
//! ```text
//! i32 size | i32 id | i32 type | body | 0x00 0x00
//! ```
//! All integers are little-endian; `size` counts everything after itself.

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{RconError, Result};

pub const SERVERDATA_AUTH: i32 = 3;
pub const SERVERDATA_AUTH_RESPONSE: i32 = 2;
pub const SERVERDATA_EXECCOMMAND: i32 = 2;
pub const SERVERDATA_RESPONSE_VALUE: i32 = 0;

/// Largest body a single frame may carry
pub const MAX_BODY_LEN: usize = 4096;

/// id + type + two terminators
const MIN_FRAME_LEN: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub id: i32,
    pub kind: i32,
    pub body: String,
}

impl Packet {
    pub fn new(id: i32, kind: i32, body: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            body: body.into(),
        }
    }

    pub fn encode(&self) -> Result<BytesMut> {
        let body = self.body.as_bytes();
        if body.len() > MAX_BODY_LEN {
            return Err(RconError::CommandTooLong(body.len()));
        }
        let size = MIN_FRAME_LEN + body.len();
        let mut buf = BytesMut::with_capacity(4 + size);
        buf.put_i32_le(size as i32);
        buf.put_i32_le(self.id);
        buf.put_i32_le(self.kind);
        buf.put_slice(body);
        buf.put_u8(0);
        buf.put_u8(0);
        Ok(buf)
    }

    pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<()> {
        let buf = self.encode()?;
        writer.write_all(&buf).await?;
        writer.flush().await?;
        Ok(())
    }

    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Packet> {
        let size = reader.read_i32_le().await?;
        if size < MIN_FRAME_LEN as i32 || size as usize > MAX_BODY_LEN + MIN_FRAME_LEN {
            return Err(RconError::protocol(format!("invalid frame size {}", size)));
        }

        let mut frame = vec![0u8; size as usize];
        reader.read_exact(&mut frame).await?;

        let id = i32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]);
        let kind = i32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]);

        let payload = &frame[8..];
        let body = match payload.iter().position(|b| *b == 0) {
            Some(end) => &payload[..end],
            None => return Err(RconError::protocol("missing body terminator")),
        };

        Ok(Packet {
            id,
            kind,
            body: String::from_utf8_lossy(body).into_owned(),
        })
    }
}

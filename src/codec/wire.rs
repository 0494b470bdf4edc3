//! Frame layer carrying control messages and packet records over one TCP
//! connection.
//!
//! Every frame is `[kind: u8][length: u32 BE][payload]`. Control payloads
//! are JSON [`ControlMessage`]s; packet payloads are the binary form of a
//! [`PacketRecord`]: `[info_len: u32 BE][capture_info][data_len: u32 BE][data]`.
//! Frames are written whole and read whole, so per-connection ordering is
//! exactly the write order.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::codec::packet::PacketRecord;
use crate::error_handling::types::CodecError;
use crate::registry::types::EndpointInfo;

/// Upper bound on a single frame. Anything larger is a corrupt stream, not
/// a legitimate capture record.
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Control,
    Packet,
}

impl FrameKind {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(FrameKind::Control),
            1 => Some(FrameKind::Packet),
            _ => None,
        }
    }

    fn as_byte(self) -> u8 {
        match self {
            FrameKind::Control => 0,
            FrameKind::Packet => 1,
        }
    }
}

/// Control-plane messages exchanged before and around the packet stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Agent announces itself; idempotent on the collector side.
    Register { info: EndpointInfo },
    /// Agent asks to start streaming on this connection.
    StartCapture,
    /// Collector acknowledgement.
    Ack,
    /// Collector refuses the requested operation.
    Refuse { reason: String },
}

/// Writes one frame. The payload is flushed so small control frames are
/// not held back by the socket buffer during handshakes.
pub async fn write_frame<W>(
    writer: &mut W,
    kind: FrameKind,
    payload: &[u8],
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = payload.len() as u32;
    writer.write_all(&[kind.as_byte()]).await?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame. Returns `Ok(None)` on a clean end-of-stream at a frame
/// boundary; EOF in the middle of a frame is an error.
pub async fn read_frame<R>(reader: &mut R) -> std::io::Result<Option<(FrameKind, Vec<u8>)>>
where
    R: AsyncRead + Unpin,
{
    let mut kind_byte = [0u8; 1];
    match reader.read_exact(&mut kind_byte).await {
        Ok(_) => (),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let kind = FrameKind::from_byte(kind_byte[0]).ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("unknown frame kind {:#x}", kind_byte[0]),
        )
    })?;

    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes).await?;
    let len = u32::from_be_bytes(len_bytes);
    if len > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds limit", len),
        ));
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    Ok(Some((kind, payload)))
}

pub async fn write_control<W>(writer: &mut W, msg: &ControlMessage) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let payload = serde_json::to_vec(msg)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    write_frame(writer, FrameKind::Control, &payload).await
}

/// Reads one frame and requires it to be a control message.
pub async fn read_control<R>(reader: &mut R) -> std::io::Result<Option<ControlMessage>>
where
    R: AsyncRead + Unpin,
{
    match read_frame(reader).await? {
        None => Ok(None),
        Some((FrameKind::Control, payload)) => {
            let msg = serde_json::from_slice(&payload)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            Ok(Some(msg))
        }
        Some((FrameKind::Packet, _)) => Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "expected control frame, got packet frame",
        )),
    }
}

impl PacketRecord {
    /// Binary payload for a packet frame.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + self.capture_info.len() + self.data.len());
        buf.extend_from_slice(&(self.capture_info.len() as u32).to_be_bytes());
        buf.extend_from_slice(&self.capture_info);
        buf.extend_from_slice(&(self.data.len() as u32).to_be_bytes());
        buf.extend_from_slice(&self.data);
        buf
    }

    /// Parses a packet-frame payload. A short or inconsistent buffer yields
    /// [`CodecError::TruncatedRecord`], which the session treats the same
    /// way as malformed metadata: skip the record, keep the stream.
    pub fn from_wire(buf: &[u8]) -> Result<Self, CodecError> {
        let (info, rest) = split_field(buf, "capture_info")?;
        let (data, rest) = split_field(rest, "data")?;
        if !rest.is_empty() {
            return Err(CodecError::TruncatedRecord(format!(
                "{} trailing bytes after record",
                rest.len()
            )));
        }
        Ok(PacketRecord {
            data: data.to_vec(),
            capture_info: info.to_vec(),
        })
    }
}

fn split_field<'a>(buf: &'a [u8], field: &str) -> Result<(&'a [u8], &'a [u8]), CodecError> {
    if buf.len() < 4 {
        return Err(CodecError::TruncatedRecord(format!(
            "missing length prefix for {}",
            field
        )));
    }
    let (len_bytes, rest) = buf.split_at(4);
    let len = u32::from_be_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]) as usize;
    if rest.len() < len {
        return Err(CodecError::TruncatedRecord(format!(
            "{} claims {} bytes, {} available",
            field,
            len,
            rest.len()
        )));
    }
    Ok(rest.split_at(len))
}

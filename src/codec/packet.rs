//! Pure transformation between a captured frame with its capture metadata
//! and the wire envelope exchanged with the collector.
//!
//! The metadata travels as a self-describing JSON blob so the envelope
//! stays forward-compatible: a collector can skip a record it cannot parse
//! without losing the rest of the stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error_handling::types::CodecError;

/// Per-frame capture metadata, recorded at the instant a frame is pulled
/// off the capture handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureInfo {
    /// Wall-clock capture time (sub-second resolution preserved).
    pub timestamp: DateTime<Utc>,
    /// Bytes actually captured (bounded by the snapshot length).
    pub capture_length: u32,
    /// Original frame length on the wire.
    pub original_length: u32,
}

/// One captured frame in transit: raw bytes plus the serialized metadata
/// blob. Constructed on the agent right after capture, consumed exactly
/// once by the collector when written to the trace file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketRecord {
    pub data: Vec<u8>,
    pub capture_info: Vec<u8>,
}

/// Wraps a frame and its metadata into a [`PacketRecord`].
///
/// Never fails for well-formed input; frame bytes are carried verbatim.
pub fn encode(data: Vec<u8>, info: &CaptureInfo) -> Result<PacketRecord, CodecError> {
    let capture_info =
        serde_json::to_vec(info).map_err(|e| CodecError::MalformedMetadata(e.to_string()))?;
    Ok(PacketRecord { data, capture_info })
}

/// Unwraps a [`PacketRecord`] back into the frame bytes and metadata.
///
/// Fails with [`CodecError::MalformedMetadata`] when the metadata blob does
/// not parse or claims more captured bytes than the record carries. Callers
/// treat this as a per-record skip, not a stream failure.
pub fn decode(record: PacketRecord) -> Result<(Vec<u8>, CaptureInfo), CodecError> {
    let info: CaptureInfo = serde_json::from_slice(&record.capture_info)
        .map_err(|e| CodecError::MalformedMetadata(e.to_string()))?;

    if info.capture_length as usize > record.data.len() {
        return Err(CodecError::MalformedMetadata(format!(
            "capture_length {} exceeds {} bytes of frame data",
            info.capture_length,
            record.data.len()
        )));
    }

    Ok((record.data, info))
}

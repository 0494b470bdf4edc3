//! Abstraction over an opened live-capture handle.
//!
//! Opening a device and applying a filter expression to it happen outside
//! this crate; once opened, a capture handle is just a blocking producer
//! of frames with their capture metadata.

use std::collections::VecDeque;

use crate::codec::packet::CaptureInfo;
use crate::error_handling::types::AgentError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedFrame {
    pub data: Vec<u8>,
    pub info: CaptureInfo,
}

pub trait CaptureSource: Send {
    /// Blocks until the next frame is available. `Ok(None)` means the
    /// source is drained or was closed; the stream ends cleanly.
    fn next_frame(&mut self) -> Result<Option<CapturedFrame>, AgentError>;
}

/// In-memory source serving a fixed sequence of frames, for tests and dry
/// runs.
pub struct ReplaySource {
    frames: VecDeque<CapturedFrame>,
}

impl ReplaySource {
    pub fn new(frames: Vec<CapturedFrame>) -> Self {
        ReplaySource {
            frames: frames.into(),
        }
    }

    /// Builds a source from raw frame payloads, stamping each with the
    /// current time and its own length.
    pub fn from_payloads(payloads: Vec<Vec<u8>>) -> Self {
        let frames = payloads
            .into_iter()
            .map(|data| CapturedFrame {
                info: CaptureInfo {
                    timestamp: chrono::Utc::now(),
                    capture_length: data.len() as u32,
                    original_length: data.len() as u32,
                },
                data,
            })
            .collect();
        ReplaySource { frames }
    }
}

impl ReplaySource {
    /// Loads every record of a trace file, so an existing capture can be
    /// re-streamed to a collector.
    pub fn from_pcap_file(path: &std::path::Path) -> Result<Self, AgentError> {
        let file = std::fs::File::open(path)
            .map_err(|e| AgentError::CaptureError(format!("{}: {}", path.display(), e)))?;
        let mut reader = crate::session::pcap::PcapReader::new(std::io::BufReader::new(file))
            .map_err(|e| AgentError::CaptureError(e.to_string()))?;

        let mut frames = VecDeque::new();
        while let Some((info, data)) = reader
            .next_record()
            .map_err(|e| AgentError::CaptureError(e.to_string()))?
        {
            frames.push_back(CapturedFrame { data, info });
        }
        Ok(ReplaySource { frames })
    }
}

impl CaptureSource for ReplaySource {
    fn next_frame(&mut self) -> Result<Option<CapturedFrame>, AgentError> {
        Ok(self.frames.pop_front())
    }
}

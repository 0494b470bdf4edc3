//! Minimal pcap container writer.
//!
//! Classic libpcap format: a 24-byte global header followed by one 16-byte
//! record header plus frame bytes per packet. Little-endian fields with the
//! microsecond-resolution magic, which every reader understands.

use std::io::{Read, Write};

use chrono::TimeZone;

use crate::codec::packet::CaptureInfo;

const PCAP_MAGIC: u32 = 0xa1b2_c3d4;
const VERSION_MAJOR: u16 = 2;
const VERSION_MINOR: u16 = 4;

/// Ethernet, the link type of every capture source this system consumes.
pub const LINKTYPE_ETHERNET: u32 = 1;

pub struct PcapWriter<W: Write> {
    out: W,
    snapshot_length: u32,
}

impl<W: Write> PcapWriter<W> {
    /// Writes the global header and returns the writer. The snapshot length
    /// is whatever the configuration says; there is no baked-in default
    /// here.
    pub fn new(mut out: W, snapshot_length: u32, link_type: u32) -> std::io::Result<Self> {
        out.write_all(&PCAP_MAGIC.to_le_bytes())?;
        out.write_all(&VERSION_MAJOR.to_le_bytes())?;
        out.write_all(&VERSION_MINOR.to_le_bytes())?;
        out.write_all(&0i32.to_le_bytes())?; // thiszone
        out.write_all(&0u32.to_le_bytes())?; // sigfigs
        out.write_all(&snapshot_length.to_le_bytes())?;
        out.write_all(&link_type.to_le_bytes())?;
        Ok(PcapWriter {
            out,
            snapshot_length,
        })
    }

    /// Appends one record. `incl_len` is clamped to the bytes actually
    /// present and to the snapshot length, so a record can never promise
    /// more than it carries.
    pub fn write_record(&mut self, info: &CaptureInfo, data: &[u8]) -> std::io::Result<()> {
        let ts_sec = info.timestamp.timestamp() as u32;
        let ts_usec = info.timestamp.timestamp_subsec_micros();
        let incl_len = (info.capture_length)
            .min(data.len() as u32)
            .min(self.snapshot_length);

        self.out.write_all(&ts_sec.to_le_bytes())?;
        self.out.write_all(&ts_usec.to_le_bytes())?;
        self.out.write_all(&incl_len.to_le_bytes())?;
        self.out.write_all(&info.original_length.to_le_bytes())?;
        self.out.write_all(&data[..incl_len as usize])?;
        Ok(())
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.out.flush()
    }
}

/// Reads back the same container format, used by the agent's replay
/// source. Only the little-endian microsecond variant is accepted.
pub struct PcapReader<R: Read> {
    input: R,
}

impl<R: Read> PcapReader<R> {
    pub fn new(mut input: R) -> std::io::Result<Self> {
        let mut header = [0u8; 24];
        input.read_exact(&mut header)?;
        let magic = u32::from_le_bytes(header[0..4].try_into().unwrap());
        if magic != PCAP_MAGIC {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unsupported pcap magic {:#x}", magic),
            ));
        }
        Ok(PcapReader { input })
    }

    /// Next record, or `None` at end of file.
    pub fn next_record(&mut self) -> std::io::Result<Option<(CaptureInfo, Vec<u8>)>> {
        let mut header = [0u8; 16];
        match self.input.read_exact(&mut header) {
            Ok(_) => (),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        }

        let ts_sec = u32::from_le_bytes(header[0..4].try_into().unwrap());
        let ts_usec = u32::from_le_bytes(header[4..8].try_into().unwrap());
        let incl_len = u32::from_le_bytes(header[8..12].try_into().unwrap());
        let orig_len = u32::from_le_bytes(header[12..16].try_into().unwrap());

        let mut data = vec![0u8; incl_len as usize];
        self.input.read_exact(&mut data)?;

        let timestamp = chrono::Utc
            .timestamp_opt(ts_sec as i64, ts_usec.saturating_mul(1000))
            .single()
            .ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::InvalidData, "bad record timestamp")
            })?;

        Ok(Some((
            CaptureInfo {
                timestamp,
                capture_length: incl_len,
                original_length: orig_len,
            },
            data,
        )))
    }
}

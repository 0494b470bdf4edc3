//! Per-connection capture session on the collector.
//!
//! One `CaptureSession` exists for the lifetime of one streaming
//! connection: `Idle` until the peer is matched against the registry,
//! `Streaming` while records flow into the trace file, `Closed` once the
//! stream ends. No state is re-enterable; a reconnecting agent gets a
//! fresh session object.

use std::fs::OpenOptions;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use log::{debug, info, warn};
use uuid::Uuid;

use crate::codec::packet::{decode, PacketRecord};
use crate::error_handling::types::SessionError;
use crate::registry::EndpointRegistry;
use crate::session::pcap::PcapWriter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Streaming,
    Closed,
}

pub struct CaptureSession {
    id: Uuid,
    peer_address: String,
    registry: Arc<EndpointRegistry>,
    state: SessionState,
    writer: Option<PcapWriter<BufWriter<std::fs::File>>>,
    output_path: Option<PathBuf>,
    packets_written: u64,
    malformed_records: u64,
}

impl CaptureSession {
    /// A session starts `Idle`; nothing is claimed or opened until
    /// [`start`](Self::start) matches the peer against the registry.
    pub fn new(registry: Arc<EndpointRegistry>, peer_address: String) -> Self {
        CaptureSession {
            id: Uuid::new_v4(),
            peer_address,
            registry,
            state: SessionState::Idle,
            writer: None,
            output_path: None,
            packets_written: 0,
            malformed_records: 0,
        }
    }

    /// Claims the endpoint's active-session slot, opens the trace file and
    /// writes the pcap header.
    ///
    /// On `UnknownEndpoint` or `DuplicateActiveSession` the session stays
    /// `Idle` and the caller refuses the stream. A file error after the
    /// slot was claimed releases the slot again before returning.
    pub fn start(
        &mut self,
        output_dir: &Path,
        snapshot_length: u32,
        link_type: u32,
    ) -> Result<(), SessionError> {
        let endpoint = self.registry.begin_stream(&self.peer_address)?;

        // the session id keeps back-to-back sessions within the same
        // millisecond from landing in one file
        let session_tag = self.id.simple().to_string();
        let file_name = format!(
            "{}-{}-{}.pcap",
            endpoint.trace_file_base,
            Utc::now().format("%Y%m%d-%H%M%S%.3f"),
            &session_tag[..8]
        );
        let path = output_dir.join(file_name);

        let open_result = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&path)
            .and_then(|file| PcapWriter::new(BufWriter::new(file), snapshot_length, link_type));

        match open_result {
            Ok(writer) => {
                info!(
                    "[{}] capture started for {} -> {}",
                    self.id,
                    self.peer_address,
                    path.display()
                );
                self.writer = Some(writer);
                self.output_path = Some(path);
                self.state = SessionState::Streaming;
                Ok(())
            }
            Err(e) => {
                self.registry.end_stream(&self.peer_address);
                Err(SessionError::FileIoError(e))
            }
        }
    }

    /// Consumes one packet-frame payload from the transport.
    ///
    /// Undecodable payloads and malformed metadata are counted and skipped;
    /// only a trace-file write error is terminal, in which case the session
    /// is closed before the error is returned.
    pub fn handle_frame_payload(&mut self, payload: &[u8]) -> Result<(), SessionError> {
        let record = match PacketRecord::from_wire(payload) {
            Ok(record) => record,
            Err(e) => {
                warn!("[{}] skipping record: {}", self.id, e);
                self.malformed_records += 1;
                return Ok(());
            }
        };
        self.handle_record(record)
    }

    /// Decodes one record and appends it to the trace file.
    pub fn handle_record(&mut self, record: PacketRecord) -> Result<(), SessionError> {
        let writer = match self.writer.as_mut() {
            Some(writer) if self.state == SessionState::Streaming => writer,
            _ => {
                return Err(SessionError::TransportError(std::io::Error::new(
                    std::io::ErrorKind::NotConnected,
                    "session is not streaming",
                )))
            }
        };

        let (data, info) = match decode(record) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("[{}] skipping record: {}", self.id, e);
                self.malformed_records += 1;
                return Ok(());
            }
        };

        if let Err(e) = writer.write_record(&info, &data) {
            self.close();
            return Err(SessionError::FileIoError(e));
        }

        self.packets_written += 1;
        self.registry.add_packets(&self.peer_address, 1);
        debug!(
            "[{}] wrote packet #{} ({} bytes)",
            self.id,
            self.packets_written,
            data.len()
        );
        Ok(())
    }

    /// Flushes and releases the trace file and clears the endpoint's
    /// streaming flag. Idempotent; later calls are no-ops.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        let was_streaming = self.state == SessionState::Streaming;
        self.state = SessionState::Closed;

        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.flush() {
                warn!("[{}] flush on close failed: {}", self.id, e);
            }
        }
        if was_streaming {
            self.registry.end_stream(&self.peer_address);
            info!(
                "[{}] capture ended for {}: {} packets written, {} malformed",
                self.id, self.peer_address, self.packets_written, self.malformed_records
            );
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn peer_address(&self) -> &str {
        &self.peer_address
    }

    pub fn packets_written(&self) -> u64 {
        self.packets_written
    }

    pub fn malformed_records(&self) -> u64 {
        self.malformed_records
    }

    pub fn output_path(&self) -> Option<&Path> {
        self.output_path.as_deref()
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::packet::{encode, CaptureInfo};
    use crate::registry::EndpointInfo;
    use crate::session::pcap::LINKTYPE_ETHERNET;

    fn registry_with(addr: &str) -> Arc<EndpointRegistry> {
        let registry = Arc::new(EndpointRegistry::new());
        registry.register(&EndpointInfo {
            ip_address: addr.to_string(),
            hostname: "sensor".to_string(),
            interface: "eth0".to_string(),
        });
        registry
    }

    fn record(payload: &[u8]) -> PacketRecord {
        let info = CaptureInfo {
            timestamp: Utc::now(),
            capture_length: payload.len() as u32,
            original_length: payload.len() as u32,
        };
        encode(payload.to_vec(), &info).unwrap()
    }

    #[test]
    fn test_start_unknown_endpoint_stays_idle() {
        let registry = Arc::new(EndpointRegistry::new());
        let dir = tempfile::tempdir().unwrap();
        let mut session = CaptureSession::new(registry, "192.0.2.9".to_string());

        let result = session.start(dir.path(), 65535, LINKTYPE_ETHERNET);

        assert!(matches!(result, Err(SessionError::UnknownEndpoint(_))));
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_streaming_writes_records_and_counts() {
        let registry = registry_with("10.1.1.1");
        let dir = tempfile::tempdir().unwrap();
        let mut session = CaptureSession::new(registry.clone(), "10.1.1.1".to_string());

        session.start(dir.path(), 65535, LINKTYPE_ETHERNET).unwrap();
        assert_eq!(session.state(), SessionState::Streaming);
        assert!(registry.lookup("10.1.1.1").unwrap().streaming_now);

        session.handle_record(record(&[1, 2, 3])).unwrap();
        session.handle_record(record(&[4, 5, 6, 7])).unwrap();
        session.close();

        assert_eq!(session.packets_written(), 2);
        assert_eq!(registry.lookup("10.1.1.1").unwrap().packet_count, 2);
        assert!(!registry.lookup("10.1.1.1").unwrap().streaming_now);

        let written = std::fs::read(session.output_path().unwrap()).unwrap();
        // global header + two records with 3 and 4 byte frames
        assert_eq!(written.len(), 24 + 16 + 3 + 16 + 4);
    }

    #[test]
    fn test_malformed_record_is_skipped_not_fatal() {
        let registry = registry_with("10.1.1.2");
        let dir = tempfile::tempdir().unwrap();
        let mut session = CaptureSession::new(registry, "10.1.1.2".to_string());
        session.start(dir.path(), 65535, LINKTYPE_ETHERNET).unwrap();

        for i in 0..10u8 {
            if i == 4 {
                let bad = PacketRecord {
                    data: vec![0u8; 8],
                    capture_info: b"{broken".to_vec(),
                };
                session.handle_record(bad).unwrap();
            } else {
                session.handle_record(record(&[i; 8])).unwrap();
            }
        }

        assert_eq!(session.packets_written(), 9);
        assert_eq!(session.malformed_records(), 1);
        assert_eq!(session.state(), SessionState::Streaming);
    }

    #[test]
    fn test_close_is_idempotent_and_releases_slot() {
        let registry = registry_with("10.1.1.3");
        let dir = tempfile::tempdir().unwrap();
        let mut session = CaptureSession::new(registry.clone(), "10.1.1.3".to_string());
        session.start(dir.path(), 65535, LINKTYPE_ETHERNET).unwrap();

        session.close();
        session.close();

        assert_eq!(session.state(), SessionState::Closed);
        assert!(registry.begin_stream("10.1.1.3").is_ok());
    }

    #[test]
    fn test_drop_releases_streaming_slot() {
        let registry = registry_with("10.1.1.4");
        let dir = tempfile::tempdir().unwrap();
        {
            let mut session = CaptureSession::new(registry.clone(), "10.1.1.4".to_string());
            session.start(dir.path(), 65535, LINKTYPE_ETHERNET).unwrap();
        }
        assert!(!registry.lookup("10.1.1.4").unwrap().streaming_now);
    }

    #[test]
    fn test_fresh_sessions_use_distinct_files() {
        let registry = registry_with("10.1.1.5");
        let dir = tempfile::tempdir().unwrap();

        let mut first = CaptureSession::new(registry.clone(), "10.1.1.5".to_string());
        first.start(dir.path(), 65535, LINKTYPE_ETHERNET).unwrap();
        let first_path = first.output_path().unwrap().to_path_buf();
        first.close();

        // restart immediately; even within the same millisecond the two
        // sessions must not share a trace file
        let mut second = CaptureSession::new(registry, "10.1.1.5".to_string());
        second.start(dir.path(), 65535, LINKTYPE_ETHERNET).unwrap();
        second.handle_record(record(&[1, 2, 3])).unwrap();
        second.close();

        assert_ne!(second.output_path().unwrap(), first_path.as_path());
        // each file carries exactly one global header
        let first_bytes = std::fs::read(&first_path).unwrap();
        let second_bytes = std::fs::read(second.output_path().unwrap()).unwrap();
        assert_eq!(first_bytes.len(), 24);
        assert_eq!(second_bytes.len(), 24 + 16 + 3);
    }
}

//! Agent-side connection handling: registration and the capture stream.
//!
//! Capture and transmission are decoupled by a bounded queue: the capture
//! loop runs on a blocking thread and `blocking_send`s into the channel,
//! the transmitter task drains it onto the socket in order. A full queue
//! stalls capture briefly instead of dropping frames.

use std::time::Duration;

use log::{debug, info};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::agent::capture_source::CaptureSource;
use crate::codec::packet::{encode, PacketRecord};
use crate::codec::wire::{read_control, write_control, write_frame, ControlMessage, FrameKind};
use crate::configuration::AgentConfig;
use crate::error_handling::types::AgentError;
use crate::registry::EndpointInfo;

/// Capacity of the capture-to-transmitter queue, in records.
pub const SEND_QUEUE_CAPACITY: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamStats {
    pub packets_sent: u64,
    pub bytes_sent: u64,
}

pub struct Uplink {
    config: AgentConfig,
}

impl Uplink {
    pub fn new(config: AgentConfig) -> Self {
        Uplink { config }
    }

    /// Registers this agent with the collector. Idempotent on the
    /// collector side; must complete before any capture stream is opened.
    pub async fn register(&self, info: &EndpointInfo) -> Result<(), AgentError> {
        let mut stream = self.connect().await?;
        write_control(
            &mut stream,
            &ControlMessage::Register { info: info.clone() },
        )
        .await?;

        let reply = timeout(self.handshake_timeout(), read_control(&mut stream))
            .await
            .map_err(|_| AgentError::HandshakeFailed("registration timed out".to_string()))??;

        match reply {
            Some(ControlMessage::Ack) => {
                info!("registered with collector as {}", info.ip_address);
                Ok(())
            }
            Some(ControlMessage::Refuse { reason }) => Err(AgentError::Refused(reason)),
            other => Err(AgentError::HandshakeFailed(format!(
                "unexpected registration reply: {:?}",
                other
            ))),
        }
    }

    /// Streams the source to the collector until it is drained, a
    /// configured limit is hit, or the transport fails.
    pub async fn stream_capture<S>(&self, source: S) -> Result<StreamStats, AgentError>
    where
        S: CaptureSource + 'static,
    {
        let mut stream = self.connect().await?;
        write_control(&mut stream, &ControlMessage::StartCapture).await?;

        let reply = timeout(self.handshake_timeout(), read_control(&mut stream))
            .await
            .map_err(|_| AgentError::HandshakeFailed("capture handshake timed out".to_string()))??;
        match reply {
            Some(ControlMessage::Ack) => (),
            Some(ControlMessage::Refuse { reason }) => return Err(AgentError::Refused(reason)),
            other => {
                return Err(AgentError::HandshakeFailed(format!(
                    "unexpected capture reply: {:?}",
                    other
                )))
            }
        }
        info!("streaming packets to {}", self.config.rpc_endpoint());

        let (tx, mut rx) = mpsc::channel::<PacketRecord>(SEND_QUEUE_CAPACITY);
        let limits = ProducerLimits {
            max_packets: self.config.max_packets,
            max_bytes: self.config.max_bytes,
            stats_every: self.config.stats_every,
        };
        let producer = tokio::task::spawn_blocking(move || producer_loop(source, tx, limits));

        let mut transport_result: Result<(), AgentError> = Ok(());
        while let Some(record) = rx.recv().await {
            if let Err(e) = write_frame(&mut stream, FrameKind::Packet, &record.to_wire()).await {
                transport_result = Err(AgentError::TransportError(e));
                break;
            }
        }
        // unblocks a producer stuck on a full queue after a transport error
        rx.close();
        drop(rx);

        let stats = producer
            .await
            .map_err(|e| AgentError::CaptureError(e.to_string()))??;
        transport_result?;

        // close our half so the collector sees EOF at a frame boundary,
        // then wait for its terminal acknowledgement (best effort)
        stream.shutdown().await?;
        let _ = read_control(&mut stream).await;

        info!(
            "capture stream finished: {} packets, {} bytes",
            stats.packets_sent, stats.bytes_sent
        );
        Ok(stats)
    }

    async fn connect(&self) -> Result<TcpStream, AgentError> {
        TcpStream::connect(self.config.rpc_endpoint())
            .await
            .map_err(AgentError::ConnectionFailed)
    }

    fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.config.register_timeout_secs)
    }
}

struct ProducerLimits {
    max_packets: Option<u64>,
    max_bytes: Option<u64>,
    stats_every: u64,
}

/// Capture loop: pulls frames off the source, wraps them into records and
/// pushes them into the bounded queue in capture order.
fn producer_loop<S>(
    mut source: S,
    tx: mpsc::Sender<PacketRecord>,
    limits: ProducerLimits,
) -> Result<StreamStats, AgentError>
where
    S: CaptureSource,
{
    let mut packets = 0u64;
    let mut bytes = 0u64;

    loop {
        let frame = match source.next_frame()? {
            Some(frame) => frame,
            None => break,
        };

        packets += 1;
        bytes += frame.data.len() as u64;

        let record =
            encode(frame.data, &frame.info).map_err(|e| AgentError::CaptureError(e.to_string()))?;
        if tx.blocking_send(record).is_err() {
            // transmitter is gone; it carries the real error
            debug!("send queue closed, stopping capture loop");
            break;
        }

        if limits.stats_every > 0 && packets % limits.stats_every == 0 {
            info!("sent #{} packets", packets);
        }
        if limits.max_packets.is_some_and(|max| packets >= max) {
            info!("packet limit reached, stopping capture");
            break;
        }
        if limits.max_bytes.is_some_and(|max| bytes >= max) {
            info!("byte limit reached, stopping capture");
            break;
        }
    }

    Ok(StreamStats {
        packets_sent: packets,
        bytes_sent: bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::capture_source::ReplaySource;
    use crate::codec::wire::read_frame;
    use tokio::net::TcpListener;

    fn config_for(addr: std::net::SocketAddr) -> AgentConfig {
        AgentConfig {
            collector_address: addr.ip().to_string(),
            rpc_port: addr.port(),
            register_timeout_secs: 5,
            ..Default::default()
        }
    }

    fn endpoint_info() -> EndpointInfo {
        EndpointInfo {
            ip_address: "10.5.5.5".to_string(),
            hostname: "sensor".to_string(),
            interface: "eth0".to_string(),
        }
    }

    /// Accepts one capture connection, acks it and returns the packet
    /// payloads received until EOF.
    async fn accept_capture(listener: TcpListener) -> Vec<Vec<u8>> {
        let (mut stream, _) = listener.accept().await.unwrap();
        match read_control(&mut stream).await.unwrap() {
            Some(ControlMessage::StartCapture) => (),
            other => panic!("expected start_capture, got {:?}", other),
        }
        write_control(&mut stream, &ControlMessage::Ack).await.unwrap();

        let mut payloads = Vec::new();
        while let Some((kind, payload)) = read_frame(&mut stream).await.unwrap() {
            assert_eq!(kind, FrameKind::Packet);
            payloads.push(payload);
        }
        let _ = write_control(&mut stream, &ControlMessage::Ack).await;
        payloads
    }

    #[tokio::test]
    async fn test_register_acknowledged() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            match read_control(&mut stream).await.unwrap() {
                Some(ControlMessage::Register { info }) => {
                    assert_eq!(info.hostname, "sensor");
                }
                other => panic!("expected register, got {:?}", other),
            }
            write_control(&mut stream, &ControlMessage::Ack).await.unwrap();
        });

        let uplink = Uplink::new(config_for(addr));
        uplink.register(&endpoint_info()).await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_stream_capture_delivers_frames_in_order() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(accept_capture(listener));

        let payloads: Vec<Vec<u8>> = (0u8..20).map(|i| vec![i; 16]).collect();
        let uplink = Uplink::new(config_for(addr));
        let stats = uplink
            .stream_capture(ReplaySource::from_payloads(payloads.clone()))
            .await
            .unwrap();

        assert_eq!(stats.packets_sent, 20);
        assert_eq!(stats.bytes_sent, 20 * 16);

        let received = server.await.unwrap();
        assert_eq!(received.len(), 20);
        for (wire, original) in received.iter().zip(&payloads) {
            let record = PacketRecord::from_wire(wire).unwrap();
            assert_eq!(&record.data, original);
        }
    }

    #[tokio::test]
    async fn test_stream_capture_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let _ = read_control(&mut stream).await.unwrap();
            write_control(
                &mut stream,
                &ControlMessage::Refuse {
                    reason: "endpoint 127.0.0.1 not registered".to_string(),
                },
            )
            .await
            .unwrap();
        });

        let uplink = Uplink::new(config_for(addr));
        match uplink.stream_capture(ReplaySource::from_payloads(vec![])).await {
            Err(AgentError::Refused(reason)) => assert!(reason.contains("not registered")),
            other => panic!("expected Refused, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_max_packets_limit_stops_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(accept_capture(listener));

        let mut config = config_for(addr);
        config.max_packets = Some(3);
        let uplink = Uplink::new(config);

        let payloads: Vec<Vec<u8>> = (0u8..10).map(|i| vec![i]).collect();
        let stats = uplink
            .stream_capture(ReplaySource::from_payloads(payloads))
            .await
            .unwrap();

        assert_eq!(stats.packets_sent, 3);
        assert_eq!(server.await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_max_bytes_limit_stops_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(accept_capture(listener));

        let mut config = config_for(addr);
        config.max_bytes = Some(40);
        let uplink = Uplink::new(config);

        let payloads: Vec<Vec<u8>> = (0u8..10).map(|i| vec![i; 16]).collect();
        let stats = uplink
            .stream_capture(ReplaySource::from_payloads(payloads))
            .await
            .unwrap();

        // 16-byte frames: the limit trips on the third one
        assert_eq!(stats.packets_sent, 3);
        assert_eq!(server.await.unwrap().len(), 3);
    }
}

//! End-to-end tests driving the dispatcher over loopback TCP.
//!
//! Distinct agent identities use distinct loopback addresses (127.0.0.1,
//! 127.0.0.2, ...), which Linux accepts without configuration, so the
//! peer-address matching path is exercised for real.

use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpSocket, TcpStream};

use crate::codec::packet::{encode, CaptureInfo};
use crate::codec::wire::{read_control, write_control, write_frame, ControlMessage, FrameKind};
use crate::collector::Dispatcher;
use crate::configuration::CollectorConfig;
use crate::registry::{EndpointInfo, EndpointRegistry};

async fn start_collector(output_dir: &Path) -> (SocketAddr, Arc<EndpointRegistry>) {
    let registry = Arc::new(EndpointRegistry::new());
    let config = CollectorConfig {
        output_dir: output_dir.to_path_buf(),
        handshake_timeout_secs: 5,
        ..Default::default()
    };
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dispatcher = Dispatcher::new(config, registry.clone());
    tokio::spawn(async move {
        let _ = dispatcher.serve(listener).await;
    });

    (addr, registry)
}

async fn connect_from(source: &str, collector: SocketAddr) -> TcpStream {
    let socket = TcpSocket::new_v4().unwrap();
    let ip: IpAddr = source.parse().unwrap();
    socket.bind(SocketAddr::new(ip, 0)).unwrap();
    socket.connect(collector).await.unwrap()
}

async fn register(collector: SocketAddr, ip: &str, hostname: &str) {
    let mut stream = TcpStream::connect(collector).await.unwrap();
    write_control(
        &mut stream,
        &ControlMessage::Register {
            info: EndpointInfo {
                ip_address: ip.to_string(),
                hostname: hostname.to_string(),
                interface: "eth0".to_string(),
            },
        },
    )
    .await
    .unwrap();
    assert_eq!(
        read_control(&mut stream).await.unwrap(),
        Some(ControlMessage::Ack)
    );
}

/// Opens a capture stream from `source`, expects the collector to accept.
async fn open_capture(source: &str, collector: SocketAddr) -> TcpStream {
    let mut stream = connect_from(source, collector).await;
    write_control(&mut stream, &ControlMessage::StartCapture)
        .await
        .unwrap();
    assert_eq!(
        read_control(&mut stream).await.unwrap(),
        Some(ControlMessage::Ack)
    );
    stream
}

async fn send_packet(stream: &mut TcpStream, payload: &[u8]) {
    let info = CaptureInfo {
        timestamp: chrono::Utc::now(),
        capture_length: payload.len() as u32,
        original_length: payload.len() as u32,
    };
    let record = encode(payload.to_vec(), &info).unwrap();
    write_frame(stream, FrameKind::Packet, &record.to_wire())
        .await
        .unwrap();
}

/// Shuts the write half down and waits for the collector's terminal ack,
/// which guarantees the session is closed and the file flushed.
async fn finish_capture(mut stream: TcpStream) {
    stream.shutdown().await.unwrap();
    assert_eq!(
        read_control(&mut stream).await.unwrap(),
        Some(ControlMessage::Ack)
    );
}

fn trace_file_for(dir: &Path, base: &str) -> std::path::PathBuf {
    let mut matches: Vec<_> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(base))
        })
        .collect();
    assert_eq!(matches.len(), 1, "expected one trace file for {}", base);
    matches.pop().unwrap()
}

/// Splits a pcap file into its record payloads.
fn pcap_payloads(bytes: &[u8]) -> Vec<Vec<u8>> {
    assert_eq!(&bytes[0..4], &0xa1b2_c3d4u32.to_le_bytes());
    let mut payloads = Vec::new();
    let mut offset = 24;
    while offset < bytes.len() {
        let incl_len =
            u32::from_le_bytes(bytes[offset + 8..offset + 12].try_into().unwrap()) as usize;
        payloads.push(bytes[offset + 16..offset + 16 + incl_len].to_vec());
        offset += 16 + incl_len;
    }
    payloads
}

#[tokio::test]
async fn test_register_stream_and_reconstruct() {
    let dir = tempfile::tempdir().unwrap();
    let (collector, registry) = start_collector(dir.path()).await;

    register(collector, "127.0.0.1", "alpha").await;

    let mut stream = open_capture("127.0.0.1", collector).await;
    let payloads: Vec<Vec<u8>> = (1u8..=5).map(|i| vec![i; 10 + i as usize]).collect();
    for payload in &payloads {
        send_packet(&mut stream, payload).await;
    }
    finish_capture(stream).await;

    let endpoint = registry.lookup("127.0.0.1").unwrap();
    assert_eq!(endpoint.packet_count, 5);
    assert!(!endpoint.streaming_now);

    let path = trace_file_for(dir.path(), "alpha-(127.0.0.1)");
    let written = pcap_payloads(&std::fs::read(path).unwrap());
    assert_eq!(written, payloads);
}

#[tokio::test]
async fn test_unregistered_endpoint_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let (collector, _registry) = start_collector(dir.path()).await;

    let mut stream = TcpStream::connect(collector).await.unwrap();
    write_control(&mut stream, &ControlMessage::StartCapture)
        .await
        .unwrap();

    match read_control(&mut stream).await.unwrap() {
        Some(ControlMessage::Refuse { reason }) => {
            assert!(reason.contains("No registered endpoint"));
        }
        other => panic!("expected refusal, got {:?}", other),
    }
}

#[tokio::test]
async fn test_duplicate_session_refused_while_first_active() {
    let dir = tempfile::tempdir().unwrap();
    let (collector, _registry) = start_collector(dir.path()).await;

    register(collector, "127.0.0.1", "alpha").await;
    let first = open_capture("127.0.0.1", collector).await;

    let mut second = TcpStream::connect(collector).await.unwrap();
    write_control(&mut second, &ControlMessage::StartCapture)
        .await
        .unwrap();
    match read_control(&mut second).await.unwrap() {
        Some(ControlMessage::Refuse { reason }) => {
            assert!(reason.contains("already has an active session"));
        }
        other => panic!("expected refusal, got {:?}", other),
    }

    // once the first stream ends the slot frees up again
    finish_capture(first).await;
    let third = open_capture("127.0.0.1", collector).await;
    finish_capture(third).await;
}

#[tokio::test]
async fn test_concurrent_agents_write_independent_files() {
    let dir = tempfile::tempdir().unwrap();
    let (collector, registry) = start_collector(dir.path()).await;

    register(collector, "127.0.0.1", "alpha").await;
    register(collector, "127.0.0.2", "bravo").await;

    let alpha = async {
        let mut stream = open_capture("127.0.0.1", collector).await;
        for _ in 0..5 {
            send_packet(&mut stream, &[0xAA; 32]).await;
        }
        finish_capture(stream).await;
    };
    let bravo = async {
        let mut stream = open_capture("127.0.0.2", collector).await;
        for _ in 0..3 {
            send_packet(&mut stream, &[0xBB; 48]).await;
        }
        finish_capture(stream).await;
    };
    tokio::join!(alpha, bravo);

    assert_eq!(registry.lookup("127.0.0.1").unwrap().packet_count, 5);
    assert_eq!(registry.lookup("127.0.0.2").unwrap().packet_count, 3);

    let alpha_payloads = pcap_payloads(
        &std::fs::read(trace_file_for(dir.path(), "alpha-(127.0.0.1)")).unwrap(),
    );
    let bravo_payloads = pcap_payloads(
        &std::fs::read(trace_file_for(dir.path(), "bravo-(127.0.0.2)")).unwrap(),
    );

    assert_eq!(alpha_payloads.len(), 5);
    assert!(alpha_payloads.iter().all(|p| p == &vec![0xAA; 32]));
    assert_eq!(bravo_payloads.len(), 3);
    assert!(bravo_payloads.iter().all(|p| p == &vec![0xBB; 48]));
}

#[tokio::test]
async fn test_malformed_record_does_not_end_session() {
    let dir = tempfile::tempdir().unwrap();
    let (collector, registry) = start_collector(dir.path()).await;

    register(collector, "127.0.0.1", "alpha").await;
    let mut stream = open_capture("127.0.0.1", collector).await;

    for i in 0..10u8 {
        if i == 5 {
            // packet frame whose payload is not a valid record
            write_frame(&mut stream, FrameKind::Packet, b"garbage")
                .await
                .unwrap();
        } else {
            send_packet(&mut stream, &[i; 8]).await;
        }
    }
    finish_capture(stream).await;

    assert_eq!(registry.lookup("127.0.0.1").unwrap().packet_count, 9);
    let path = trace_file_for(dir.path(), "alpha-(127.0.0.1)");
    assert_eq!(pcap_payloads(&std::fs::read(path).unwrap()).len(), 9);
}

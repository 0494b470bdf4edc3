//! Accept loop of the capture service.
//!
//! Every accepted connection carries exactly one operation, announced by
//! its first control frame: a registration exchange, or a capture stream
//! that runs until the agent hangs up. One task per connection; sessions
//! for distinct endpoints proceed fully independently.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use crate::codec::wire::{read_control, read_frame, write_control, ControlMessage, FrameKind};
use crate::configuration::CollectorConfig;
use crate::error_handling::types::CollectorError;
use crate::registry::EndpointRegistry;
use crate::session::CaptureSession;

pub struct Dispatcher {
    config: CollectorConfig,
    registry: Arc<EndpointRegistry>,
}

impl Dispatcher {
    pub fn new(config: CollectorConfig, registry: Arc<EndpointRegistry>) -> Self {
        Dispatcher { config, registry }
    }

    pub async fn run(&self) -> Result<(), CollectorError> {
        let bind = format!("{}:{}", self.config.bind_address, self.config.rpc_port);
        let listener = TcpListener::bind(&bind)
            .await
            .map_err(CollectorError::BindError)?;
        info!("capture service listening on {}", bind);
        self.serve(listener).await
    }

    /// Accept loop over an already bound listener. A failed accept is
    /// terminal for the collector; everything after accept is isolated in
    /// the connection's own task.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), CollectorError> {
        loop {
            let (stream, peer) = listener
                .accept()
                .await
                .map_err(CollectorError::AcceptError)?;
            let registry = self.registry.clone();
            let config = self.config.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer, registry, config).await {
                    warn!("connection from {} ended with error: {}", peer, e);
                }
            });
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<EndpointRegistry>,
    config: CollectorConfig,
) -> std::io::Result<()> {
    let handshake = Duration::from_secs(config.handshake_timeout_secs);
    let first = match timeout(handshake, read_control(&mut stream)).await {
        Ok(result) => result?,
        Err(_) => {
            warn!("handshake timeout from {}", peer);
            return Ok(());
        }
    };

    match first {
        // closed before sending a request
        None => Ok(()),
        Some(ControlMessage::Register { info }) => {
            info!("{} is connecting ...", info.ip_address);
            registry.register(&info);
            write_control(&mut stream, &ControlMessage::Ack).await
        }
        Some(ControlMessage::StartCapture) => run_capture(stream, peer, registry, config).await,
        Some(other) => {
            warn!("unexpected handshake message from {}: {:?}", peer, other);
            write_control(
                &mut stream,
                &ControlMessage::Refuse {
                    reason: "expected register or start_capture".to_string(),
                },
            )
            .await
        }
    }
}

/// Runs one capture stream to completion. The peer's IP must already be a
/// registered endpoint; streaming before registering is a protocol
/// violation and the stream is refused, as is a second stream for an
/// endpoint that is already streaming.
async fn run_capture(
    mut stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<EndpointRegistry>,
    config: CollectorConfig,
) -> std::io::Result<()> {
    let address = peer.ip().to_string();
    let mut session = CaptureSession::new(registry, address.clone());

    if let Err(e) = session.start(&config.output_dir, config.snapshot_length, config.link_type) {
        warn!("refusing capture stream from {}: {}", address, e);
        return write_control(
            &mut stream,
            &ControlMessage::Refuse {
                reason: e.to_string(),
            },
        )
        .await;
    }
    write_control(&mut stream, &ControlMessage::Ack).await?;

    loop {
        match read_frame(&mut stream).await {
            // clean end of stream, normal termination
            Ok(None) => break,
            Ok(Some((FrameKind::Packet, payload))) => {
                if let Err(e) = session.handle_frame_payload(&payload) {
                    error!("[{}] session terminated: {}", session.id(), e);
                    break;
                }
            }
            Ok(Some((FrameKind::Control, _))) => {
                warn!("[{}] ignoring control frame mid-stream", session.id());
            }
            Err(e) => {
                info!("[{}] stream ended from {}: {}", session.id(), address, e);
                break;
            }
        }
    }

    session.close();
    // terminal acknowledgement; the agent may already be gone
    let _ = write_control(&mut stream, &ControlMessage::Ack).await;
    Ok(())
}

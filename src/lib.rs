//! Remote traffic capture: agents stream live frames to a central
//! collector, which reconstructs one pcap trace file per agent session.

pub mod agent;
pub mod codec;
pub mod collector;
pub mod configuration;
pub mod error_handling;
pub mod filter;
pub mod registry;
pub mod session;

pub use codec::{CaptureInfo, PacketRecord};
pub use registry::{Endpoint, EndpointInfo, EndpointRegistry};
pub use session::{CaptureSession, SessionState};

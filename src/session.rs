pub mod capture_session;
pub mod pcap;

pub use capture_session::{CaptureSession, SessionState};
pub use pcap::{PcapReader, PcapWriter, LINKTYPE_ETHERNET};

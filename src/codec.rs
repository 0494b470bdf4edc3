pub mod packet;
pub mod wire;

pub use packet::{decode, encode, CaptureInfo, PacketRecord};
pub use wire::{read_control, read_frame, write_control, write_frame, ControlMessage, FrameKind};

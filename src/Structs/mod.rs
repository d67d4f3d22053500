pub mod descriptor;
pub mod packet;
pub mod time;

pub use descriptor::{derive_key, BitMode, BufferDescriptor, StationConfig, DESCRIPTOR_VERSION};
pub use packet::{Packet, PacketHeader, HEADER_SIZE, PACKET_VERSION};
pub use time::SampleClock;

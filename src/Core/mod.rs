pub mod SharedMemory;
pub mod gate;

pub use gate::MonotonicGate;
pub use SharedMemory::{OpenMode, RegionKey, RegionSafe, SharedRegion};

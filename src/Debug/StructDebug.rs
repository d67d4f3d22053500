use std::fmt;
use std::sync::atomic::Ordering;

use crate::Buffer::layout::RegionHeader;
use crate::Buffer::SampleBuffer;
use crate::Core::SharedRegion;

/// Debug function for SharedRegion
///
/// Shows the key, mapping address and size without touching the mapped bytes.
pub fn debug_shared_region(region: &SharedRegion, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SharedRegion")
        .field("key", &format_args!("{}", region.key()))
        .field("addr", &format_args!("0x{:x}", region.base_addr()))
        .field("size", &region.size())
        .field("mode", &region.mode())
        .field("owner", &region.is_owner())
        .finish()
}

/// Debug function for RegionHeader
///
/// The state word is loaded, everything else is plain data.
pub fn debug_region_header(header: &RegionHeader, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RegionHeader")
        .field("magic", &format_args!("0x{:016x}", header.magic))
        .field("layout_version", &header.layout_version)
        .field("state", &header.state.load(Ordering::Acquire))
        .field("creator_pid", &header.creator_pid)
        .field("station", &header.descriptor.station_name())
        .finish_non_exhaustive()
}

/// Debug function for SampleBuffer
///
/// Shows the shape and each board's head and published progress. Range
/// tables are left out; use `SampleBuffer::snapshot` for those.
pub fn debug_sample_buffer(buffer: &SampleBuffer, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let boards: Vec<_> = (0..buffer.nr_boards())
        .map(|board| {
            (
                buffer.head(board).unwrap_or(0),
                buffer.progress(board).unwrap_or(0),
            )
        })
        .collect();
    f.debug_struct("SampleBuffer")
        .field("region", buffer.region())
        .field("station", &buffer.descriptor().station_name())
        .field("capacity", &buffer.capacity())
        .field("slot_bytes", &buffer.layout().slot_bytes())
        .field("live", &buffer.is_live())
        .field("head_progress", &boards)
        .finish()
}

use std::fmt;

use super::layout::RegionHeader;
use super::Buffer::SampleBuffer;
use crate::Core::SharedRegion;

// Debug proxy implementations that call the standalone debug functions
impl fmt::Debug for SharedRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        crate::Debug::StructDebug::debug_shared_region(self, f)
    }
}

impl fmt::Debug for RegionHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        crate::Debug::StructDebug::debug_region_header(self, f)
    }
}

impl fmt::Debug for SampleBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        crate::Debug::StructDebug::debug_sample_buffer(self, f)
    }
}

#![allow(non_snake_case)]

pub mod Buffer;
pub mod Buffer_impl;
pub mod builder;
mod debug;
pub mod intervals;
pub mod layout;
pub mod reader;

pub use builder::{
    BufferBuilder, DEFAULT_ATTACH_TIMEOUT, DEFAULT_AVAILABILITY_RANGES, DEFAULT_CAPACITY,
};
pub use intervals::IntervalSet;
pub use layout::{BufferLayout, LAYOUT_VERSION, MAGIC_NUMBER};
pub use Buffer::{BoardRing, SampleBuffer, SlotSpan, WriteOutcome};

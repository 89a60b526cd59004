//! I/O adapters: position sources feeding the poll loop

pub mod gpsd;
pub mod replay;
pub mod source;

pub use gpsd::GpsdSource;
pub use replay::ReplaySource;
pub use source::{ChannelSource, PositionSource};

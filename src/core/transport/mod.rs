//! Byte-source abstraction and the serial implementation behind it

pub mod serial;
pub mod traits;

pub use serial::SerialByteSource;
pub use traits::{BoxedByteSource, ByteSource, Chunk};

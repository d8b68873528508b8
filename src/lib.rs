//! Cam-Session: buffer ownership for V4L2 memory-mapped capture
//!
//! This library drives one capture device through capability checks, format
//! negotiation, buffer pool allocation and the queue/dequeue protocol, keeping
//! track of which side owns each shared buffer. The driver sits behind the
//! [`CaptureDevice`] trait, enabling both production use with real hardware
//! and testing with mock devices.

pub mod device;
pub mod error;
pub mod pool;
pub mod region;
mod retry;
pub mod session;
pub mod traits;

#[cfg(test)]
pub mod mock;

pub use device::V4L2Device;
pub use error::{CameraError, ErrorKind, Result};
pub use pool::BufferState;
pub use region::MappedRegion;
pub use session::Session;
pub use traits::{
    BufferDescriptor, Capabilities, CaptureDevice, DequeuedBuffer, Field, FourCC, Format, Frame,
    FrameMetadata, Readiness, StreamingParameters,
};

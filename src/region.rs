//! Memory shared between the driver and this process.
#![allow(unsafe_code)]

use std::ptr::NonNull;
use std::slice;

/// One mapped device buffer.
///
/// A region is only a view. Mapping and unmapping go through
/// [`CaptureDevice`](crate::traits::CaptureDevice); the buffer pool owns every
/// region and unmaps each exactly once.
#[derive(Debug)]
pub struct MappedRegion {
    start: NonNull<u8>,
    len: usize,
}

impl MappedRegion {
    /// Wrap a mapping.
    ///
    /// # Safety
    ///
    /// `start` must be valid for reads of `len` bytes until the region is
    /// passed to `unmap_buffer` of the device that created it.
    pub const unsafe fn from_raw_parts(start: NonNull<u8>, len: usize) -> Self {
        Self { start, len }
    }

    /// Start address of the mapping.
    pub const fn as_ptr(&self) -> *mut u8 {
        self.start.as_ptr()
    }

    /// Length of the mapping in bytes.
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the mapping is empty.
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Borrow the mapped bytes.
    ///
    /// The device may be writing to the buffer while it is queued; callers
    /// only read regions whose buffer is dequeued.
    pub(crate) fn bytes(&self) -> &[u8] {
        // SAFETY: the constructor contract keeps `start..start+len` mapped
        // for as long as the region exists.
        unsafe { slice::from_raw_parts(self.start.as_ptr(), self.len) }
    }
}

//! Capture session state machine.
//!
//! A [`Session`] drives one device through its whole lifecycle:
//!
//! ```text
//! open -> read_capabilities -> negotiate -> allocate -> start
//!      -> { queue_one | queue_all | dequeue_one | dequeue_all
//!           | dequeue_all_queued | shoot_frame }*
//!      -> stop -> release -> close
//! ```
//!
//! Every buffer is either queued (owned by the device) or unqueued (readable
//! by the caller). The session is the only owner of the mapped buffers and
//! lends the most recently dequeued one through [`Session::current_frame`].

mod format;
mod queue;
mod stream;

use log::{debug, warn};

use crate::error::{CameraError, ErrorKind, Result};
use crate::pool::{BufferPool, BufferState};
use crate::retry::retry_interrupted;
use crate::traits::{
    BufferDescriptor, Capabilities, CaptureDevice, DequeuedBuffer, Format, StreamingParameters,
};

/// One capture session over a device handle.
///
/// Not safe to share between threads: buffer states, the queue cursor and the
/// current frame are plain mutable fields.
pub struct Session<D: CaptureDevice> {
    device: Option<D>,
    capabilities: Option<Capabilities>,
    format: Format,
    format_accepted: bool,
    pool: BufferPool,
    initialized: bool,
    streaming: bool,
    next: usize,
    current: Option<DequeuedBuffer>,
    parameters: Option<StreamingParameters>,
}

fn open_device<D>(device: &mut Option<D>) -> Result<&mut D> {
    device
        .as_mut()
        .ok_or_else(|| CameraError::new(ErrorKind::NotOpen))
}

impl<D: CaptureDevice> Default for Session<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: CaptureDevice> Session<D> {
    /// Create an empty session with no device attached.
    #[must_use]
    pub fn new() -> Self {
        Self {
            device: None,
            capabilities: None,
            format: Format::default(),
            format_accepted: false,
            pool: BufferPool::default(),
            initialized: false,
            streaming: false,
            next: 0,
            current: None,
            parameters: None,
        }
    }

    /// Create a session that owns an already opened device.
    #[must_use]
    pub fn with_device(device: D) -> Self {
        let mut session = Self::new();
        session.device = Some(device);
        session
    }

    /// Attach an opened device handle.
    pub fn open(&mut self, device: D) -> Result<()> {
        if self.device.is_some() {
            return Err(ErrorKind::AlreadyOpen.into());
        }
        self.device = Some(device);
        Ok(())
    }

    /// Release the buffer pool if needed and hand the device back.
    ///
    /// If releasing the pool fails the device stays attached so the call can
    /// be retried.
    pub fn close(&mut self) -> Result<D> {
        if self.device.is_none() {
            return Err(ErrorKind::AlreadyClosed.into());
        }
        if self.initialized {
            self.release()?;
        }
        self.capabilities = None;
        self.format_accepted = false;
        self.parameters = None;
        self.device
            .take()
            .ok_or_else(|| CameraError::new(ErrorKind::AlreadyClosed))
    }

    /// Move everything out of `self`, leaving it empty.
    ///
    /// The emptied session owns nothing, so dropping it releases nothing.
    #[must_use]
    pub fn take(&mut self) -> Self {
        Self {
            device: self.device.take(),
            capabilities: self.capabilities.take(),
            format: std::mem::take(&mut self.format),
            format_accepted: std::mem::take(&mut self.format_accepted),
            pool: std::mem::take(&mut self.pool),
            initialized: std::mem::take(&mut self.initialized),
            streaming: std::mem::take(&mut self.streaming),
            next: std::mem::take(&mut self.next),
            current: self.current.take(),
            parameters: self.parameters.take(),
        }
    }

    /// Whether a device handle is attached.
    pub const fn is_open(&self) -> bool {
        self.device.is_some()
    }

    /// Whether the buffer pool is allocated and mapped.
    pub const fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// The attached device.
    pub const fn device(&self) -> Option<&D> {
        self.device.as_ref()
    }

    #[cfg(test)]
    pub(crate) fn device_mut(&mut self) -> Option<&mut D> {
        self.device.as_mut()
    }

    /// Query the device capabilities and keep them for later checks.
    pub fn read_capabilities(&mut self) -> Result<&Capabilities> {
        let device = open_device(&mut self.device)?;
        let capabilities = retry_interrupted(|| device.query_capabilities())
            .map_err(|err| CameraError::io(ErrorKind::CapabilitiesUnavailable, err))?;
        debug!(
            "capabilities of {} ({}): capture={}, streaming={}",
            capabilities.card,
            capabilities.driver,
            capabilities.can_capture,
            capabilities.can_stream
        );
        Ok(self.capabilities.insert(capabilities))
    }

    /// Capabilities from the last [`Session::read_capabilities`].
    pub const fn capabilities(&self) -> Option<&Capabilities> {
        self.capabilities.as_ref()
    }

    /// Whether the last capability snapshot reports video capture.
    pub fn supports_video_capture(&self) -> bool {
        self.capabilities.as_ref().is_some_and(|caps| caps.can_capture)
    }

    /// Whether the last capability snapshot reports shared-memory streaming.
    pub fn supports_streaming(&self) -> bool {
        self.capabilities.as_ref().is_some_and(|caps| caps.can_stream)
    }

    /// Allocate and map the buffer pool. Returns the pool size the device granted.
    ///
    /// Needs capabilities that allow streaming capture and an accepted format.
    /// On failure nothing stays mapped and the device holds no buffers.
    pub fn allocate(&mut self, requested: u32) -> Result<usize> {
        let device = open_device(&mut self.device)?;
        if self.initialized {
            return Err(ErrorKind::AlreadyInitialized.into());
        }
        match &self.capabilities {
            None => return Err(ErrorKind::CapabilitiesUnavailable.into()),
            Some(caps) if !caps.can_capture => return Err(ErrorKind::NoVideoCapture.into()),
            Some(caps) if !caps.can_stream => return Err(ErrorKind::NoStreaming.into()),
            Some(_) => {}
        }
        if !self.format_accepted {
            return Err(ErrorKind::FormatRejected.into());
        }

        self.pool = BufferPool::allocate(device, requested)?;
        self.initialized = true;
        self.next = 0;
        self.current = None;
        debug!("buffer pool ready with {} buffers", self.pool.len());
        Ok(self.pool.len())
    }

    /// Read capabilities, negotiate `proposed` and allocate `requested` buffers.
    pub fn init(&mut self, proposed: &Format, requested: u32) -> Result<usize> {
        self.read_capabilities()?;
        self.negotiate(proposed)?;
        self.allocate(requested)
    }

    /// Stop streaming, unmap every buffer and return them to the device.
    pub fn release(&mut self) -> Result<()> {
        if !self.initialized {
            return Err(ErrorKind::AlreadyFreed.into());
        }
        self.stop()?;
        let device = open_device(&mut self.device)?;
        self.pool.release(device)?;
        self.initialized = false;
        self.next = 0;
        self.current = None;
        Ok(())
    }

    /// Number of buffers in the pool, zero when not allocated.
    pub fn pool_size(&self) -> usize {
        self.pool.len()
    }

    /// Ownership state of buffer `index`.
    pub fn buffer_state(&self, index: usize) -> Option<BufferState> {
        self.pool.slot(index).map(|slot| slot.state)
    }

    /// Location of buffer `index` as reported by the device.
    pub fn descriptor(&self, index: usize) -> Option<BufferDescriptor> {
        self.pool.slot(index).map(|slot| slot.descriptor)
    }

    /// Number of buffers currently owned by the device.
    pub fn queued_count(&self) -> usize {
        self.pool.queued_count()
    }

    /// Number of buffers currently mapped into this process.
    pub fn mapped_count(&self) -> usize {
        self.pool.mapped_count()
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.device.is_none() {
            return Err(ErrorKind::NotOpen.into());
        }
        if !self.initialized {
            return Err(ErrorKind::NotInitialized.into());
        }
        Ok(())
    }
}

impl<D: CaptureDevice> Drop for Session<D> {
    fn drop(&mut self) {
        if self.device.is_some() {
            if let Err(err) = self.close() {
                warn!("closing session on drop failed: {err}");
            }
        }
    }
}

//! Buffer pool allocation and release.
//!
//! A pool is the fixed set of device buffers mapped into this process for one
//! capture session. Allocation is all-or-nothing: a pool is either fully
//! mapped or not reachable at all.

use log::{debug, trace, warn};

use crate::error::{CameraError, ErrorKind, Result};
use crate::region::MappedRegion;
use crate::retry::retry_interrupted;
use crate::traits::{BufferDescriptor, CaptureDevice};

/// Ownership state of one buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BufferState {
    /// The caller may read or reuse the buffer.
    #[default]
    Unqueued,
    /// The device owns the buffer and may be writing to it.
    Queued,
}

/// Everything the pool knows about one buffer index.
#[derive(Debug)]
pub(crate) struct BufferSlot {
    pub(crate) descriptor: BufferDescriptor,
    /// `None` once unmapped by a release that failed part way.
    pub(crate) region: Option<MappedRegion>,
    pub(crate) state: BufferState,
}

/// The mapped buffers of a session.
#[derive(Debug, Default)]
pub(crate) struct BufferPool {
    slots: Vec<BufferSlot>,
}

impl BufferPool {
    /// Request, query and map `requested` buffers (at least one).
    pub(crate) fn allocate<D: CaptureDevice>(device: &mut D, requested: u32) -> Result<Self> {
        let requested = requested.max(1);
        let granted = retry_interrupted(|| device.request_buffers(requested))
            .map_err(request_buffers_error)?;
        if granted == 0 {
            return Err(ErrorKind::DeviceOutOfMemory.into());
        }
        debug!("requested {requested} buffers, device granted {granted}");

        let mut guard = PoolGuard::new(device);
        guard
            .slots
            .try_reserve_exact(granted as usize)
            .map_err(|_| CameraError::new(ErrorKind::UserOutOfMemory))?;

        for index in 0..granted {
            let descriptor = retry_interrupted(|| guard.device.query_buffer(index))
                .map_err(|err| CameraError::io(ErrorKind::BufferQueryFailed, err))?;
            let region = guard
                .device
                .map_buffer(&descriptor)
                .map_err(|err| CameraError::io(ErrorKind::MapFailed, err))?;
            trace!(
                "mapped buffer {index}: {} bytes at offset {:#x}",
                descriptor.length,
                descriptor.offset
            );
            guard.slots.push(BufferSlot {
                descriptor,
                region: Some(region),
                state: BufferState::Unqueued,
            });
        }

        Ok(Self {
            slots: guard.finish(),
        })
    }

    /// Unmap every region and give the buffers back to the device.
    ///
    /// Stops at the first unmap failure. Regions unmapped before it stay
    /// unmapped, so calling again continues where this call stopped.
    pub(crate) fn release<D: CaptureDevice>(&mut self, device: &mut D) -> Result<()> {
        for slot in &mut self.slots {
            if let Some(region) = slot.region.take() {
                if let Err(err) = device.unmap_buffer(&region) {
                    slot.region = Some(region);
                    return Err(CameraError::io(ErrorKind::UnmapFailed, err));
                }
            }
        }

        let remaining =
            retry_interrupted(|| device.request_buffers(0)).map_err(request_buffers_error)?;
        if remaining != 0 {
            return Err(ErrorKind::BuffersNotReleased.into());
        }
        debug!("released {} buffers", self.slots.len());
        self.slots.clear();
        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub(crate) fn slot(&self, index: usize) -> Option<&BufferSlot> {
        self.slots.get(index)
    }

    pub(crate) fn set_state(&mut self, index: usize, state: BufferState) {
        if let Some(slot) = self.slots.get_mut(index) {
            slot.state = state;
        }
    }

    pub(crate) fn states(&self) -> impl Iterator<Item = BufferState> + '_ {
        self.slots.iter().map(|slot| slot.state)
    }

    pub(crate) fn queued_count(&self) -> usize {
        self.states()
            .filter(|state| *state == BufferState::Queued)
            .count()
    }

    /// Mark every buffer as returned by the device.
    pub(crate) fn reset_states(&mut self) {
        for slot in &mut self.slots {
            slot.state = BufferState::Unqueued;
        }
    }

    pub(crate) fn mapped_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.region.is_some()).count()
    }
}

fn request_buffers_error(err: std::io::Error) -> CameraError {
    if err.raw_os_error() == Some(libc::EINVAL) {
        CameraError::io(ErrorKind::MmapUnsupported, err)
    } else {
        CameraError::io(ErrorKind::RequestBuffersFailed, err)
    }
}

/// Scope guard over a pool under construction.
///
/// Dropped without [`PoolGuard::finish`], it unmaps every region acquired so
/// far and releases the device-side buffers.
struct PoolGuard<'d, D: CaptureDevice> {
    device: &'d mut D,
    slots: Vec<BufferSlot>,
    armed: bool,
}

impl<'d, D: CaptureDevice> PoolGuard<'d, D> {
    fn new(device: &'d mut D) -> Self {
        Self {
            device,
            slots: Vec::new(),
            armed: true,
        }
    }

    fn finish(mut self) -> Vec<BufferSlot> {
        self.armed = false;
        std::mem::take(&mut self.slots)
    }
}

impl<D: CaptureDevice> Drop for PoolGuard<'_, D> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        debug!("rolling back {} mapped buffers", self.slots.len());
        for slot in self.slots.drain(..).rev() {
            if let Some(region) = slot.region {
                if let Err(err) = self.device.unmap_buffer(&region) {
                    warn!("rollback: unmap of buffer {} failed: {err}", slot.descriptor.index);
                }
            }
        }
        if let Err(err) = retry_interrupted(|| self.device.request_buffers(0)) {
            warn!("rollback: releasing device buffers failed: {err}");
        }
    }
}

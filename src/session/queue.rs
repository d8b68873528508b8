use log::{trace, warn};

use super::{open_device, Session};
use crate::error::{CameraError, ErrorKind, Result};
use crate::pool::BufferState;
use crate::retry::retry_interrupted;
use crate::traits::{CaptureDevice, Frame};

impl<D: CaptureDevice> Session<D> {
    /// Hand the buffer under the cursor to the device and advance the cursor.
    ///
    /// On failure neither the buffer state nor the cursor change.
    pub fn queue_one(&mut self) -> Result<usize> {
        self.ensure_initialized()?;
        let index = self.next;
        let descriptor = self
            .pool
            .slot(index)
            .map(|slot| slot.descriptor)
            .ok_or_else(|| CameraError::new(ErrorKind::QueueFailed))?;
        let device = open_device(&mut self.device)?;
        retry_interrupted(|| device.queue_buffer(descriptor.index))
            .map_err(|err| CameraError::io(ErrorKind::QueueFailed, err))?;

        self.pool.set_state(index, BufferState::Queued);
        if self.current.is_some_and(|current| current.index as usize == index) {
            self.current = None;
        }
        self.next = (index + 1) % self.pool.len();
        trace!("queued buffer {index}");
        Ok(index)
    }

    /// Block until the device fills a buffer, then take it back.
    ///
    /// The returned index becomes the current frame.
    pub fn dequeue_one(&mut self) -> Result<usize> {
        self.ensure_initialized()?;
        let device = open_device(&mut self.device)?;
        let readiness = retry_interrupted(|| device.wait_readable())
            .map_err(|err| CameraError::io(ErrorKind::PollFailed, err))?;
        if readiness.error {
            warn!("device reported an error condition while waiting for a frame");
        }
        let dequeued = retry_interrupted(|| device.dequeue_buffer())
            .map_err(|err| CameraError::io(ErrorKind::DequeueFailed, err))?;

        let index = dequeued.index as usize;
        if index >= self.pool.len() {
            warn!(
                "device returned buffer {index} outside a pool of {}",
                self.pool.len()
            );
            return Err(ErrorKind::DequeueFailed.into());
        }
        self.pool.set_state(index, BufferState::Unqueued);
        self.current = Some(dequeued);
        trace!(
            "dequeued buffer {index}, sequence {}, {} bytes",
            dequeued.metadata.sequence,
            dequeued.metadata.bytes_used
        );
        Ok(index)
    }

    /// Queue every buffer in index order. The cursor ends back at zero.
    pub fn queue_all(&mut self) -> Result<()> {
        self.ensure_initialized()?;
        self.next = 0;
        for _ in 0..self.pool.len() {
            self.queue_one()?;
        }
        Ok(())
    }

    /// Dequeue once per buffer in the pool.
    ///
    /// Every buffer must be queued. Otherwise the last waits never return on
    /// a real device; use [`Session::dequeue_all_queued`] when unsure.
    pub fn dequeue_all(&mut self) -> Result<()> {
        self.ensure_initialized()?;
        for _ in 0..self.pool.len() {
            self.dequeue_one()?;
        }
        Ok(())
    }

    /// Dequeue exactly as many buffers as are currently queued.
    ///
    /// Returns the number dequeued, zero without waiting when none are queued.
    pub fn dequeue_all_queued(&mut self) -> Result<usize> {
        self.ensure_initialized()?;
        let queued = self.pool.queued_count();
        for _ in 0..queued {
            self.dequeue_one()?;
        }
        Ok(queued)
    }

    /// Drain the queue, then capture one frame into buffer zero.
    ///
    /// Returns the dequeued index, which is also the current frame.
    pub fn shoot_frame(&mut self) -> Result<usize> {
        self.dequeue_all_queued()?;
        self.next = 0;
        self.queue_one()?;
        self.dequeue_one()
    }

    /// The most recently dequeued buffer, while the caller still owns it.
    pub fn current_frame(&self) -> Option<Frame<'_>> {
        let current = self.current?;
        let index = current.index as usize;
        let slot = self.pool.slot(index)?;
        if slot.state != BufferState::Unqueued {
            return None;
        }
        let bytes = slot.region.as_ref()?.bytes();
        let data = match current.metadata.bytes_used as usize {
            0 => bytes,
            used => bytes.get(..used).unwrap_or(bytes),
        };
        Some(Frame {
            index,
            data,
            metadata: current.metadata,
        })
    }
}

//! Simulated driver for testing without hardware.
#![allow(unsafe_code)]

use std::cell::Cell;
use std::collections::VecDeque;
use std::io;
use std::ptr::NonNull;
use std::rc::Rc;
use std::time::Duration;

use crate::region::MappedRegion;
use crate::traits::{
    BufferDescriptor, Capabilities, CaptureDevice, DequeuedBuffer, FourCC, Format, FrameMetadata,
    Readiness, StreamingParameters,
};

const PAGE_SIZE: u32 = 4096;

fn errno(code: i32) -> io::Error {
    io::Error::from_raw_os_error(code)
}

/// How the simulated driver answers a format commit.
#[derive(Debug, Clone, Copy)]
pub enum FormatPolicy {
    /// Accept any proposal and fill in stride and size.
    Echo,
    /// Replace every proposal with this format.
    Substitute(Format),
}

/// Device-side state shared with the test, readable after the mock is dropped.
#[derive(Debug, Clone, Default)]
pub struct MockCounters {
    outstanding_maps: Rc<Cell<usize>>,
    buffers: Rc<Cell<usize>>,
    streaming: Rc<Cell<bool>>,
}

impl MockCounters {
    /// Mappings not yet undone.
    pub fn outstanding_maps(&self) -> usize {
        self.outstanding_maps.get()
    }

    /// Buffers allocated on the device side.
    pub fn buffer_count(&self) -> usize {
        self.buffers.get()
    }

    /// Whether the stream is on.
    pub fn is_streaming(&self) -> bool {
        self.streaming.get()
    }
}

/// Simulated V4L2 capture driver.
///
/// Buffers live in host memory owned by the mock, so regions stay valid until
/// the mock is dropped. Every map and unmap is counted.
pub struct MockDevice {
    capabilities: Capabilities,
    format: Format,
    policy: FormatPolicy,
    params: StreamingParameters,
    rate_limit: Option<u32>,
    granted: Option<u32>,
    request_error: Option<i32>,
    keep_buffers: bool,
    buffers: Vec<Box<[u8]>>,
    queued: VecDeque<u32>,
    sequence: u32,
    map_failure_at: Option<u32>,
    query_failure_at: Option<u32>,
    unmap_failure_of: Option<u32>,
    queue_error: Option<i32>,
    stream_on_error: Option<i32>,
    stream_off_error: Option<i32>,
    poll_error: Option<i32>,
    misreported_index: Option<u32>,
    interruptions: u32,
    counters: MockCounters,
    total_maps: usize,
    unmapped: Vec<u32>,
    requested: Vec<u32>,
    stalled_waits: usize,
    ready_with_error: bool,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    /// Create a device that captures 64x48 YUYV and echoes every format.
    #[must_use]
    pub fn new() -> Self {
        Self {
            capabilities: Capabilities {
                driver: "mock".to_owned(),
                card: "Mock Camera".to_owned(),
                bus_info: "mock:0".to_owned(),
                can_capture: true,
                can_stream: true,
            },
            format: derive_layout(Format::new(64, 48, FourCC::YUYV)),
            policy: FormatPolicy::Echo,
            params: StreamingParameters {
                numerator: 1,
                denominator: 30,
                custom_rate: true,
            },
            rate_limit: None,
            granted: None,
            request_error: None,
            keep_buffers: false,
            buffers: Vec::new(),
            queued: VecDeque::new(),
            sequence: 0,
            map_failure_at: None,
            query_failure_at: None,
            unmap_failure_of: None,
            queue_error: None,
            stream_on_error: None,
            stream_off_error: None,
            poll_error: None,
            misreported_index: None,
            interruptions: 0,
            counters: MockCounters::default(),
            total_maps: 0,
            unmapped: Vec::new(),
            requested: Vec::new(),
            stalled_waits: 0,
            ready_with_error: false,
        }
    }

    /// Set the capabilities for this mock device.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Set the format the device starts with.
    #[must_use]
    pub fn with_format(mut self, format: Format) -> Self {
        self.format = derive_layout(format);
        self
    }

    /// Set how format commits are answered.
    #[must_use]
    pub fn with_policy(mut self, policy: FormatPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Grant this many buffers regardless of the request.
    #[must_use]
    pub fn with_granted_buffers(mut self, granted: u32) -> Self {
        self.granted = Some(granted);
        self
    }

    /// Fail buffer requests with this errno.
    #[must_use]
    pub fn with_request_error(mut self, code: i32) -> Self {
        self.request_error = Some(code);
        self
    }

    /// Fail the mapping of buffer `index`.
    #[must_use]
    pub fn with_map_failure_at(mut self, index: u32) -> Self {
        self.map_failure_at = Some(index);
        self
    }

    /// Fail the query of buffer `index`.
    #[must_use]
    pub fn with_query_failure_at(mut self, index: u32) -> Self {
        self.query_failure_at = Some(index);
        self
    }

    /// Interrupt the next `count` interruptible calls with EINTR.
    #[must_use]
    pub fn with_interruptions(mut self, count: u32) -> Self {
        self.interruptions = count;
        self
    }

    /// Report a fixed frame interval the device cannot change.
    #[must_use]
    pub fn with_fixed_rate(mut self, numerator: u32, denominator: u32) -> Self {
        self.params = StreamingParameters {
            numerator,
            denominator,
            custom_rate: false,
        };
        self
    }

    /// Clamp requested rates to at most `fps` frames per second.
    #[must_use]
    pub fn with_rate_limit(mut self, fps: u32) -> Self {
        self.rate_limit = Some(fps);
        self
    }

    /// Fail stream-on with this errno.
    #[must_use]
    pub fn with_stream_on_error(mut self, code: i32) -> Self {
        self.stream_on_error = Some(code);
        self
    }

    /// Fail every readiness wait with this errno.
    #[must_use]
    pub fn with_poll_error(mut self, code: i32) -> Self {
        self.poll_error = Some(code);
        self
    }

    /// Flag an error condition on every readiness wait.
    #[must_use]
    pub fn with_ready_error(mut self) -> Self {
        self.ready_with_error = true;
        self
    }

    /// Fail the next unmap of buffer `index` once.
    pub fn fail_next_unmap_of(&mut self, index: u32) {
        self.unmap_failure_of = Some(index);
    }

    /// Fail queue requests with this errno until cleared.
    pub fn fail_queue_with(&mut self, code: Option<i32>) {
        self.queue_error = code;
    }

    /// Fail stream-off with this errno until cleared.
    pub fn fail_stream_off_with(&mut self, code: Option<i32>) {
        self.stream_off_error = code;
    }

    /// Report `index` instead of the buffer actually taken on the next dequeue.
    pub fn misreport_next_dequeue(&mut self, index: u32) {
        self.misreported_index = Some(index);
    }

    /// Interrupt the next `count` interruptible calls with EINTR.
    pub fn interrupt_next(&mut self, count: u32) {
        self.interruptions = count;
    }

    /// Keep buffers allocated when asked to release them.
    pub fn keep_buffers_on_release(&mut self) {
        self.keep_buffers = true;
    }

    /// Handle on the device-side state that survives dropping the mock.
    pub fn counters(&self) -> MockCounters {
        self.counters.clone()
    }

    /// Mappings not yet undone.
    pub fn outstanding_maps(&self) -> usize {
        self.counters.outstanding_maps()
    }

    /// Successful mappings so far.
    pub const fn total_maps(&self) -> usize {
        self.total_maps
    }

    /// Buffer indices in the order they were unmapped.
    pub fn unmapped_indices(&self) -> Vec<u32> {
        self.unmapped.clone()
    }

    /// Every count passed to `request_buffers`.
    pub fn requested_counts(&self) -> &[u32] {
        &self.requested
    }

    /// Buffers currently allocated on the device side.
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Buffers currently owned by the device, oldest first.
    pub fn queued_indices(&self) -> Vec<u32> {
        self.queued.iter().copied().collect()
    }

    /// Waits that found nothing to dequeue. A real driver would block forever.
    pub const fn stalled_waits(&self) -> usize {
        self.stalled_waits
    }

    /// Whether the stream is on.
    pub fn is_streaming(&self) -> bool {
        self.counters.is_streaming()
    }

    fn set_buffers(&mut self, buffers: Vec<Box<[u8]>>) {
        self.counters.buffers.set(buffers.len());
        self.buffers = buffers;
    }

    fn interrupted(&mut self) -> bool {
        if self.interruptions > 0 {
            self.interruptions -= 1;
            true
        } else {
            false
        }
    }

    fn commit(&self, format: &Format) -> Format {
        match self.policy {
            FormatPolicy::Echo => derive_layout(*format),
            FormatPolicy::Substitute(substitute) if format.satisfies(&substitute) => {
                derive_layout(*format)
            }
            FormatPolicy::Substitute(substitute) => derive_layout(substitute),
        }
    }
}

/// Fill in stride and size the way a packed 16-bit driver would.
fn derive_layout(mut format: Format) -> Format {
    if format.stride == 0 {
        format.stride = format.width * 2;
    }
    if format.size == 0 {
        format.size = format.stride * format.height;
    }
    format
}

impl CaptureDevice for MockDevice {
    fn query_capabilities(&mut self) -> io::Result<Capabilities> {
        if self.interrupted() {
            return Err(errno(libc::EINTR));
        }
        Ok(self.capabilities.clone())
    }

    fn format(&mut self) -> io::Result<Format> {
        Ok(self.format)
    }

    fn try_format(&mut self, format: &Format) -> io::Result<Format> {
        Ok(self.commit(format))
    }

    fn set_format(&mut self, format: &Format) -> io::Result<Format> {
        if !self.buffers.is_empty() {
            return Err(errno(libc::EBUSY));
        }
        self.format = self.commit(format);
        Ok(self.format)
    }

    fn request_buffers(&mut self, count: u32) -> io::Result<u32> {
        if self.interrupted() {
            return Err(errno(libc::EINTR));
        }
        self.requested.push(count);
        if let Some(code) = self.request_error {
            return Err(errno(code));
        }
        if self.outstanding_maps() > 0 {
            return Err(errno(libc::EBUSY));
        }
        if count == 0 {
            if self.keep_buffers {
                return u32::try_from(self.buffers.len()).map_err(|_| errno(libc::EOVERFLOW));
            }
            self.set_buffers(Vec::new());
            self.queued.clear();
            self.counters.streaming.set(false);
            return Ok(0);
        }
        let granted = self.granted.unwrap_or(count);
        let length = self.format.size.max(1).div_ceil(PAGE_SIZE) * PAGE_SIZE;
        self.set_buffers(
            (0..granted)
                .map(|_| vec![0u8; length as usize].into_boxed_slice())
                .collect(),
        );
        Ok(granted)
    }

    fn query_buffer(&mut self, index: u32) -> io::Result<BufferDescriptor> {
        if self.query_failure_at == Some(index) {
            return Err(errno(libc::EINVAL));
        }
        let buffer = self
            .buffers
            .get(index as usize)
            .ok_or_else(|| errno(libc::EINVAL))?;
        let length = u32::try_from(buffer.len()).map_err(|_| errno(libc::EOVERFLOW))?;
        Ok(BufferDescriptor {
            index,
            length,
            offset: index * length,
        })
    }

    fn map_buffer(&mut self, descriptor: &BufferDescriptor) -> io::Result<MappedRegion> {
        if self.map_failure_at == Some(descriptor.index) {
            return Err(errno(libc::ENOMEM));
        }
        let buffer = self
            .buffers
            .get_mut(descriptor.index as usize)
            .ok_or_else(|| errno(libc::EINVAL))?;
        let start = NonNull::new(buffer.as_mut_ptr()).ok_or_else(|| errno(libc::EFAULT))?;
        let maps = &self.counters.outstanding_maps;
        maps.set(maps.get() + 1);
        self.total_maps += 1;
        // SAFETY: the boxed buffer is neither moved nor freed while mapped;
        // request_buffers(0) refuses to free with mappings outstanding.
        Ok(unsafe { MappedRegion::from_raw_parts(start, buffer.len()) })
    }

    fn unmap_buffer(&mut self, region: &MappedRegion) -> io::Result<()> {
        let index = self
            .buffers
            .iter()
            .position(|buffer| buffer.as_ptr() == region.as_ptr().cast_const())
            .and_then(|index| u32::try_from(index).ok())
            .ok_or_else(|| errno(libc::EINVAL))?;
        if self.unmap_failure_of == Some(index) {
            self.unmap_failure_of = None;
            return Err(errno(libc::EINVAL));
        }
        let maps = &self.counters.outstanding_maps;
        maps.set(maps.get().saturating_sub(1));
        self.unmapped.push(index);
        Ok(())
    }

    fn queue_buffer(&mut self, index: u32) -> io::Result<()> {
        if self.interrupted() {
            return Err(errno(libc::EINTR));
        }
        if let Some(code) = self.queue_error {
            return Err(errno(code));
        }
        if index as usize >= self.buffers.len() || self.queued.contains(&index) {
            return Err(errno(libc::EINVAL));
        }
        self.queued.push_back(index);
        Ok(())
    }

    fn dequeue_buffer(&mut self) -> io::Result<DequeuedBuffer> {
        if self.interrupted() {
            return Err(errno(libc::EINTR));
        }
        if !self.is_streaming() {
            return Err(errno(libc::EINVAL));
        }
        let index = self.queued.pop_front().ok_or_else(|| errno(libc::EAGAIN))?;
        let sequence = self.sequence;
        self.sequence += 1;

        let buffer = self
            .buffers
            .get_mut(index as usize)
            .ok_or_else(|| errno(libc::EINVAL))?;
        #[allow(clippy::cast_possible_truncation)]
        buffer.fill(sequence as u8);

        Ok(DequeuedBuffer {
            index: self.misreported_index.take().unwrap_or(index),
            metadata: FrameMetadata {
                sequence,
                timestamp: Duration::from_millis(u64::from(sequence) * 33), // ~30fps
                bytes_used: self.format.size,
            },
        })
    }

    fn stream_on(&mut self) -> io::Result<()> {
        if let Some(code) = self.stream_on_error {
            return Err(errno(code));
        }
        if self.buffers.is_empty() {
            return Err(errno(libc::EINVAL));
        }
        self.counters.streaming.set(true);
        Ok(())
    }

    fn stream_off(&mut self) -> io::Result<()> {
        if let Some(code) = self.stream_off_error {
            return Err(errno(code));
        }
        self.counters.streaming.set(false);
        self.queued.clear();
        Ok(())
    }

    fn streaming_parameters(&mut self) -> io::Result<StreamingParameters> {
        Ok(self.params)
    }

    fn set_streaming_parameters(
        &mut self,
        parameters: &StreamingParameters,
    ) -> io::Result<StreamingParameters> {
        if !self.params.custom_rate {
            return Ok(self.params);
        }
        if parameters.numerator == 0 || parameters.denominator == 0 {
            return Err(errno(libc::EINVAL));
        }
        let mut effective = StreamingParameters {
            custom_rate: true,
            ..*parameters
        };
        if let Some(limit) = self.rate_limit {
            if effective.frames_per_second() > limit {
                effective.numerator = 1;
                effective.denominator = limit;
            }
        }
        self.params = effective;
        Ok(effective)
    }

    fn wait_readable(&mut self) -> io::Result<Readiness> {
        if self.interrupted() {
            return Err(errno(libc::EINTR));
        }
        if let Some(code) = self.poll_error {
            return Err(errno(code));
        }
        if self.is_streaming() && !self.queued.is_empty() {
            Ok(Readiness {
                readable: true,
                error: self.ready_with_error,
            })
        } else {
            self.stalled_waits += 1;
            Ok(Readiness {
                readable: false,
                error: true,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_device_creation() {
        let mut device = MockDevice::new();
        let caps = device.query_capabilities().expect("caps should succeed");
        assert_eq!(caps.driver, "mock");
        assert!(caps.can_capture);
        assert!(caps.can_stream);
    }

    #[test]
    fn test_mock_device_format() {
        let mut device = MockDevice::new();
        let format = device.format().expect("format should succeed");
        assert_eq!(format.width, 64);
        assert_eq!(format.height, 48);
        assert_eq!(format.stride, 128);

        let new_format = Format::new(1280, 720, FourCC::YUYV);
        let actual = device
            .set_format(&new_format)
            .expect("set_format should succeed");
        assert_eq!(actual.width, 1280);
        assert_eq!(actual.size, 1280 * 2 * 720);
    }

    #[test]
    fn test_mock_substitutes_format() {
        let substitute = Format::new(64, 48, FourCC::MJPG);
        let mut device = MockDevice::new().with_policy(FormatPolicy::Substitute(substitute));

        let actual = device
            .set_format(&Format::new(64, 48, FourCC::RGB3))
            .expect("set_format should succeed");
        assert_eq!(actual.fourcc, FourCC::MJPG);

        let accepted = device
            .set_format(&actual)
            .expect("set_format should succeed");
        assert_eq!(accepted, actual);
    }

    #[test]
    fn test_mock_frames_carry_sequence() {
        let mut device = MockDevice::new();
        assert_eq!(device.request_buffers(2).expect("request"), 2);
        device.queue_buffer(1).expect("queue");
        device.queue_buffer(0).expect("queue");
        device.stream_on().expect("stream on");

        let first = device.dequeue_buffer().expect("dequeue");
        assert_eq!(first.index, 1);
        assert_eq!(first.metadata.sequence, 0);

        let second = device.dequeue_buffer().expect("dequeue");
        assert_eq!(second.index, 0);
        assert_eq!(second.metadata.sequence, 1);

        let err = device.dequeue_buffer().expect_err("nothing queued");
        assert_eq!(err.raw_os_error(), Some(libc::EAGAIN));
    }

    #[test]
    fn test_mock_rejects_double_queue() {
        let mut device = MockDevice::new();
        device.request_buffers(1).expect("request");
        device.queue_buffer(0).expect("queue");
        let err = device.queue_buffer(0).expect_err("already queued");
        assert_eq!(err.raw_os_error(), Some(libc::EINVAL));
    }

    #[test]
    fn test_mock_counters_outlive_device() {
        let mut device = MockDevice::new();
        let counters = device.counters();
        device.request_buffers(3).expect("request");
        device.stream_on().expect("stream on");
        assert_eq!(counters.buffer_count(), 3);
        assert!(counters.is_streaming());

        drop(device);
        assert_eq!(counters.buffer_count(), 3);
        assert!(counters.is_streaming());
        assert_eq!(counters.outstanding_maps(), 0);
    }

    #[test]
    fn test_mock_misreports_dequeued_index() {
        let mut device = MockDevice::new();
        device.request_buffers(2).expect("request");
        device.queue_buffer(0).expect("queue");
        device.stream_on().expect("stream on");
        device.misreport_next_dequeue(7);

        assert_eq!(device.dequeue_buffer().expect("dequeue").index, 7);
        assert!(device.queued_indices().is_empty());
    }
}

//! Core traits and types for the capture handshake.

use std::fmt;
use std::io;
use std::time::Duration;

use crate::region::MappedRegion;

/// Pixel format representation (e.g., YUYV, MJPG, RGB3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Create a new `FourCC` from a 4-byte array.
    #[must_use]
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    /// YUYV pixel format (4:2:2 packed).
    pub const YUYV: Self = Self::new(b"YUYV");
    /// MJPEG pixel format (Motion JPEG).
    pub const MJPG: Self = Self::new(b"MJPG");
    /// RGB3 pixel format (24-bit RGB).
    pub const RGB3: Self = Self::new(b"RGB3");
    /// NV12 pixel format (4:2:0 semi-planar).
    pub const NV12: Self = Self::new(b"NV12");

    /// Little-endian code as the kernel stores it.
    #[must_use]
    pub const fn to_u32(self) -> u32 {
        u32::from_le_bytes(self.0)
    }
}

impl From<u32> for FourCC {
    fn from(code: u32) -> Self {
        Self(code.to_le_bytes())
    }
}

impl From<v4l::FourCC> for FourCC {
    fn from(fourcc: v4l::FourCC) -> Self {
        Self(fourcc.repr)
    }
}

impl From<FourCC> for v4l::FourCC {
    fn from(fourcc: FourCC) -> Self {
        Self::new(&fourcc.0)
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            let c = if byte.is_ascii_graphic() || byte == b' ' {
                char::from(byte)
            } else {
                '.'
            };
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

/// Field (interlacing) order of a frame, as numbered by `enum v4l2_field`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Field(pub u32);

impl Field {
    /// Driver's choice.
    pub const ANY: Self = Self(0);
    /// Progressive frames.
    pub const NONE: Self = Self(1);
    /// Top field only.
    pub const TOP: Self = Self(2);
    /// Bottom field only.
    pub const BOTTOM: Self = Self(3);
    /// Both fields interleaved line by line.
    pub const INTERLACED: Self = Self(4);
    /// Alternating fields in separate buffers.
    pub const ALTERNATE: Self = Self(7);
}

/// Video format specification.
///
/// `stride` and `size` are derived by the device. A proposal may leave them
/// at zero; a non-zero value is part of the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Format {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format.
    pub fourcc: FourCC,
    /// Field order.
    pub field: Field,
    /// Bytes per line (stride).
    pub stride: u32,
    /// Total frame size in bytes.
    pub size: u32,
}

impl Format {
    /// Create a progressive format proposal, leaving stride and size to the device.
    #[must_use]
    pub const fn new(width: u32, height: u32, fourcc: FourCC) -> Self {
        Self {
            width,
            height,
            fourcc,
            field: Field::NONE,
            stride: 0,
            size: 0,
        }
    }

    /// Replace the field order.
    #[must_use]
    pub const fn with_field(mut self, field: Field) -> Self {
        self.field = field;
        self
    }

    /// Whether `self`, as reported by the device, honours every field of `requested`.
    #[must_use]
    pub const fn satisfies(&self, requested: &Self) -> bool {
        self.width == requested.width
            && self.height == requested.height
            && self.fourcc.to_u32() == requested.fourcc.to_u32()
            && self.field.0 == requested.field.0
            && (requested.stride == 0 || self.stride == requested.stride)
            && (requested.size == 0 || self.size == requested.size)
    }
}

impl Default for Format {
    fn default() -> Self {
        Self::new(0, 0, FourCC([0; 4])).with_field(Field::ANY)
    }
}

/// Device capability flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Driver name.
    pub driver: String,
    /// Card/device name.
    pub card: String,
    /// Bus information.
    pub bus_info: String,
    /// Whether the device can capture video.
    pub can_capture: bool,
    /// Whether the device supports streaming through shared memory.
    pub can_stream: bool,
}

/// Location of one device buffer, as reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDescriptor {
    /// Buffer index in `0..pool_size`.
    pub index: u32,
    /// Length of the buffer in bytes.
    pub length: u32,
    /// Offset to pass to the mapping call.
    pub offset: u32,
}

/// Frame interval negotiation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamingParameters {
    /// Time-per-frame numerator (seconds).
    pub numerator: u32,
    /// Time-per-frame denominator.
    pub denominator: u32,
    /// Whether the device accepts a custom frame interval.
    pub custom_rate: bool,
}

impl StreamingParameters {
    /// Whole frames per second, rounded down. Zero when the numerator is zero.
    #[must_use]
    pub const fn frames_per_second(&self) -> u32 {
        match self.numerator {
            0 => 0,
            n => self.denominator / n,
        }
    }
}

/// Outcome of a readiness wait.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    /// At least one buffer can be dequeued.
    pub readable: bool,
    /// The device flagged an error condition.
    pub error: bool,
}

/// Metadata for a captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMetadata {
    /// Frame sequence number.
    pub sequence: u32,
    /// Capture timestamp.
    pub timestamp: Duration,
    /// Actual bytes used in the frame buffer.
    pub bytes_used: u32,
}

/// A buffer handed back by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DequeuedBuffer {
    /// Index of the completed buffer.
    pub index: u32,
    /// Frame metadata.
    pub metadata: FrameMetadata,
}

/// A captured frame borrowed from the buffer pool.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    /// Index of the buffer holding the frame.
    pub index: usize,
    /// Frame bytes, `bytes_used` long when the device reported it.
    pub data: &'a [u8],
    /// Frame metadata.
    pub metadata: FrameMetadata,
}

/// Request/response handshake with a capture driver.
///
/// One method per driver request. Errors keep their OS detail so callers can
/// tell an interrupted call (`ErrorKind::Interrupted`) from a rejection.
pub trait CaptureDevice {
    /// Query device capabilities.
    fn query_capabilities(&mut self) -> io::Result<Capabilities>;

    /// Read the current format.
    fn format(&mut self) -> io::Result<Format>;

    /// Ask whether `format` would be accepted. Returns the device's adjusted copy.
    fn try_format(&mut self, format: &Format) -> io::Result<Format>;

    /// Commit `format`. Returns the format actually in effect.
    fn set_format(&mut self, format: &Format) -> io::Result<Format>;

    /// Request `count` shared buffers. Returns how many the device granted.
    fn request_buffers(&mut self, count: u32) -> io::Result<u32>;

    /// Query the location of buffer `index`.
    fn query_buffer(&mut self, index: u32) -> io::Result<BufferDescriptor>;

    /// Map a buffer read/write and shared into this process.
    fn map_buffer(&mut self, descriptor: &BufferDescriptor) -> io::Result<MappedRegion>;

    /// Undo one successful [`CaptureDevice::map_buffer`].
    fn unmap_buffer(&mut self, region: &MappedRegion) -> io::Result<()>;

    /// Hand buffer `index` to the device.
    fn queue_buffer(&mut self, index: u32) -> io::Result<()>;

    /// Take back one completed buffer.
    fn dequeue_buffer(&mut self) -> io::Result<DequeuedBuffer>;

    /// Start streaming.
    fn stream_on(&mut self) -> io::Result<()>;

    /// Stop streaming. The device drops every queued buffer.
    fn stream_off(&mut self) -> io::Result<()>;

    /// Read the streaming parameters.
    fn streaming_parameters(&mut self) -> io::Result<StreamingParameters>;

    /// Write the streaming parameters. Returns the values in effect.
    fn set_streaming_parameters(
        &mut self,
        parameters: &StreamingParameters,
    ) -> io::Result<StreamingParameters>;

    /// Block until a buffer is ready to dequeue. No timeout.
    fn wait_readable(&mut self) -> io::Result<Readiness>;
}

//! Error kinds for capture sessions.
//!
//! Every failure is reported as a [`CameraError`] carrying one [`ErrorKind`]
//! and, when a system call was involved, the underlying [`io::Error`].

use std::fmt;
use std::io;

use thiserror::Error;

/// Closed set of failure kinds.
///
/// Each kind has a fixed numeric code (see [`ErrorKind::code`]) that never
/// changes between releases. New kinds take new codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorKind {
    /// The device node could not be stat'ed.
    StatusUnavailable = 1,
    /// The device node is not a character device.
    NotCharDevice = 2,
    /// The device node could not be opened.
    OpenFailed = 3,
    /// The device handle could not be closed cleanly. Kept for code
    /// stability; `V4L2Device` closes on drop and has no failure to report.
    CloseFailed = 4,
    /// An operation needed an open handle but the session has none.
    NotOpen = 5,
    /// A handle was attached to a session that already holds one.
    AlreadyOpen = 6,
    /// `close` was called on a session that is already closed.
    AlreadyClosed = 7,

    /// `VIDIOC_QUERYCAP` failed.
    CapabilitiesUnavailable = 10,
    /// The device cannot capture video.
    NoVideoCapture = 11,
    /// The device cannot stream through shared memory.
    NoStreaming = 12,
    /// The device format could not be read or tried.
    FormatUnavailable = 20,
    /// The device refused to commit a format.
    FormatSetFailed = 21,
    /// The device committed a format different from the one requested.
    FormatRejected = 22,

    /// The buffer pool is already allocated.
    AlreadyInitialized = 30,
    /// The operation needs an allocated buffer pool.
    NotInitialized = 31,
    /// The buffer pool was never allocated or is already released.
    AlreadyFreed = 32,
    /// The device does not support memory-mapped streaming.
    MmapUnsupported = 33,
    /// `VIDIOC_REQBUFS` failed for another reason.
    RequestBuffersFailed = 34,
    /// The device granted zero buffers.
    DeviceOutOfMemory = 35,
    /// Host memory for buffer bookkeeping could not be reserved.
    UserOutOfMemory = 36,
    /// `VIDIOC_QUERYBUF` failed.
    BufferQueryFailed = 37,
    /// A buffer could not be mapped.
    MapFailed = 38,
    /// A buffer could not be unmapped.
    UnmapFailed = 39,
    /// The device kept buffers after being asked to release all of them.
    BuffersNotReleased = 40,

    /// `VIDIOC_G_PARM` failed.
    ParametersUnavailable = 50,
    /// `VIDIOC_S_PARM` failed.
    ParametersRejected = 51,
    /// The device has no configurable frame interval.
    CustomRateUnsupported = 52,
    /// `VIDIOC_STREAMON` failed.
    StartFailed = 53,
    /// `VIDIOC_STREAMOFF` failed.
    StopFailed = 54,

    /// `VIDIOC_QBUF` failed.
    QueueFailed = 60,
    /// `VIDIOC_DQBUF` failed or reported an unknown buffer.
    DequeueFailed = 61,
    /// Waiting for a ready buffer failed.
    PollFailed = 62,
}

impl ErrorKind {
    /// Stable numeric code of this kind.
    pub const fn code(self) -> i32 {
        self as i32
    }

    const fn message(self) -> &'static str {
        match self {
            Self::StatusUnavailable => "device status information unavailable",
            Self::NotCharDevice => "device node is not a character device",
            Self::OpenFailed => "failed to open device",
            Self::CloseFailed => "failed to close device",
            Self::NotOpen => "device is not open",
            Self::AlreadyOpen => "device is already open",
            Self::AlreadyClosed => "device is already closed",
            Self::CapabilitiesUnavailable => "device capabilities unavailable",
            Self::NoVideoCapture => "device does not support video capture",
            Self::NoStreaming => "device does not support streaming",
            Self::FormatUnavailable => "device format unavailable",
            Self::FormatSetFailed => "failed to set device format",
            Self::FormatRejected => "device substituted a different format",
            Self::AlreadyInitialized => "buffer pool already allocated",
            Self::NotInitialized => "buffer pool not allocated",
            Self::AlreadyFreed => "buffer pool already released",
            Self::MmapUnsupported => "device does not support memory mapping",
            Self::RequestBuffersFailed => "buffer request failed",
            Self::DeviceOutOfMemory => "device granted no buffers",
            Self::UserOutOfMemory => "out of memory for buffer bookkeeping",
            Self::BufferQueryFailed => "buffer query failed",
            Self::MapFailed => "failed to map buffer",
            Self::UnmapFailed => "failed to unmap buffer",
            Self::BuffersNotReleased => "device did not release its buffers",
            Self::ParametersUnavailable => "streaming parameters unavailable",
            Self::ParametersRejected => "streaming parameters rejected",
            Self::CustomRateUnsupported => "device does not support a custom frame interval",
            Self::StartFailed => "failed to start streaming",
            Self::StopFailed => "failed to stop streaming",
            Self::QueueFailed => "failed to queue buffer",
            Self::DequeueFailed => "failed to dequeue buffer",
            Self::PollFailed => "failed to wait for a ready buffer",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Error type for capture session operations.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct CameraError {
    kind: ErrorKind,
    #[source]
    source: Option<io::Error>,
}

impl CameraError {
    /// Create an error of the given kind without an OS cause.
    pub const fn new(kind: ErrorKind) -> Self {
        Self { kind, source: None }
    }

    /// Create an error of the given kind caused by a failed system call.
    pub const fn io(kind: ErrorKind, source: io::Error) -> Self {
        Self {
            kind,
            source: Some(source),
        }
    }

    /// Kind of this error.
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Underlying OS error, if any.
    pub const fn os_error(&self) -> Option<&io::Error> {
        self.source.as_ref()
    }
}

impl From<ErrorKind> for CameraError {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

/// Result type for camera operations.
pub type Result<T> = std::result::Result<T, CameraError>;

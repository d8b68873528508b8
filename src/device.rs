//! V4L2 device implementation using the v4l crate.
//!
//! Capabilities, formats and frame intervals go through v4l's `Capture` API.
//! Buffer exchange has no safe counterpart there outside `v4l::io::mmap::Stream`,
//! which owns its buffers, so those requests are issued directly on the handle.
#![allow(unsafe_code)]

use std::ffi::c_void;
use std::fs;
use std::io;
use std::mem;
use std::os::raw::c_int;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::ptr::{self, NonNull};
use std::time::Duration;

use log::debug;
use v4l::buffer::Type;
use v4l::capability::Flags;
use v4l::format::FieldOrder;
use v4l::memory::Memory;
use v4l::parameters::Capabilities as ParameterFlags;
use v4l::v4l2;
use v4l::v4l2::vidioc;
use v4l::v4l_sys::{v4l2_buffer, v4l2_format, v4l2_pix_format, v4l2_requestbuffers};
use v4l::video::Capture;
use v4l::{Device, Fraction};

use crate::error::{CameraError, ErrorKind, Result};
use crate::region::MappedRegion;
use crate::traits::{
    BufferDescriptor, Capabilities, CaptureDevice, DequeuedBuffer, Field, FourCC, Format,
    FrameMetadata, Readiness, StreamingParameters,
};

const CAPTURE: u32 = Type::VideoCapture as u32;
const MMAP: u32 = Memory::Mmap as u32;

/// V4L2 capture device node, opened read/write and non-blocking.
pub struct V4L2Device {
    device: Device,
    path: PathBuf,
}

impl V4L2Device {
    /// Open a device node such as `/dev/video0`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let metadata =
            fs::metadata(path).map_err(|err| CameraError::io(ErrorKind::StatusUnavailable, err))?;
        if !metadata.file_type().is_char_device() {
            return Err(ErrorKind::NotCharDevice.into());
        }

        let device =
            Device::with_path(path).map_err(|err| CameraError::io(ErrorKind::OpenFailed, err))?;
        debug!("opened {}", path.display());
        Ok(Self {
            device,
            path: path.to_path_buf(),
        })
    }

    /// Open `/dev/video{index}`.
    pub fn open_index(index: u32) -> Result<Self> {
        Self::open(format!("/dev/video{index}"))
    }

    /// Path the device was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn fd(&self) -> c_int {
        self.device.handle().fd()
    }

    fn ioctl<T>(&self, request: vidioc::_IOC_TYPE, arg: &mut T) -> io::Result<()> {
        // SAFETY: every call site pairs `request` with the kernel struct it
        // expects, and `arg` outlives the call.
        unsafe { v4l2::ioctl(self.fd(), request, ptr::from_mut(arg).cast::<c_void>()) }
    }

    fn stream_type_ioctl(&self, request: vidioc::_IOC_TYPE) -> io::Result<()> {
        let mut kind: c_int = c_int::try_from(CAPTURE).map_err(|_| io::ErrorKind::InvalidInput)?;
        self.ioctl(request, &mut kind)
    }
}

const fn field_order(field: Field) -> FieldOrder {
    match field.0 {
        1 => FieldOrder::Progressive,
        2 => FieldOrder::Top,
        3 => FieldOrder::Bottom,
        4 => FieldOrder::Interlaced,
        5 => FieldOrder::SequentialTB,
        6 => FieldOrder::SequentialBT,
        7 => FieldOrder::Alternate,
        8 => FieldOrder::InterlacedTB,
        9 => FieldOrder::InterlacedBT,
        _ => FieldOrder::Any,
    }
}

const fn field(order: FieldOrder) -> Field {
    Field(match order {
        FieldOrder::Any => 0,
        FieldOrder::Progressive => 1,
        FieldOrder::Top => 2,
        FieldOrder::Bottom => 3,
        FieldOrder::Interlaced => 4,
        FieldOrder::SequentialTB => 5,
        FieldOrder::SequentialBT => 6,
        FieldOrder::Alternate => 7,
        FieldOrder::InterlacedTB => 8,
        FieldOrder::InterlacedBT => 9,
    })
}

fn to_v4l(format: &Format) -> v4l::Format {
    let mut fmt = v4l::Format::new(format.width, format.height, format.fourcc.into());
    fmt.field_order = field_order(format.field);
    fmt.stride = format.stride;
    fmt.size = format.size;
    fmt
}

fn from_v4l(fmt: &v4l::Format) -> Format {
    Format {
        width: fmt.width,
        height: fmt.height,
        fourcc: FourCC::from(fmt.fourcc),
        field: field(fmt.field_order),
        stride: fmt.stride,
        size: fmt.size,
    }
}

fn from_v4l_parameters(params: &v4l::video::capture::Parameters) -> StreamingParameters {
    StreamingParameters {
        numerator: params.interval.numerator,
        denominator: params.interval.denominator,
        custom_rate: params.capabilities.contains(ParameterFlags::TIME_PER_FRAME),
    }
}

fn to_pix(format: &Format) -> v4l2_pix_format {
    // SAFETY: all-zero is a valid `v4l2_pix_format`.
    let mut pix: v4l2_pix_format = unsafe { mem::zeroed() };
    pix.width = format.width;
    pix.height = format.height;
    pix.pixelformat = format.fourcc.to_u32();
    pix.field = format.field.0;
    pix.bytesperline = format.stride;
    pix.sizeimage = format.size;
    pix
}

const fn from_pix(pix: &v4l2_pix_format) -> Format {
    Format {
        width: pix.width,
        height: pix.height,
        fourcc: FourCC(pix.pixelformat.to_le_bytes()),
        field: Field(pix.field),
        stride: pix.bytesperline,
        size: pix.sizeimage,
    }
}

fn buffer_request(index: u32) -> v4l2_buffer {
    // SAFETY: all-zero is a valid `v4l2_buffer`.
    let mut buffer: v4l2_buffer = unsafe { mem::zeroed() };
    buffer.type_ = CAPTURE;
    buffer.memory = MMAP;
    buffer.index = index;
    buffer
}

fn timestamp(buffer: &v4l2_buffer) -> Duration {
    // V4L2 timestamps are non-negative in practice
    #[allow(clippy::cast_sign_loss)]
    let secs = buffer.timestamp.tv_sec.max(0) as u64;
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    let nanos = (buffer.timestamp.tv_usec.max(0) as u32).saturating_mul(1000);
    Duration::new(secs, nanos)
}

impl CaptureDevice for V4L2Device {
    fn query_capabilities(&mut self) -> io::Result<Capabilities> {
        let caps = self.device.query_caps()?;
        Ok(Capabilities {
            driver: caps.driver,
            card: caps.card,
            bus_info: caps.bus,
            can_capture: caps.capabilities.contains(Flags::VIDEO_CAPTURE),
            can_stream: caps.capabilities.contains(Flags::STREAMING),
        })
    }

    fn format(&mut self) -> io::Result<Format> {
        Ok(from_v4l(&self.device.format()?))
    }

    fn try_format(&mut self, format: &Format) -> io::Result<Format> {
        // SAFETY: all-zero is a valid `v4l2_format`.
        let mut raw: v4l2_format = unsafe { mem::zeroed() };
        raw.type_ = CAPTURE;
        raw.fmt.pix = to_pix(format);
        self.ioctl(vidioc::VIDIOC_TRY_FMT, &mut raw)?;
        // SAFETY: the capture type selects the `pix` member.
        Ok(from_pix(unsafe { &raw.fmt.pix }))
    }

    fn set_format(&mut self, format: &Format) -> io::Result<Format> {
        Ok(from_v4l(&self.device.set_format(&to_v4l(format))?))
    }

    fn request_buffers(&mut self, count: u32) -> io::Result<u32> {
        // SAFETY: all-zero is a valid `v4l2_requestbuffers`.
        let mut request: v4l2_requestbuffers = unsafe { mem::zeroed() };
        request.count = count;
        request.type_ = CAPTURE;
        request.memory = MMAP;
        self.ioctl(vidioc::VIDIOC_REQBUFS, &mut request)?;
        Ok(request.count)
    }

    fn query_buffer(&mut self, index: u32) -> io::Result<BufferDescriptor> {
        let mut buffer = buffer_request(index);
        self.ioctl(vidioc::VIDIOC_QUERYBUF, &mut buffer)?;
        Ok(BufferDescriptor {
            index: buffer.index,
            length: buffer.length,
            // SAFETY: MMAP memory selects the `offset` member.
            offset: unsafe { buffer.m.offset },
        })
    }

    fn map_buffer(&mut self, descriptor: &BufferDescriptor) -> io::Result<MappedRegion> {
        let len = descriptor.length as usize;
        // SAFETY: a fresh shared mapping at the driver-chosen offset; no
        // existing memory is touched.
        let start = unsafe {
            v4l2::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                self.fd(),
                libc::off_t::from(descriptor.offset),
            )
        }?;
        let start = NonNull::new(start.cast::<u8>())
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EFAULT))?;
        // SAFETY: the mapping stays valid until `unmap_buffer`.
        Ok(unsafe { MappedRegion::from_raw_parts(start, len) })
    }

    fn unmap_buffer(&mut self, region: &MappedRegion) -> io::Result<()> {
        // SAFETY: the region came from `map_buffer` and the pool unmaps it once.
        unsafe { v4l2::munmap(region.as_ptr().cast::<c_void>(), region.len()) }
    }

    fn queue_buffer(&mut self, index: u32) -> io::Result<()> {
        let mut buffer = buffer_request(index);
        self.ioctl(vidioc::VIDIOC_QBUF, &mut buffer)
    }

    fn dequeue_buffer(&mut self) -> io::Result<DequeuedBuffer> {
        let mut buffer = buffer_request(0);
        self.ioctl(vidioc::VIDIOC_DQBUF, &mut buffer)?;
        Ok(DequeuedBuffer {
            index: buffer.index,
            metadata: FrameMetadata {
                sequence: buffer.sequence,
                timestamp: timestamp(&buffer),
                bytes_used: buffer.bytesused,
            },
        })
    }

    fn stream_on(&mut self) -> io::Result<()> {
        self.stream_type_ioctl(vidioc::VIDIOC_STREAMON)
    }

    fn stream_off(&mut self) -> io::Result<()> {
        self.stream_type_ioctl(vidioc::VIDIOC_STREAMOFF)
    }

    fn streaming_parameters(&mut self) -> io::Result<StreamingParameters> {
        Ok(from_v4l_parameters(&self.device.params()?))
    }

    fn set_streaming_parameters(
        &mut self,
        parameters: &StreamingParameters,
    ) -> io::Result<StreamingParameters> {
        let mut params = self.device.params()?;
        params.interval = Fraction::new(parameters.numerator, parameters.denominator);
        Ok(from_v4l_parameters(&self.device.set_params(&params)?))
    }

    fn wait_readable(&mut self) -> io::Result<Readiness> {
        let mut pollfd = libc::pollfd {
            fd: self.fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        // SAFETY: one valid pollfd; -1 waits without a timeout.
        let ready = unsafe { libc::poll(&mut pollfd, 1, -1) };
        if ready < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Readiness {
            readable: pollfd.revents & libc::POLLIN != 0,
            error: pollfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0,
        })
    }
}

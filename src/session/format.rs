use log::{debug, warn};

use super::{open_device, Session};
use crate::error::{CameraError, ErrorKind, Result};
use crate::retry::retry_interrupted;
use crate::traits::{CaptureDevice, Format};

impl<D: CaptureDevice> Session<D> {
    /// Read the format the device currently uses.
    pub fn read_preferred_format(&mut self) -> Result<Format> {
        let device = open_device(&mut self.device)?;
        let format = retry_interrupted(|| device.format())
            .map_err(|err| CameraError::io(ErrorKind::FormatUnavailable, err))?;
        self.format = format;
        Ok(format)
    }

    /// Ask the device how it would adjust `proposed`, without committing it.
    ///
    /// An adjusted result is not an error.
    pub fn try_format(&mut self, proposed: &Format) -> Result<Format> {
        let device = open_device(&mut self.device)?;
        retry_interrupted(|| device.try_format(proposed))
            .map_err(|err| CameraError::io(ErrorKind::FormatUnavailable, err))
    }

    /// Commit `proposed` and check that the device kept it.
    ///
    /// When the device substitutes something else this fails with
    /// [`ErrorKind::FormatRejected`] and [`Session::format`] holds the
    /// substitute. Negotiating that substitute accepts it.
    pub fn negotiate(&mut self, proposed: &Format) -> Result<Format> {
        let device = open_device(&mut self.device)?;
        if self.initialized {
            return Err(ErrorKind::AlreadyInitialized.into());
        }
        self.format_accepted = false;
        let actual = retry_interrupted(|| device.set_format(proposed))
            .map_err(|err| CameraError::io(ErrorKind::FormatSetFailed, err))?;
        self.format = actual;

        if !actual.satisfies(proposed) {
            warn!(
                "requested {} {}x{} field {}, device chose {} {}x{} field {}",
                proposed.fourcc,
                proposed.width,
                proposed.height,
                proposed.field.0,
                actual.fourcc,
                actual.width,
                actual.height,
                actual.field.0
            );
            return Err(ErrorKind::FormatRejected.into());
        }
        debug!(
            "format {} {}x{} accepted, stride {} size {}",
            actual.fourcc, actual.width, actual.height, actual.stride, actual.size
        );
        self.format_accepted = true;
        Ok(actual)
    }

    /// Last format reported by the device.
    pub const fn format(&self) -> &Format {
        &self.format
    }

    /// Whether the last negotiation succeeded.
    pub const fn is_format_accepted(&self) -> bool {
        self.format_accepted
    }
}

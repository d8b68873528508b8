use log::debug;

use super::{open_device, Session};
use crate::error::{CameraError, ErrorKind, Result};
use crate::retry::retry_interrupted;
use crate::traits::{CaptureDevice, StreamingParameters};

impl<D: CaptureDevice> Session<D> {
    /// Start streaming. Does nothing if the stream is already on.
    pub fn start(&mut self) -> Result<()> {
        self.ensure_initialized()?;
        if self.streaming {
            return Ok(());
        }
        let device = open_device(&mut self.device)?;
        retry_interrupted(|| device.stream_on())
            .map_err(|err| CameraError::io(ErrorKind::StartFailed, err))?;
        self.streaming = true;
        debug!("stream on");
        Ok(())
    }

    /// Stop streaming. Does nothing if the stream is already off.
    ///
    /// Buffers the device still owned come back unqueued and their contents
    /// are undefined. The current frame is dropped.
    pub fn stop(&mut self) -> Result<()> {
        if !self.streaming {
            return Ok(());
        }
        let device = open_device(&mut self.device)?;
        retry_interrupted(|| device.stream_off())
            .map_err(|err| CameraError::io(ErrorKind::StopFailed, err))?;
        self.streaming = false;
        self.pool.reset_states();
        self.current = None;
        debug!("stream off");
        Ok(())
    }

    /// Whether the stream is on.
    pub const fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Request a frame interval of `numerator / denominator` seconds.
    ///
    /// Returns the interval in effect, which the device may have clamped.
    /// Fails with [`ErrorKind::CustomRateUnsupported`] without touching the
    /// device settings when the interval is fixed.
    pub fn set_time_per_frame(
        &mut self,
        numerator: u32,
        denominator: u32,
    ) -> Result<StreamingParameters> {
        let device = open_device(&mut self.device)?;
        let current = retry_interrupted(|| device.streaming_parameters())
            .map_err(|err| CameraError::io(ErrorKind::ParametersUnavailable, err))?;
        self.parameters = Some(current);
        if !current.custom_rate {
            return Err(ErrorKind::CustomRateUnsupported.into());
        }

        let requested = StreamingParameters {
            numerator,
            denominator,
            custom_rate: true,
        };
        let effective = retry_interrupted(|| device.set_streaming_parameters(&requested))
            .map_err(|err| CameraError::io(ErrorKind::ParametersRejected, err))?;
        if effective.numerator != numerator || effective.denominator != denominator {
            debug!(
                "frame interval {numerator}/{denominator} adjusted to {}/{}",
                effective.numerator, effective.denominator
            );
        }
        self.parameters = Some(effective);
        Ok(effective)
    }

    /// Request `fps` frames per second, a frame interval of `1 / fps`.
    pub fn set_frames_per_second(&mut self, fps: u32) -> Result<StreamingParameters> {
        self.set_time_per_frame(1, fps)
    }

    /// Read the frame interval in effect.
    pub fn time_per_frame(&mut self) -> Result<StreamingParameters> {
        let device = open_device(&mut self.device)?;
        let parameters = retry_interrupted(|| device.streaming_parameters())
            .map_err(|err| CameraError::io(ErrorKind::ParametersUnavailable, err))?;
        self.parameters = Some(parameters);
        Ok(parameters)
    }

    /// Frame interval from the last read or write, without asking the device.
    pub const fn streaming_parameters(&self) -> Option<&StreamingParameters> {
        self.parameters.as_ref()
    }

    /// Whole frames per second in effect, rounded down.
    pub fn frames_per_second(&mut self) -> Result<u32> {
        self.time_per_frame()
            .map(|parameters| parameters.frames_per_second())
    }
}

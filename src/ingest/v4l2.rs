//! V4L2 camera backend.
//!
//! Opens a local device node (e.g. /dev/video0), negotiates RGB24 output and
//! captures through a memory-mapped buffer stream. Frames are normalized to
//! tightly packed RGB24 before entering the pipeline.

use anyhow::Context;
use ouroboros::self_referencing;

use super::{CameraConfig, SourceStats};
use crate::errors::DeviceError;
use crate::frame::Frame;

pub(super) struct V4l2Camera {
    config: CameraConfig,
    state: Option<V4l2State>,
    frame_count: u64,
    active_width: u32,
    active_height: u32,
    last_error: Option<String>,
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Camera {
    pub(super) fn new(config: CameraConfig) -> Self {
        Self {
            active_width: config.width,
            active_height: config.height,
            config,
            state: None,
            frame_count: 0,
            last_error: None,
        }
    }

    pub(super) fn describe(&self) -> String {
        self.config.device.clone()
    }

    pub(super) fn connect(&mut self) -> Result<(), DeviceError> {
        self.try_connect()
            .map_err(|err| DeviceError::new(format!("{:#}", err)))
    }

    fn try_connect(&mut self) -> anyhow::Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.config.device)
            .with_context(|| format!("open v4l2 device {}", self.config.device))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Camera: failed to set format on {}: {}",
                    self.config.device,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };

        if self.config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Camera: failed to set fps on {}: {}",
                    self.config.device,
                    err
                );
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;
        self.last_error = None;

        let state = V4l2StateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;
        self.state = Some(state);

        log::info!(
            "V4l2Camera: connected to {} ({}x{})",
            self.config.device,
            self.active_width,
            self.active_height
        );
        Ok(())
    }

    pub(super) fn next_frame(&mut self) -> Result<Frame, DeviceError> {
        use v4l::io::traits::CaptureStream;

        let Some(state) = self.state.as_mut() else {
            return Err(DeviceError::new("v4l2 device not connected"));
        };
        let expected = (self.active_width * self.active_height * 3) as usize;
        let pixels = match state.with_stream_mut(|stream| stream.next()) {
            Ok((buf, _meta)) => {
                if buf.len() < expected {
                    let err = format!(
                        "short v4l2 frame: expected {} bytes, got {}",
                        expected,
                        buf.len()
                    );
                    self.last_error = Some(err.clone());
                    return Err(DeviceError::new(err));
                }
                buf[..expected].to_vec()
            }
            Err(err) => {
                let reason = format!("capture v4l2 frame: {}", err);
                self.last_error = Some(reason.clone());
                return Err(DeviceError::new(reason));
            }
        };

        self.frame_count += 1;
        Ok(Frame::new(
            pixels,
            self.active_width,
            self.active_height,
            self.frame_count,
        ))
    }

    pub(super) fn is_healthy(&self) -> bool {
        self.state.is_some() && self.last_error.is_none()
    }

    pub(super) fn release(&mut self) {
        if self.state.take().is_some() {
            log::info!("V4l2Camera: released {}", self.config.device);
        }
    }

    pub(super) fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            device: self.config.device.clone(),
        }
    }
}

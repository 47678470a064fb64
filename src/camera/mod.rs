use crate::common::config::CameraConfig;
use crate::common::error::{PanelError, Result};
use image::{DynamicImage, ImageBuffer, Luma, Rgb};
use ouroboros::self_referencing;
use std::time::Duration;
use v4l::buffer::Type;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

/// Source of frames for an authorization session.
///
/// `read_frame` absorbs transient failures internally; an error from it is
/// terminal for the session.
pub trait FrameSource {
    fn read_frame(&mut self) -> Result<DynamicImage>;
    fn release(&mut self);
    fn resolution(&self) -> (u32, u32);
}

/// What to do after a soft frame-read failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Wait and retry without reopening the device.
    Backoff(Duration),
    /// Budget exhausted: release the handle and reopen.
    Reconnect,
}

/// Consecutive-failure counter implementing the two-tier recovery policy:
/// soft failures back off and retry, exceeding the budget reconnects.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    retries: u32,
    max_retries: u32,
    backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self { retries: 0, max_retries, backoff }
    }

    /// Any successful read resets the counter.
    pub fn on_success(&mut self) {
        self.retries = 0;
    }

    pub fn on_failure(&mut self) -> RecoveryAction {
        self.retries += 1;
        if self.retries > self.max_retries {
            self.retries = 0;
            RecoveryAction::Reconnect
        } else {
            RecoveryAction::Backoff(self.backoff)
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.retries
    }
}

#[self_referencing]
struct StreamState {
    device: Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, Device>,
}

/// A live camera handle with resilient frame acquisition.
///
/// Open requests the configured resolution, records what the hardware
/// actually granted, and blocks for the warm-up interval so auto-exposure
/// settles before the first real read.
pub struct CameraSession {
    index: usize,
    requested: (u32, u32),
    granted: (u32, u32),
    fourcc: FourCC,
    warmup: Duration,
    policy: RetryPolicy,
    state: Option<StreamState>,
}

impl CameraSession {
    pub fn open(config: &CameraConfig) -> Result<Self> {
        let mut session = Self {
            index: config.device_index as usize,
            requested: (config.width, config.height),
            granted: (config.width, config.height),
            fourcc: FourCC::new(b"MJPG"),
            warmup: Duration::from_millis(config.warmup_ms),
            policy: RetryPolicy::new(
                config.max_retries,
                Duration::from_millis(config.retry_backoff_ms),
            ),
            state: None,
        };
        session.connect()?;
        Ok(session)
    }

    fn connect(&mut self) -> Result<()> {
        let device = Device::new(self.index).map_err(|e| {
            PanelError::CameraUnavailable(format!(
                "Failed to open camera {}: {}. Check if it's connected or in use.",
                self.index, e
            ))
        })?;

        let mut fmt = device
            .format()
            .map_err(|e| PanelError::CameraUnavailable(format!("Failed to get format: {}", e)))?;

        fmt.width = self.requested.0;
        fmt.height = self.requested.1;
        // Grayscale devices keep their native format, everything else MJPG
        if &fmt.fourcc.repr != b"GREY" {
            fmt.fourcc = FourCC::new(b"MJPG");
        }

        if let Err(e) = device.set_format(&fmt) {
            tracing::warn!("Could not set exact format: {}. Using device defaults.", e);
        }

        // The hardware may not honor the request; read back what it granted
        let actual = device
            .format()
            .map_err(|e| PanelError::CameraUnavailable(format!("Failed to get format: {}", e)))?;
        if actual.width != self.requested.0 || actual.height != self.requested.1 {
            tracing::warn!(
                "Camera resolution {}x{} differs from requested {}x{}",
                actual.width, actual.height, self.requested.0, self.requested.1
            );
        }
        self.granted = (actual.width, actual.height);
        self.fourcc = actual.fourcc;

        let state = StreamStateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4).map_err(
                    |e| PanelError::CameraUnavailable(format!("Failed to create stream: {}", e)),
                )
            },
        }
        .try_build()?;
        self.state = Some(state);

        tracing::info!(
            "Camera {} open at {}x{} {}",
            self.index,
            self.granted.0,
            self.granted.1,
            self.fourcc.str().unwrap_or("????")
        );

        // Absorbs auto-exposure and auto-focus settling, on first open and
        // on every reconnect
        std::thread::sleep(self.warmup);
        tracing::info!("Camera ready");
        Ok(())
    }

    fn grab(&mut self) -> Result<Vec<u8>> {
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| PanelError::FrameRead("Camera not connected".into()))?;
        state
            .with_stream_mut(|stream| stream.next().map(|(buf, _meta)| buf.to_vec()))
            .map_err(|e| PanelError::FrameRead(format!("Failed to capture: {}", e)))
    }

    fn decode_frame(&self, data: &[u8]) -> Result<DynamicImage> {
        let (width, height) = self.granted;
        match &self.fourcc.repr {
            b"GREY" => ImageBuffer::<Luma<u8>, _>::from_raw(width, height, data.to_vec())
                .map(DynamicImage::ImageLuma8)
                .ok_or_else(|| PanelError::FrameRead("Short grayscale frame buffer".into())),
            b"RGB3" => ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, data.to_vec())
                .map(DynamicImage::ImageRgb8)
                .ok_or_else(|| PanelError::FrameRead("Short RGB frame buffer".into())),
            b"MJPG" => image::load_from_memory(data)
                .map_err(|e| PanelError::FrameRead(format!("JPEG decode failed: {}", e))),
            other => Err(PanelError::FrameRead(format!(
                "Unsupported pixel format: {:?}",
                std::str::from_utf8(other).unwrap_or("????")
            ))),
        }
    }
}

impl FrameSource for CameraSession {
    /// Blocks until a frame arrives or recovery fails.
    ///
    /// Soft failures wait out the backoff and retry on the open handle; once
    /// the consecutive-failure budget is exceeded the handle is released and
    /// reopened with the same parameters. Only a failed reconnect escapes.
    fn read_frame(&mut self) -> Result<DynamicImage> {
        loop {
            match self.grab() {
                Ok(data) => {
                    self.policy.on_success();
                    return self.decode_frame(&data);
                }
                Err(e) => match self.policy.on_failure() {
                    RecoveryAction::Backoff(delay) => {
                        tracing::warn!(
                            "Frame read failed (attempt {}): {}",
                            self.policy.consecutive_failures(),
                            e
                        );
                        std::thread::sleep(delay);
                    }
                    RecoveryAction::Reconnect => {
                        tracing::warn!("Camera error: attempting to reconnect...");
                        self.release();
                        self.connect()?;
                    }
                },
            }
        }
    }

    fn release(&mut self) {
        if self.state.take().is_some() {
            tracing::debug!("Camera {} released", self.index);
        }
    }

    fn resolution(&self) -> (u32, u32) {
        self.granted
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        self.release();
    }
}

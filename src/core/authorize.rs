use crate::camera::FrameSource;
use crate::common::error::{PanelError, Result};
use crate::core::detection_log::{DetectionEvent, DetectionLogger, DetectionStatus};
use crate::core::matcher::{FaceMatcher, UNAUTHORISED};
use crate::core::provider::{FaceEncodingProvider, FaceLocation};
use crate::core::registry::KnownFaceRegistry;
use chrono::Local;
use crossbeam_channel::{Receiver, Sender};
use image::{imageops::FilterType, DynamicImage, Rgb};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use std::collections::VecDeque;
use std::time::Instant;

const FPS_BUFFER_SIZE: usize = 10;

/// Terminal result of one recognition session.
#[derive(Debug)]
pub enum LoopOutcome {
    /// At least one face in a frame matched the registry; carries every
    /// recognized name from that frame.
    Success { names: Vec<String> },
    /// The quit signal arrived before any face matched.
    Aborted,
    /// An unrecoverable error (camera reconnect failure, model fault).
    Failed(PanelError),
}

/// A processed frame published to the render activity: boxes drawn in,
/// labels carried alongside for the display layer to letter.
#[derive(Debug, Clone)]
pub struct AnnotatedFrame {
    pub image: DynamicImage,
    pub labels: Vec<(FaceLocation, String)>,
    pub fps: f32,
}

/// Simple moving average over the last `FPS_BUFFER_SIZE` instantaneous
/// frame-rate samples.
#[derive(Debug, Default)]
pub struct FpsMeter {
    samples: VecDeque<f32>,
}

impl FpsMeter {
    pub fn new() -> Self {
        Self { samples: VecDeque::with_capacity(FPS_BUFFER_SIZE) }
    }

    /// Records one sample and returns the smoothed rate.
    pub fn record(&mut self, sample: f32) -> f32 {
        self.samples.push_back(sample);
        if self.samples.len() > FPS_BUFFER_SIZE {
            self.samples.pop_front();
        }
        self.samples.iter().sum::<f32>() / self.samples.len() as f32
    }
}

/// Run-to-decision recognition loop.
///
/// Owns the frame source for the session; the registry and provider are
/// borrowed for its duration. The source is released on every exit path.
pub struct AuthorizationLoop<'a, S: FrameSource> {
    source: S,
    provider: &'a dyn FaceEncodingProvider,
    matcher: FaceMatcher,
    registry: &'a KnownFaceRegistry,
    log: &'a mut DetectionLogger,
    frame_scale: f32,
    frames: Sender<AnnotatedFrame>,
    quit: Receiver<()>,
}

impl<'a, S: FrameSource> AuthorizationLoop<'a, S> {
    pub fn new(
        source: S,
        provider: &'a dyn FaceEncodingProvider,
        matcher: FaceMatcher,
        registry: &'a KnownFaceRegistry,
        log: &'a mut DetectionLogger,
        frame_scale: f32,
        frames: Sender<AnnotatedFrame>,
        quit: Receiver<()>,
    ) -> Self {
        Self { source, provider, matcher, registry, log, frame_scale, frames, quit }
    }

    /// Runs until a face matches, the quit signal arrives, or the source
    /// fails hard. The frame source is released before returning, whatever
    /// the outcome.
    pub fn run(mut self) -> LoopOutcome {
        let outcome = self.drive();
        self.source.release();
        outcome.unwrap_or_else(LoopOutcome::Failed)
    }

    fn drive(&mut self) -> Result<LoopOutcome> {
        tracing::info!("Starting real-time recognition");
        let started = Instant::now();
        let mut frame_count = 0u64;
        let mut fps = FpsMeter::new();

        loop {
            if self.quit.try_recv().is_ok() {
                tracing::info!("Recognition aborted by quit signal");
                return Ok(LoopOutcome::Aborted);
            }

            // Soft read failures are absorbed inside the source; an error
            // here means recovery already failed.
            let frame = self.source.read_frame()?;
            frame_count += 1;

            let sightings = match self.scan_frame(&frame) {
                Ok(sightings) => sightings,
                Err(e) => {
                    // One bad frame never aborts the session
                    tracing::warn!("Frame scan failed: {}", e);
                    continue;
                }
            };

            for sighting in &sightings {
                self.log_sighting(sighting);
            }

            let recognized: Vec<String> = sightings
                .iter()
                .filter(|s| s.name != UNAUTHORISED)
                .map(|s| s.name.clone())
                .collect();
            if !recognized.is_empty() {
                // First-match-wins: no multi-frame confirmation
                tracing::info!("Authorised face detected: {:?}", recognized);
                return Ok(LoopOutcome::Success { names: recognized });
            }

            let elapsed = started.elapsed().as_secs_f32();
            let smoothed = if elapsed > 0.0 {
                fps.record(frame_count as f32 / elapsed)
            } else {
                0.0
            };

            let annotated = annotate(frame, &sightings, smoothed);
            // Render side gone means nobody is watching; keep deciding
            let _ = self.frames.send(annotated);
        }
    }

    /// Detects, classifies, and maps every face in `frame` back to
    /// original-frame coordinates.
    fn scan_frame(&self, frame: &DynamicImage) -> Result<Vec<Sighting>> {
        let small = downscale(frame, self.frame_scale);
        let locations = self.provider.face_locations(&small)?;

        let inverse = 1.0 / self.frame_scale;
        let mut sightings = Vec::with_capacity(locations.len());
        for location in locations {
            let encoding = match self.provider.encode(&small, &location) {
                Ok(encoding) => encoding,
                Err(e) => {
                    tracing::warn!("Face encoding failed: {}", e);
                    continue;
                }
            };
            let name = self.matcher.label(&encoding, self.registry).to_string();
            sightings.push(Sighting { location: location.scaled(inverse), name });
        }
        Ok(sightings)
    }

    fn log_sighting(&mut self, sighting: &Sighting) {
        if !self.log.should_log(&sighting.name) {
            return;
        }
        let status = if sighting.name == UNAUTHORISED {
            DetectionStatus::Unauthorised
        } else {
            DetectionStatus::Authorised
        };
        let event = DetectionEvent {
            timestamp: Local::now(),
            name: sighting.name.clone(),
            status,
            location: sighting.location,
        };
        if let Err(e) = self.log.log(&event) {
            tracing::warn!("Failed to log detection: {}", e);
        }
    }
}

#[derive(Debug, Clone)]
struct Sighting {
    location: FaceLocation,
    name: String,
}

fn downscale(frame: &DynamicImage, scale: f32) -> DynamicImage {
    let width = ((frame.width() as f32 * scale) as u32).max(1);
    let height = ((frame.height() as f32 * scale) as u32).max(1);
    frame.resize_exact(width, height, FilterType::Nearest)
}

const RECOGNIZED_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const UNRECOGNIZED_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

fn annotate(frame: DynamicImage, sightings: &[Sighting], fps: f32) -> AnnotatedFrame {
    let mut image = frame.to_rgb8();
    let mut labels = Vec::with_capacity(sightings.len());

    for sighting in sightings {
        let location = &sighting.location;
        let width = location.width();
        let height = location.height();
        if width <= 0 || height <= 0 {
            continue;
        }

        let color = if sighting.name == UNAUTHORISED {
            UNRECOGNIZED_COLOR
        } else {
            RECOGNIZED_COLOR
        };

        let x = location.left.max(0);
        let y = location.top.max(0);
        let right = location.right.min(image.width() as i32);
        let bottom = location.bottom.min(image.height() as i32);
        let rect_width = (right - x).max(1) as u32;
        let rect_height = (bottom - y).max(1) as u32;

        let rect = Rect::at(x, y).of_size(rect_width, rect_height);
        draw_hollow_rect_mut(&mut image, rect, color);
        if rect_width > 2 && rect_height > 2 {
            let inner = Rect::at(x + 1, y + 1).of_size(rect_width - 2, rect_height - 2);
            draw_hollow_rect_mut(&mut image, inner, color);
        }

        labels.push((*location, sighting.name.clone()));
    }

    AnnotatedFrame { image: DynamicImage::ImageRgb8(image), labels, fps }
}

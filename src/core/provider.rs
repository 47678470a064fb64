use crate::common::config::ModelConfig;
use crate::common::error::{PanelError, Result};
use image::{imageops::FilterType, DynamicImage};
use ndarray::{Array4, CowArray};
use ort::{Environment, GraphOptimizationLevel, Session, SessionBuilder, Value};
use std::sync::Arc;

/// Fixed-length feature vector for one detected face.
pub type Encoding = Vec<f32>;

/// Face rectangle in pixel coordinates, `(top, right, bottom, left)` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaceLocation {
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub left: i32,
}

impl FaceLocation {
    pub fn width(&self) -> i32 {
        (self.right - self.left).max(0)
    }

    pub fn height(&self) -> i32 {
        (self.bottom - self.top).max(0)
    }

    /// Maps the rectangle between coordinate spaces, e.g. `scaled(4.0)` takes
    /// a quarter-resolution detection back to original-frame space.
    pub fn scaled(&self, factor: f32) -> FaceLocation {
        FaceLocation {
            top: (self.top as f32 * factor).round() as i32,
            right: (self.right as f32 * factor).round() as i32,
            bottom: (self.bottom as f32 * factor).round() as i32,
            left: (self.left as f32 * factor).round() as i32,
        }
    }
}

/// Black-box face detection and encoding capability.
///
/// Implementations detect face rectangles in a frame and turn a rectangle
/// into a fixed-length encoding comparable by Euclidean distance.
pub trait FaceEncodingProvider {
    fn face_locations(&self, frame: &DynamicImage) -> Result<Vec<FaceLocation>>;

    fn encode(&self, frame: &DynamicImage, location: &FaceLocation) -> Result<Encoding>;

    /// All encodings in an image, in detection order.
    fn encodings(&self, image: &DynamicImage) -> Result<Vec<Encoding>> {
        let mut out = Vec::with_capacity(1);
        for location in self.face_locations(image)? {
            out.push(self.encode(image, &location)?);
        }
        Ok(out)
    }
}

/// ONNX-backed provider: one detector session, one embedder session.
pub struct OnnxEncodingProvider {
    detector: Session,
    recognizer: Session,
    _environment: Arc<Environment>,
    config: ModelConfig,
}

impl OnnxEncodingProvider {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let environment = Arc::new(
            Environment::builder()
                .with_name("face_encoding")
                .build()
                .map_err(|e| PanelError::Model(format!("Failed to create environment: {}", e)))?,
        );

        let detector = Self::load_session(&environment, &config.detector_path)?;
        let recognizer = Self::load_session(&environment, &config.recognizer_path)?;

        Ok(Self {
            detector,
            recognizer,
            _environment: environment,
            config: config.clone(),
        })
    }

    fn load_session(environment: &Arc<Environment>, path: &std::path::Path) -> Result<Session> {
        if !path.exists() {
            return Err(PanelError::Model(format!("Model not found at: {:?}", path)));
        }

        let session = SessionBuilder::new(environment)?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_model_from_file(path)?;
        Ok(session)
    }

    fn detector_input(&self, image: &DynamicImage) -> Result<Array4<f32>> {
        let width = self.config.detector_input_width;
        let height = self.config.detector_input_height;
        let resized = if image.width() == width && image.height() == height {
            image.clone()
        } else {
            image.resize_exact(width, height, FilterType::Nearest)
        };

        let gray = resized.to_luma8();
        let (width, height) = (width as usize, height as usize);
        let mut array = Array4::<f32>::zeros((1, 3, height, width));
        for y in 0..height {
            for x in 0..width {
                let value = gray.get_pixel(x as u32, y as u32)[0] as f32 / 255.0;
                array[[0, 0, y, x]] = value;
                array[[0, 1, y, x]] = value;
                array[[0, 2, y, x]] = value;
            }
        }
        Ok(array)
    }

    /// Parses `[1, N, 5]` or transposed `[1, 5, N]` center-box detector output.
    fn parse_detections(&self, output: &ndarray::ArrayD<f32>) -> Vec<(f32, f32, f32, f32, f32)> {
        let shape = output.shape().to_vec();
        let (count, stride, transposed) = match shape.len() {
            3 if shape[2] > shape[1] && shape[1] <= 10 => (shape[2], shape[1], true),
            3 => (shape[1], shape[2], false),
            2 => (shape[0], shape[1], false),
            _ => return Vec::new(),
        };

        let flat = match output.as_slice() {
            Some(slice) => slice,
            None => return Vec::new(),
        };

        let mut boxes = Vec::new();
        for i in 0..count {
            let field = |f: usize| {
                if transposed {
                    flat[f * count + i]
                } else {
                    flat[i * stride + f]
                }
            };
            let confidence = field(4);
            if confidence >= self.config.detection_confidence {
                boxes.push((field(0), field(1), field(2), field(3), confidence));
            }
        }
        boxes
    }

    fn crop_face(&self, image: &DynamicImage, location: &FaceLocation) -> DynamicImage {
        let x = location.left.max(0) as u32;
        let y = location.top.max(0) as u32;
        let width = location.width().max(1) as u32;
        let height = location.height().max(1) as u32;
        image.crop_imm(x, y, width, height)
    }

    fn embedder_input(&self, face: &DynamicImage) -> Array4<f32> {
        let size = self.config.recognizer_input_size as usize;
        let gray = face.to_luma8();
        let mut array = Array4::<f32>::zeros((1, 1, size, size));
        let norm = self.config.normalization_value;
        for y in 0..size {
            for x in 0..size {
                let pixel = gray.get_pixel(x as u32, y as u32)[0] as f32;
                array[[0, 0, y, x]] = (pixel - norm) / norm;
            }
        }
        array
    }
}

impl FaceEncodingProvider for OnnxEncodingProvider {
    fn face_locations(&self, frame: &DynamicImage) -> Result<Vec<FaceLocation>> {
        let input = self.detector_input(frame)?;
        let cow = CowArray::from(input.into_dyn());
        let tensor = Value::from_array(self.detector.allocator(), &cow)?;
        let outputs = self.detector.run(vec![tensor])?;

        let output = outputs[0].try_extract::<f32>()?.view().to_owned();
        let boxes = self.parse_detections(&output);

        let scale_x = frame.width() as f32 / self.config.detector_input_width as f32;
        let scale_y = frame.height() as f32 / self.config.detector_input_height as f32;

        let mut locations: Vec<FaceLocation> = Vec::with_capacity(boxes.len());
        for (cx, cy, w, h, _confidence) in boxes {
            let location = FaceLocation {
                top: ((cy - h / 2.0) * scale_y).round() as i32,
                right: ((cx + w / 2.0) * scale_x).round() as i32,
                bottom: ((cy + h / 2.0) * scale_y).round() as i32,
                left: ((cx - w / 2.0) * scale_x).round() as i32,
            };
            // Greedy overlap suppression, first (highest-index-agnostic) kept
            if !locations.iter().any(|kept| overlaps(kept, &location)) {
                locations.push(location);
            }
        }
        Ok(locations)
    }

    fn encode(&self, frame: &DynamicImage, location: &FaceLocation) -> Result<Encoding> {
        let face = self.crop_face(frame, location);
        let resized = face.resize_exact(
            self.config.recognizer_input_size,
            self.config.recognizer_input_size,
            FilterType::Triangle,
        );

        let input = self.embedder_input(&resized);
        let cow = CowArray::from(input.into_dyn());
        let tensor = Value::from_array(self.recognizer.allocator(), &cow)?;
        let outputs = self.recognizer.run(vec![tensor])?;

        let encoding = outputs[0].try_extract::<f32>()?.view().to_owned().into_raw_vec();
        if encoding.is_empty() {
            return Err(PanelError::Encoding("Embedder returned empty vector".into()));
        }
        Ok(encoding)
    }
}

fn overlaps(a: &FaceLocation, b: &FaceLocation) -> bool {
    let ix = (a.right.min(b.right) - a.left.max(b.left)).max(0) as f32;
    let iy = (a.bottom.min(b.bottom) - a.top.max(b.top)).max(0) as f32;
    let inter = ix * iy;
    if inter == 0.0 {
        return false;
    }
    let area_a = (a.width() * a.height()) as f32;
    let area_b = (b.width() * b.height()) as f32;
    inter / (area_a + area_b - inter) > 0.4
}

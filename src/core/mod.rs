pub mod authorize;
pub mod detection_log;
pub mod matcher;
pub mod provider;
pub mod registry;

pub use authorize::{AnnotatedFrame, AuthorizationLoop, FpsMeter, LoopOutcome};
pub use detection_log::{DetectionEvent, DetectionLogger, DetectionStatus};
pub use matcher::{euclidean_distance, FaceMatcher, UNAUTHORISED};
pub use provider::{Encoding, FaceEncodingProvider, FaceLocation, OnnxEncodingProvider};
pub use registry::{KnownFace, KnownFaceRegistry};

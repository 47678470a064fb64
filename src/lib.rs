// Core modules
pub mod camera;
pub mod common;
pub mod core;
pub mod link;
pub mod panel;
pub mod protocol;

// Re-export commonly used types
pub use camera::{CameraSession, FrameSource, RecoveryAction, RetryPolicy};
pub use common::{Config, PanelError, Result};
pub use core::{
    AnnotatedFrame, AuthorizationLoop, DetectionLogger, Encoding, FaceEncodingProvider,
    FaceLocation, FaceMatcher, KnownFaceRegistry, LoopOutcome, OnnxEncodingProvider, UNAUTHORISED,
};
pub use link::{LineLink, SerialLink};
pub use panel::{
    AlarmDecision, AuthenticationGate, GateOutcome, Panel, PanelEvent, StateBits, StatusRenderer,
    StatusSnapshot,
};
pub use protocol::{decode, Dispatcher, InboundMessage, RecognitionService};

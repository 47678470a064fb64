use thiserror::Error;

#[derive(Error, Debug)]
pub enum PanelError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Camera unavailable: {0}")]
    CameraUnavailable(String),

    #[error("Frame read failure: {0}")]
    FrameRead(String),

    #[error("Encoding failure: {0}")]
    Encoding(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Serial link error: {0}")]
    Link(String),

    #[error("Authentication denied")]
    AuthenticationDenied,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("ORT error: {0}")]
    Ort(#[from] ort::OrtError),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, PanelError>;

use image::GrayImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    /// The device is gone or was never usable. Ends the session.
    #[error("capture device unavailable: {0}")]
    Unavailable(String),
    /// A single frame was lost; the next read may succeed.
    #[error("transient capture failure: {0}")]
    Transient(String),
}

/// Blocking source of grayscale frames.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<GrayImage, CaptureError>;
}

use image::GrayImage;
use roster_core::{CaptureError, FrameSource};
use roster_hw::{Camera, CameraError, Frame};

/// Feeds V4L2 frames into an attendance session.
pub struct CameraSource {
    camera: Camera,
}

impl CameraSource {
    pub fn new(camera: Camera) -> Self {
        Self { camera }
    }
}

impl FrameSource for CameraSource {
    fn next_frame(&mut self) -> Result<GrayImage, CaptureError> {
        let frame = self.camera.capture_frame().map_err(classify)?;
        to_gray_image(frame)
    }
}

fn classify(err: CameraError) -> CaptureError {
    if err.is_transient() {
        CaptureError::Transient(err.to_string())
    } else {
        CaptureError::Unavailable(err.to_string())
    }
}

fn to_gray_image(frame: Frame) -> Result<GrayImage, CaptureError> {
    let (width, height, sequence) = (frame.width, frame.height, frame.sequence);
    GrayImage::from_raw(width, height, frame.data).ok_or_else(|| {
        CaptureError::Transient(format!("frame {sequence} does not fill {width}x{height}"))
    })
}

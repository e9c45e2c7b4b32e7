//! roster-hw — V4L2 camera capture for the attendance kiosk.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame::Frame;

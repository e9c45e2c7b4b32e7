//! roster-vision — ONNX face encoder.
//!
//! SCRFD finds faces, ArcFace embeds them. Plugged into `roster-core`
//! through the `FaceEncoder` trait.

pub mod detector;
pub mod encoder;
pub mod recognizer;

pub use encoder::{OnnxEncoder, DETECTOR_MODEL, RECOGNIZER_MODEL};

//! Frame matching seam.
//!
//! Face detection and embedding are delegated to a [`FaceEncoder`]
//! (the ONNX backend lives in `roster-vision`). [`GalleryMatcher`] turns
//! encoder output into labelled recognitions against a loaded [`Gallery`].

use crate::gallery::Gallery;
use crate::types::{EncodedFace, Embedding, Label, Recognition};
use image::imageops::{self, FilterType};
use image::GrayImage;
use thiserror::Error;

/// Cosine similarity needed for a positive match.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.40;

/// Frames are shrunk by this factor before encoding.
pub const DEFAULT_FRAME_SCALE: f32 = 0.25;

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("face encoder failed: {0}")]
    Backend(String),
}

/// External capability: find faces in an image and embed each one.
///
/// Faces are returned in descending detection confidence.
pub trait FaceEncoder {
    fn encode(&mut self, image: &GrayImage) -> Result<Vec<EncodedFace>, EncoderError>;
}

impl<E: FaceEncoder + ?Sized> FaceEncoder for Box<E> {
    fn encode(&mut self, image: &GrayImage) -> Result<Vec<EncodedFace>, EncoderError> {
        (**self).encode(image)
    }
}

/// Maps one frame to the faces in it, each labelled known or unknown.
pub trait FrameMatcher {
    fn recognize(&mut self, frame: &GrayImage) -> Result<Vec<Recognition>, EncoderError>;
}

/// Label a probe with the first gallery identity at or above `threshold`.
///
/// Every entry is compared regardless of where the first match sits.
pub fn first_match(gallery: &Gallery, probe: &Embedding, threshold: f32) -> Label {
    let mut matched = None;
    for entry in gallery.entries() {
        let sim = probe.similarity(&entry.embedding);
        if matched.is_none() && sim >= threshold {
            matched = Some(&entry.identity);
        }
    }
    match matched {
        Some(identity) => Label::Known(identity.clone()),
        None => Label::Unknown,
    }
}

/// Stock matcher: downscale, encode, then label against the gallery.
pub struct GalleryMatcher<E> {
    gallery: Gallery,
    encoder: E,
    threshold: f32,
    frame_scale: f32,
}

impl<E: FaceEncoder> GalleryMatcher<E> {
    pub fn new(gallery: Gallery, encoder: E) -> Self {
        Self {
            gallery,
            encoder,
            threshold: DEFAULT_SIMILARITY_THRESHOLD,
            frame_scale: DEFAULT_FRAME_SCALE,
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    /// Values outside (0, 1) disable downscaling.
    pub fn with_frame_scale(mut self, frame_scale: f32) -> Self {
        self.frame_scale = frame_scale;
        self
    }

    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }

    fn encode_scaled(&mut self, frame: &GrayImage) -> Result<Vec<EncodedFace>, EncoderError> {
        if !(self.frame_scale > 0.0 && self.frame_scale < 1.0) {
            return self.encoder.encode(frame);
        }

        let width = ((frame.width() as f32 * self.frame_scale).round() as u32).max(1);
        let height = ((frame.height() as f32 * self.frame_scale).round() as u32).max(1);
        let small = imageops::resize(frame, width, height, FilterType::Triangle);

        // Each side is rounded on its own, so the axes scale back separately.
        let back_x = frame.width() as f32 / width as f32;
        let back_y = frame.height() as f32 / height as f32;
        let faces = self.encoder.encode(&small)?;
        Ok(faces
            .into_iter()
            .map(|face| EncodedFace {
                bbox: face.bbox.scaled(back_x, back_y),
                embedding: face.embedding,
            })
            .collect())
    }
}

impl<E: FaceEncoder> FrameMatcher for GalleryMatcher<E> {
    fn recognize(&mut self, frame: &GrayImage) -> Result<Vec<Recognition>, EncoderError> {
        let faces = self.encode_scaled(frame)?;
        let recognitions = faces
            .into_iter()
            .map(|face| Recognition {
                label: first_match(&self.gallery, &face.embedding, self.threshold),
                bbox: face.bbox,
            })
            .collect::<Vec<_>>();

        tracing::trace!(faces = recognitions.len(), "frame recognized");
        Ok(recognitions)
    }
}

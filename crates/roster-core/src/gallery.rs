//! Known-face gallery, loaded once at startup from a directory of reference images.

use crate::matcher::{EncoderError, FaceEncoder};
use crate::types::{Embedding, Identity};
use image::ImageFormat;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("cannot read gallery directory {}: {source}", .path.display())]
    Directory {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot decode reference image {}: {source}", .path.display())]
    Image {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("no face detected in reference image {}", .path.display())]
    NoFace { path: PathBuf },
    #[error("encoding reference image {}: {source}", .path.display())]
    Encoder {
        path: PathBuf,
        source: EncoderError,
    },
    #[error("reference image {} uses the reserved label \"Unknown\"", .path.display())]
    ReservedIdentity { path: PathBuf },
}

/// One known identity and its reference encoding.
#[derive(Debug, Clone)]
pub struct GalleryEntry {
    pub identity: Identity,
    pub embedding: Embedding,
    /// Reference image the encoding came from.
    pub source: PathBuf,
}

/// Read-only set of reference encodings, ordered by identity.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
}

impl Gallery {
    /// Load every reference image in `dir`.
    ///
    /// Files are visited in lexical filename order, so when two files share
    /// a stem (`alice.jpg`, `alice.png`) the later one wins. Only the first
    /// face the encoder reports in each image is kept.
    pub fn load<E>(dir: &Path, encoder: &mut E) -> Result<Self, GalleryError>
    where
        E: FaceEncoder + ?Sized,
    {
        let listing = std::fs::read_dir(dir).map_err(|source| GalleryError::Directory {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut paths = Vec::new();
        for item in listing {
            let item = item.map_err(|source| GalleryError::Directory {
                path: dir.to_path_buf(),
                source,
            })?;
            let path = item.path();
            if path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();

        let mut by_identity: BTreeMap<Identity, GalleryEntry> = BTreeMap::new();

        for path in paths {
            let Some(identity) = reference_identity(&path) else {
                tracing::debug!(path = %path.display(), "skipping non-image gallery file");
                continue;
            };
            if identity.is_unknown() {
                return Err(GalleryError::ReservedIdentity { path });
            }

            let image = image::open(&path)
                .map_err(|source| GalleryError::Image {
                    path: path.clone(),
                    source,
                })?
                .to_luma8();

            let faces = encoder.encode(&image).map_err(|source| GalleryError::Encoder {
                path: path.clone(),
                source,
            })?;
            let face_count = faces.len();
            let Some(face) = faces.into_iter().next() else {
                return Err(GalleryError::NoFace { path });
            };
            if face_count > 1 {
                tracing::debug!(path = %path.display(), faces = face_count, "using first face only");
            }

            let entry = GalleryEntry {
                identity: identity.clone(),
                embedding: face.embedding,
                source: path,
            };
            if let Some(previous) = by_identity.insert(identity, entry) {
                tracing::warn!(
                    identity = %previous.identity,
                    replaced = %previous.source.display(),
                    "duplicate gallery identity; later file wins"
                );
            }
        }

        let gallery = Self {
            entries: by_identity.into_values().collect(),
        };

        if gallery.is_empty() {
            tracing::warn!(dir = %dir.display(), "gallery is empty; nobody can be recognized");
        } else {
            tracing::info!(dir = %dir.display(), identities = gallery.len(), "gallery loaded");
        }

        Ok(gallery)
    }

    /// Build a gallery from ready-made entries. Later duplicates overwrite earlier ones.
    pub fn from_entries(entries: impl IntoIterator<Item = GalleryEntry>) -> Self {
        let by_identity: BTreeMap<Identity, GalleryEntry> = entries
            .into_iter()
            .map(|e| (e.identity.clone(), e))
            .collect();
        Self {
            entries: by_identity.into_values().collect(),
        }
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    pub fn identities(&self) -> impl Iterator<Item = &Identity> {
        self.entries.iter().map(|e| &e.identity)
    }

    pub fn contains(&self, identity: &Identity) -> bool {
        self.entries
            .binary_search_by(|e| e.identity.cmp(identity))
            .is_ok()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Identity for a reference file, or `None` if the file is not an image.
fn reference_identity(path: &Path) -> Option<Identity> {
    let name = path.file_name()?.to_str()?;
    if name.starts_with('.') {
        return None;
    }
    ImageFormat::from_path(path).ok()?;
    let stem = path.file_stem()?.to_str()?;
    Some(Identity::new(stem))
}

//! roster-core — Attendance logging from face recognition results.
//!
//! Loads the known-face gallery, deduplicates per-frame recognitions into
//! at-most-once-per-run attendance events, appends them to a CSV ledger and
//! recomputes the visit-count leaderboard after every new event. Face
//! detection itself sits behind the [`FaceEncoder`] trait.

pub mod capture;
pub mod gallery;
pub mod leaderboard;
pub mod ledger;
pub mod matcher;
pub mod session;
pub mod types;

pub use capture::{CaptureError, FrameSource};
pub use gallery::{Gallery, GalleryEntry, GalleryError};
pub use ledger::{Ledger, LedgerError};
pub use matcher::{EncoderError, FaceEncoder, FrameMatcher, GalleryMatcher};
pub use session::{Session, SessionConfig, SessionError, SessionEvent, SessionState, SessionSummary};
pub use types::{AttendanceEvent, BoundingBox, EncodedFace, Embedding, Identity, Label, Recognition, Standing};

//! Session thread.
//!
//! Capture and inference are blocking, so the session runs on its own OS
//! thread. Everything it needs is opened up front so startup errors reach
//! the caller before any frame is read.

use crate::capture::CameraSource;
use crate::config::Config;
use anyhow::{anyhow, Context, Result};
use roster_core::{Gallery, GalleryMatcher, Session, SessionEvent, SessionSummary};
use roster_hw::Camera;
use roster_vision::OnnxEncoder;
use std::thread::JoinHandle;
use tokio::sync::{mpsc, watch};

/// Owner of a running session thread.
pub struct SessionHandle {
    thread: JoinHandle<Result<SessionSummary>>,
    stop: watch::Sender<bool>,
}

impl SessionHandle {
    /// Ask the session to finish after the frame in hand.
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }

    /// Wait for the thread and return its summary.
    pub fn join(self) -> Result<SessionSummary> {
        self.thread
            .join()
            .map_err(|_| anyhow!("session thread panicked"))?
    }
}

/// Load models and gallery, open the ledger and camera, then start pumping
/// frames on a dedicated thread. Events are delivered on `events`; the
/// channel closes when the thread exits.
pub fn spawn_session(
    config: &Config,
    events: mpsc::UnboundedSender<SessionEvent>,
) -> Result<SessionHandle> {
    let mut encoder = OnnxEncoder::load(&config.model_dir)
        .with_context(|| format!("loading face models from {}", config.model_dir.display()))?;

    let gallery = Gallery::load(&config.gallery_dir, &mut encoder)
        .context("loading known faces")?;

    let mut session = Session::initialize(&config.session_config(), events)
        .context("initializing attendance session")?;

    let mut camera = Camera::open(&config.camera_device)
        .with_context(|| format!("opening camera {}", config.camera_device))?;
    if config.warmup_frames > 0 {
        tracing::info!(count = config.warmup_frames, "discarding warmup frames");
        camera.discard_frames(config.warmup_frames);
    }

    let mut matcher = GalleryMatcher::new(gallery, encoder)
        .with_threshold(config.similarity_threshold)
        .with_frame_scale(config.frame_scale);

    let (stop_tx, stop_rx) = watch::channel(false);

    let thread = std::thread::Builder::new()
        .name("roster-session".into())
        .spawn(move || {
            tracing::info!("session thread started");
            let summary = session.run(CameraSource::new(camera), &mut matcher, &stop_rx)?;
            Ok(summary)
        })
        .context("spawning session thread")?;

    Ok(SessionHandle { thread, stop: stop_tx })
}

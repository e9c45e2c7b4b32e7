//! Attendance session: the per-frame state machine.
//!
//! `Initializing → Running → Matching → Updating → Running … → Terminated`
//!
//! The loop is a synchronous frame pump. Each frame is matched, recorded and
//! ranked to completion before the next one is acquired. Notifications go
//! out on an unbounded channel so a slow subscriber never stalls capture.

use crate::capture::{CaptureError, FrameSource};
use crate::leaderboard;
use crate::ledger::{Ledger, LedgerError};
use crate::matcher::FrameMatcher;
use crate::types::{Identity, Recognition, Standing};
use chrono::{Local, NaiveDateTime, SubsecRound};
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initializing,
    Running,
    Matching,
    Updating,
    Terminated,
}

/// Emitted by the session for external subscribers (display, logging).
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A first sighting this run was appended to the ledger.
    Recorded {
        identity: Identity,
        timestamp: NaiveDateTime,
    },
    /// The leaderboard was recomputed after a new event.
    LeaderboardUpdated { standings: Vec<Standing> },
    /// The top attendee frozen at startup has arrived.
    TopAttendeeArrived { identity: Identity },
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub ledger_path: PathBuf,
    pub leaderboard_path: PathBuf,
}

/// Totals reported when the loop ends.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub frames: u64,
    pub recorded: usize,
    pub top_attendee: Option<Identity>,
}

pub struct Session {
    ledger: Ledger,
    leaderboard_path: PathBuf,
    /// Rank-1 identity at startup; never re-evaluated during the run.
    top_attendee: Option<Identity>,
    state: SessionState,
    frames: u64,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl Session {
    /// Open (or create) the ledger and freeze the top attendee from the
    /// history already on disk.
    ///
    /// A missing ledger counts as empty history. An existing ledger that
    /// does not parse is an error.
    pub fn initialize(
        config: &SessionConfig,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Self, SessionError> {
        tracing::debug!(state = ?SessionState::Initializing, "session state");

        let ledger = Ledger::initialize(&config.ledger_path)?;
        let history = leaderboard::load_all_events(ledger.path())?;
        let top_attendee = leaderboard::top(&history);

        match &top_attendee {
            Some(identity) => tracing::info!(
                events = history.len(),
                top_attendee = %identity,
                "attendance history loaded"
            ),
            None => tracing::info!(events = history.len(), "no leaderboard yet"),
        }

        Ok(Self {
            ledger,
            leaderboard_path: config.leaderboard_path.clone(),
            top_attendee,
            state: SessionState::Initializing,
            frames: 0,
            events,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn top_attendee(&self) -> Option<&Identity> {
        self.top_attendee.as_ref()
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            frames: self.frames,
            recorded: self.ledger.recorded_count(),
            top_attendee: self.top_attendee.clone(),
        }
    }

    /// Pump frames until `stop` reads `true`.
    ///
    /// `source` is consumed and dropped on exit, releasing the device.
    /// Transient capture failures and matcher failures skip the frame;
    /// an unavailable device or an unreadable ledger ends the run.
    pub fn run<S, M>(
        &mut self,
        mut source: S,
        matcher: &mut M,
        stop: &watch::Receiver<bool>,
    ) -> Result<SessionSummary, SessionError>
    where
        S: FrameSource,
        M: FrameMatcher + ?Sized,
    {
        let result = self.pump(&mut source, matcher, stop);
        drop(source);
        self.transition(SessionState::Terminated);

        let summary = self.summary();
        tracing::info!(
            frames = summary.frames,
            recorded = summary.recorded,
            "session terminated"
        );
        result.map(|()| summary)
    }

    fn pump<S, M>(
        &mut self,
        source: &mut S,
        matcher: &mut M,
        stop: &watch::Receiver<bool>,
    ) -> Result<(), SessionError>
    where
        S: FrameSource,
        M: FrameMatcher + ?Sized,
    {
        self.transition(SessionState::Running);

        loop {
            let stopped = *stop.borrow();
            if stopped {
                break;
            }

            let frame = match source.next_frame() {
                Ok(frame) => frame,
                Err(CaptureError::Transient(reason)) => {
                    tracing::warn!(%reason, "frame dropped");
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            self.frames += 1;

            self.transition(SessionState::Matching);
            let recognitions = match matcher.recognize(&frame) {
                Ok(r) => r,
                Err(err) => {
                    tracing::warn!(error = %err, frame = self.frames, "matching failed; frame skipped");
                    self.transition(SessionState::Running);
                    continue;
                }
            };

            self.process_recognitions(&recognitions, now())?;
        }

        Ok(())
    }

    /// Record every known identity in one frame's results.
    ///
    /// Returns the identities appended to the ledger by this call. A
    /// failed append is logged and left for a later frame to retry.
    pub fn process_recognitions(
        &mut self,
        recognitions: &[Recognition],
        timestamp: NaiveDateTime,
    ) -> Result<Vec<Identity>, SessionError> {
        self.transition(SessionState::Updating);

        let mut recorded = Vec::new();
        for identity in distinct_identities(recognitions) {
            match self.ledger.record_if_new(identity, timestamp) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(err) => {
                    tracing::warn!(%identity, error = %err, "attendance not recorded; will retry");
                    continue;
                }
            }

            tracing::info!(%identity, %timestamp, "attendance recorded");
            self.emit(SessionEvent::Recorded {
                identity: identity.clone(),
                timestamp,
            });

            let standings = leaderboard::refresh(self.ledger.path(), &self.leaderboard_path)?;
            self.emit(SessionEvent::LeaderboardUpdated { standings });

            if self.top_attendee.as_ref() == Some(identity) {
                tracing::info!(%identity, "top attendee arrived");
                self.emit(SessionEvent::TopAttendeeArrived {
                    identity: identity.clone(),
                });
            }

            recorded.push(identity.clone());
        }

        self.transition(SessionState::Running);
        Ok(recorded)
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("no session event subscriber");
        }
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            tracing::debug!(from = ?self.state, to = ?next, "session state");
            self.state = next;
        }
    }
}

/// Known identities in a frame, first appearance wins.
fn distinct_identities(recognitions: &[Recognition]) -> Vec<&Identity> {
    let mut seen: Vec<&Identity> = Vec::new();
    for identity in recognitions.iter().filter_map(|r| r.label.identity()) {
        if !seen.contains(&identity) {
            seen.push(identity);
        }
    }
    seen
}

fn now() -> NaiveDateTime {
    Local::now().naive_local().trunc_subsecs(0)
}

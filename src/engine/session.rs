// src/engine/session.rs
//
// Preview sessions: every parameter change starts a new request, and only the
// latest request's result may reach the display. Completions are tagged with
// a sequence number; anything older than the latest issued is dropped.
//
// Handle discipline: the session owns at most one live preview handle. It is
// released when a newer result is displayed, on `clear`, and on drop.

use crate::engine::asset::{release_quietly, EncodedAsset, PreviewHandle, PreviewRegistry};
use crate::engine::common::run_with_panic_policy;
use crate::engine::pool;
use crate::error::{ImagePixError, Result};
use parking_lot::Mutex;
use std::sync::mpsc;
use std::sync::Arc;
use tracing::{debug, warn};

/// Proof that a request was started; consumed by `complete`.
#[derive(Debug)]
pub struct RequestTicket {
    seq: u64,
}

impl RequestTicket {
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

/// The result currently on screen.
#[derive(Clone, Debug, PartialEq)]
pub struct DisplayedPreview {
    pub seq: u64,
    pub handle: PreviewHandle,
    pub asset: EncodedAsset,
}

#[derive(Clone, Debug)]
pub enum Completion {
    /// The result is now displayed; the previous handle (if any) was released.
    Displayed(DisplayedPreview),
    /// A newer request was started before this one finished.
    Stale { seq: u64, latest: u64 },
    /// The latest request failed; the previous display is unchanged.
    Failed(ImagePixError),
}

impl Completion {
    pub fn is_displayed(&self) -> bool {
        matches!(self, Completion::Displayed(_))
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, Completion::Stale { .. })
    }
}

#[derive(Debug, Default)]
struct SessionState {
    issued: u64,
    displayed: Option<DisplayedPreview>,
    last_error: Option<ImagePixError>,
}

#[derive(Debug)]
pub struct PreviewSession {
    registry: Arc<PreviewRegistry>,
    state: Mutex<SessionState>,
}

impl Default for PreviewSession {
    fn default() -> Self {
        Self::new(Arc::new(PreviewRegistry::new()))
    }
}

impl PreviewSession {
    pub fn new(registry: Arc<PreviewRegistry>) -> Self {
        Self {
            registry,
            state: Mutex::new(SessionState::default()),
        }
    }

    pub fn registry(&self) -> &Arc<PreviewRegistry> {
        &self.registry
    }

    /// Start a request. Every earlier ticket becomes stale.
    pub fn begin(&self) -> RequestTicket {
        let mut state = self.state.lock();
        state.issued += 1;
        RequestTicket { seq: state.issued }
    }

    /// Deliver the outcome of `ticket`'s request.
    pub fn complete(&self, ticket: RequestTicket, outcome: Result<EncodedAsset>) -> Completion {
        let mut state = self.state.lock();
        if ticket.seq != state.issued {
            debug!(
                target: "imagepix::session",
                seq = ticket.seq,
                latest = state.issued,
                "discarding stale completion"
            );
            return Completion::Stale {
                seq: ticket.seq,
                latest: state.issued,
            };
        }

        match outcome {
            Ok(asset) => {
                // The outgoing handle is invalid before the new one exists.
                release_quietly(&self.registry, state.displayed.take().map(|p| p.handle));
                let displayed = DisplayedPreview {
                    seq: ticket.seq,
                    handle: self.registry.issue(&asset),
                    asset,
                };
                state.displayed = Some(displayed.clone());
                state.last_error = None;
                debug!(
                    target: "imagepix::session",
                    seq = ticket.seq,
                    handle = displayed.handle.id(),
                    size = displayed.asset.size(),
                    "preview displayed"
                );
                Completion::Displayed(displayed)
            }
            Err(err) => {
                warn!(target: "imagepix::session", seq = ticket.seq, error = %err, "preview request failed");
                state.last_error = Some(err.clone());
                Completion::Failed(err)
            }
        }
    }

    /// Run `job` on the shared pool as a new request.
    pub fn submit<F>(self: &Arc<Self>, job: F) -> PendingPreview
    where
        F: FnOnce() -> Result<EncodedAsset> + Send + 'static,
    {
        let ticket = self.begin();
        let seq = ticket.seq;
        let session = Arc::clone(self);
        let (tx, rx) = mpsc::channel();
        pool::spawn(move || {
            let outcome = run_with_panic_policy("session:preview", job);
            let completion = session.complete(ticket, outcome);
            let _ = tx.send(completion);
        });
        PendingPreview { seq, rx }
    }

    pub fn displayed(&self) -> Option<DisplayedPreview> {
        self.state.lock().displayed.clone()
    }

    pub fn last_error(&self) -> Option<ImagePixError> {
        self.state.lock().last_error.clone()
    }

    pub fn latest_seq(&self) -> u64 {
        self.state.lock().issued
    }

    /// Drop the displayed result and release its handle. In-flight requests become stale.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.issued += 1;
        state.last_error = None;
        release_quietly(&self.registry, state.displayed.take().map(|p| p.handle));
    }
}

impl Drop for PreviewSession {
    fn drop(&mut self) {
        let displayed = self.state.get_mut().displayed.take();
        release_quietly(&self.registry, displayed.map(|p| p.handle));
    }
}

/// A submitted request whose completion has not been collected yet.
#[derive(Debug)]
pub struct PendingPreview {
    seq: u64,
    rx: mpsc::Receiver<Completion>,
}

impl PendingPreview {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Block until the job finishes.
    pub fn wait(self) -> Result<Completion> {
        self.rx
            .recv()
            .map_err(|_| ImagePixError::internal_panic(format!("preview job {} vanished", self.seq)))
    }
}

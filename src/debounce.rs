//! Coalesces bursts of viewport changes into a single recompute.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::models::Viewport;

pub const DEFAULT_QUIET_INTERVAL: Duration = Duration::from_millis(500);

/// Timer expiry for the schedule identified by `generation`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fired {
    pub generation: u64,
}

/// Cancel-and-reschedule debouncer with at most one pending timer.
///
/// The timer task only posts a [`Fired`] message; the owner checks it with
/// [`RegionChangeDebouncer::take_if_current`] before recomputing, so an expiry
/// that raced with a newer change is dropped.
pub struct RegionChangeDebouncer<T> {
    quiet: Duration,
    generation: u64,
    pending: Option<JoinHandle<()>>,
    latest: Option<Viewport>,
    notify: mpsc::UnboundedSender<T>,
}

impl<T: From<Fired> + Send + 'static> RegionChangeDebouncer<T> {
    pub fn new(quiet: Duration, notify: mpsc::UnboundedSender<T>) -> Self {
        Self {
            quiet,
            generation: 0,
            pending: None,
            latest: None,
            notify,
        }
    }

    /// Record `viewport` and restart the quiet interval
    pub fn on_viewport_changed(&mut self, viewport: Viewport) {
        self.latest = Some(viewport);
        if self.cancel() {
            trace!("Viewport changed again, restarting quiet interval");
        }

        self.generation += 1;
        let fired = Fired {
            generation: self.generation,
        };
        let quiet = self.quiet;
        let notify = self.notify.clone();
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(quiet).await;
            // The owner may be gone.
            let _ = notify.send(T::from(fired));
        }));
    }

    /// Viewport to recompute right away after new data arrived, if one is known.
    ///
    /// Any pending timer is dropped since this recompute covers it.
    pub fn on_data_refreshed(&mut self) -> Option<Viewport> {
        if self.cancel() {
            debug!("Data refreshed, recomputing without waiting for the quiet interval");
        }
        self.latest
    }

    /// Clear the pending handle and return the viewport to recompute when
    /// `fired` belongs to the schedule still installed.
    pub fn take_if_current(&mut self, fired: Fired) -> Option<Viewport> {
        if fired.generation != self.generation || self.pending.is_none() {
            trace!("Dropping stale recompute #{}", fired.generation);
            return None;
        }
        self.pending = None;
        self.latest
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Most recent viewport seen
    pub fn latest(&self) -> Option<Viewport> {
        self.latest
    }

    fn cancel(&mut self) -> bool {
        match self.pending.take() {
            Some(pending) => {
                pending.abort();
                true
            }
            None => false,
        }
    }
}

impl<T> Drop for RegionChangeDebouncer<T> {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
    }
}

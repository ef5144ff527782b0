//! Last-request-wins publication of preview renders.
//!
//! Each preview render starts by taking a [`PreviewTicket`] from the slot.
//! When it finishes it publishes under that ticket; the slot accepts the
//! image only if no newer ticket has been handed out since. Stale renders are
//! dropped, never queued.

use crate::params::FilterParameterSet;
use image::RgbaImage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PreviewTicket(u64);

/// A published preview and the parameters that produced it.
#[derive(Debug, Clone)]
pub struct PublishedPreview {
    pub ticket: PreviewTicket,
    pub image: Arc<RgbaImage>,
    pub params: FilterParameterSet,
}

#[derive(Debug, Default)]
pub struct PreviewSlot {
    issued: AtomicU64,
    published: Mutex<Option<PublishedPreview>>,
}

impl PreviewSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a render. Invalidates every earlier ticket.
    pub fn begin(&self) -> PreviewTicket {
        PreviewTicket(self.issued.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Publish a finished render. Returns `false` if the ticket is stale.
    pub fn publish(
        &self,
        ticket: PreviewTicket,
        image: RgbaImage,
        params: FilterParameterSet,
    ) -> bool {
        let mut published = self.published.lock().unwrap_or_else(PoisonError::into_inner);
        let newest = PreviewTicket(self.issued.load(Ordering::SeqCst));
        let older_than_shown = published.as_ref().is_some_and(|p| p.ticket >= ticket);
        if ticket != newest || older_than_shown {
            tracing::trace!(ticket = ticket.0, newest = newest.0, "stale preview discarded");
            return false;
        }
        *published = Some(PublishedPreview {
            ticket,
            image: Arc::new(image),
            params,
        });
        true
    }

    pub fn latest(&self) -> Option<PublishedPreview> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn latest_image(&self) -> Option<Arc<RgbaImage>> {
        self.latest().map(|p| p.image)
    }

    /// Whether the shown preview was rendered from exactly `params`.
    pub fn shows(&self, params: &FilterParameterSet) -> bool {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|p| &p.params == params)
    }

    pub fn clear(&self) {
        *self.published.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

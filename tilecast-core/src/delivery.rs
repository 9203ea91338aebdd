//! The shared queue that serializes observer notifications.
//!
//! Tile and capture observers are never called from a capture, engine or
//! render thread directly. Each notification is posted here, so observers
//! see events one at a time and in the order they were produced.

use std::sync::Arc;

use crate::error::MediaError;
use crate::worker::SerialWorker;

struct Inner {
    worker: SerialWorker<()>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.worker.quit();
    }
}

/// Cloneable handle to a delivery queue. The thread ends with the last clone.
#[derive(Clone)]
pub struct DeliveryQueue {
    inner: Arc<Inner>,
}

impl DeliveryQueue {
    pub fn new(name: &str) -> Result<Self, MediaError> {
        let worker = SerialWorker::spawn(name, |_| Ok(()))?;
        Ok(Self {
            inner: Arc::new(Inner { worker }),
        })
    }

    /// Queue a notification.
    pub fn post<F>(&self, notify: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.worker.post(move |_, _| notify());
    }

    /// Block until every notification queued so far has been delivered.
    ///
    /// No-op when called from a notification.
    pub fn flush(&self) {
        let _ = self.inner.worker.run_sync(|_, _| ());
    }
}

impl std::fmt::Debug for DeliveryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryQueue")
            .field("name", &self.inner.worker.name())
            .finish()
    }
}

// ── Tests ────────────────────────────────────────────────────────

//! Capture lifecycle observers.

use std::sync::Arc;

use tracing::debug;

use crate::delivery::DeliveryQueue;
use crate::error::CaptureSourceError;
use crate::registry::Registry;

/// Lifecycle callbacks of a capture source, delivered on the shared
/// delivery queue.
pub trait CaptureSourceObserver: Send + Sync {
    fn on_capture_started(&self);
    fn on_capture_stopped(&self);
    fn on_capture_failed(&self, error: CaptureSourceError);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaptureEvent {
    Started,
    Stopped,
    Failed(CaptureSourceError),
}

/// Observer registry plus the queue notifications go through.
pub(crate) struct CaptureObservers {
    source: &'static str,
    observers: Registry<dyn CaptureSourceObserver>,
    queue: DeliveryQueue,
}

impl CaptureObservers {
    pub(crate) fn new(source: &'static str, queue: DeliveryQueue) -> Self {
        Self {
            source,
            observers: Registry::new(),
            queue,
        }
    }

    pub(crate) fn add(&self, observer: Arc<dyn CaptureSourceObserver>) {
        self.observers.add(observer);
    }

    pub(crate) fn remove(&self, observer: &Arc<dyn CaptureSourceObserver>) {
        self.observers.remove(observer);
    }

    pub(crate) fn started(&self) {
        self.emit(CaptureEvent::Started);
    }

    pub(crate) fn stopped(&self) {
        self.emit(CaptureEvent::Stopped);
    }

    pub(crate) fn failed(&self, error: CaptureSourceError) {
        self.emit(CaptureEvent::Failed(error));
    }

    fn emit(&self, event: CaptureEvent) {
        debug!(source = self.source, ?event, "capture event");
        let observers = self.observers.snapshot();
        if observers.is_empty() {
            return;
        }
        self.queue.post(move || {
            for observer in observers {
                match event {
                    CaptureEvent::Started => observer.on_capture_started(),
                    CaptureEvent::Stopped => observer.on_capture_stopped(),
                    CaptureEvent::Failed(error) => observer.on_capture_failed(error),
                }
            }
        });
    }
}

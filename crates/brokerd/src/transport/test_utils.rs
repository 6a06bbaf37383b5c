//! Connection handlers used by listener tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use super::{ConnectionHandler, ConnectionStream};

/// Counts accepted connections. A holding handler keeps each connection
/// thread alive until [`CountingHandler::release`] is called.
pub(crate) struct CountingHandler {
    accepted: Arc<AtomicUsize>,
    held: Option<AtomicBool>,
}

impl CountingHandler {
    pub(crate) fn new() -> (Arc<AtomicUsize>, Arc<Self>) {
        Self::build(None)
    }

    pub(crate) fn holding() -> (Arc<AtomicUsize>, Arc<Self>) {
        Self::build(Some(AtomicBool::new(true)))
    }

    fn build(held: Option<AtomicBool>) -> (Arc<AtomicUsize>, Arc<Self>) {
        let accepted = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(Self {
            accepted: Arc::clone(&accepted),
            held,
        });
        (accepted, handler)
    }

    pub(crate) fn release(&self) {
        if let Some(held) = &self.held {
            held.store(false, Ordering::SeqCst);
        }
    }
}

impl ConnectionHandler for CountingHandler {
    fn handle(&self, stream: ConnectionStream) {
        self.accepted.fetch_add(1, Ordering::SeqCst);
        if let Some(held) = &self.held {
            while held.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(5));
            }
        }
        drop(stream);
    }
}

//! Routing of externally composed text to the active session.
//!
//! The bridge holds at most one writer. Whoever registers last owns the slot;
//! unregistering with a stale token leaves a newer registration alone.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use ptydeck_core::session::SessionId;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::debug;

/// Delivers text to one session's input.
pub type WriterFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Interval between delivery attempts of a deferred write.
pub const RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Proof of a registration, needed to unregister it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WriterToken(u64);

struct Registration {
    token: WriterToken,
    session_id: SessionId,
    writer: WriterFn,
}

#[derive(Default)]
pub struct ActiveWriterBridge {
    slot: Mutex<Option<Registration>>,
    next_token: AtomicU64,
}

impl ActiveWriterBridge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `writer` the target of all writes, replacing any previous one.
    pub fn register(&self, session_id: SessionId, writer: WriterFn) -> WriterToken {
        let token = WriterToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        debug!("Writer for session {} registered", session_id);
        *self.slot.lock() = Some(Registration {
            token,
            session_id,
            writer,
        });
        token
    }

    /// Clear the slot if `token` still owns it.
    pub fn unregister(&self, token: WriterToken) -> bool {
        let mut slot = self.slot.lock();
        match slot.as_ref() {
            Some(registration) if registration.token == token => {
                debug!("Writer for session {} unregistered", registration.session_id);
                *slot = None;
                true
            }
            _ => false,
        }
    }

    pub fn clear(&self) {
        self.slot.lock().take();
    }

    pub fn registered_session(&self) -> Option<SessionId> {
        self.slot.lock().as_ref().map(|r| r.session_id.clone())
    }

    pub fn has_writer(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Deliver `data` to the registered writer. Returns false without one.
    pub fn write(&self, data: &str) -> bool {
        // Call outside the lock so the writer may touch the bridge.
        let writer = self.slot.lock().as_ref().map(|r| r.writer.clone());
        match writer {
            Some(writer) => {
                writer(data);
                true
            }
            None => false,
        }
    }

    /// Deliver `data` once a writer is present.
    ///
    /// The first attempt is made after `min_delay`, then one every
    /// [`RETRY_INTERVAL`] for as long as the elapsed time stays within
    /// `max_wait`. The handle resolves to whether the data was delivered;
    /// an abandoned write is not an error.
    pub fn write_when_ready(
        self: &Arc<Self>,
        data: String,
        max_wait: Duration,
        min_delay: Duration,
    ) -> JoinHandle<bool> {
        let bridge = Arc::clone(self);
        tokio::spawn(async move {
            let start = Instant::now();
            sleep(min_delay).await;

            loop {
                if bridge.write(&data) {
                    debug!("Deferred write delivered after {:?}", start.elapsed());
                    return true;
                }
                if start.elapsed() + RETRY_INTERVAL > max_wait {
                    debug!(
                        "Deferred write abandoned after {:?}: no writer registered",
                        start.elapsed()
                    );
                    return false;
                }
                sleep(RETRY_INTERVAL).await;
            }
        })
    }
}

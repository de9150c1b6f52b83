//! Cancellation registry shared by running agent loops and the stop handler.

use dispatch_core::message::SessionId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Session id → cancellation flag of the run currently owning it.
#[derive(Default)]
pub struct CancellationRegistry {
    flags: Mutex<HashMap<SessionId, Arc<AtomicBool>>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn flags(&self) -> MutexGuard<'_, HashMap<SessionId, Arc<AtomicBool>>> {
        // The map stays consistent even if a holder panicked.
        self.flags.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a run for `session`, replacing any older entry.
    ///
    /// The returned guard removes the entry when dropped, unless a newer run
    /// has taken the session over in the meantime.
    pub fn register(self: &Arc<Self>, session: &SessionId) -> CancelGuard {
        let flag = Arc::new(AtomicBool::new(false));
        if self.flags().insert(session.clone(), flag.clone()).is_some() {
            debug!(session = %session, "Replaced active run registration");
        }
        CancelGuard {
            registry: Arc::clone(self),
            session: session.clone(),
            flag,
        }
    }

    /// Request cancellation. Returns `true` iff a run was registered.
    pub fn cancel(&self, session: &SessionId) -> bool {
        match self.flags().get(session) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, session: &SessionId) -> bool {
        self.flags().contains_key(session)
    }

    pub fn unregister(&self, session: &SessionId) {
        self.flags().remove(session);
    }

    pub fn len(&self) -> usize {
        self.flags().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, session: &SessionId, flag: &Arc<AtomicBool>) {
        let mut flags = self.flags();
        if flags.get(session).is_some_and(|current| Arc::ptr_eq(current, flag)) {
            flags.remove(session);
        }
    }
}

/// Handle held by one run for the duration of its execution.
pub struct CancelGuard {
    registry: Arc<CancellationRegistry>,
    session: SessionId,
    flag: Arc<AtomicBool>,
}

impl CancelGuard {
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        self.registry.release(&self.session, &self.flag);
    }
}

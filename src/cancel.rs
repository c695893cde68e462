use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// Process-wide mission abort flag.
///
/// Cloned into the command listener (writer) and into every flight loop
/// (readers). It is raised by an explicit abort or by a battery failsafe and
/// only reset when a new mission starts.
#[derive(Debug, Clone, Default)]
pub struct CancellationSignal {
    raised: Arc<AtomicBool>,
    wakeup: Arc<Notify>,
}

impl CancellationSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
        self.wakeup.notify_waiters();
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.raised.store(false, Ordering::SeqCst);
    }

    /// Resolves once the signal is raised, for waits that are not polling
    /// loops.
    pub async fn raised(&self) {
        loop {
            // Registered before the check so a concurrent raise is not missed.
            let notified = self.wakeup.notified();
            if self.is_raised() {
                return;
            }
            notified.await;
        }
    }
}

//! Cooperative cancellation shared between the control loop and signal handlers
//!
//! A [`CancelToken`] is the only state touched from outside a running
//! controller. Loops poll it at every block boundary (and while waiting on the
//! transport), so cancellation latency is bounded by one block plus the poll
//! interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Interval between attempts to claim the token while another operation winds down
const CLAIM_POLL: Duration = Duration::from_millis(1);

#[derive(Debug, Default)]
struct Flags {
    cancelled: AtomicBool,
    active: AtomicBool,
}

/// Process-wide cancellation flag plus the "operation active" marker
///
/// Cloning is cheap; all clones observe the same flags.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flags: Arc<Flags>,
}

impl CancelToken {
    /// Create a new, idle token
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the active operation to stop
    ///
    /// Safe to call from any thread or from a signal handler. Returns `true`
    /// when an operation was active to receive the request.
    pub fn request_cancel(&self) -> bool {
        self.flags.cancelled.store(true, Ordering::SeqCst);
        self.flags.active.load(Ordering::SeqCst)
    }

    /// Whether cancellation has been requested for the current operation
    pub fn is_cancelled(&self) -> bool {
        self.flags.cancelled.load(Ordering::SeqCst)
    }

    /// Whether an operation currently holds the token
    pub fn is_active(&self) -> bool {
        self.flags.active.load(Ordering::SeqCst)
    }

    /// Claim the token for a new operation
    ///
    /// If another operation is still running it is asked to stop, and this
    /// call blocks until that operation releases its guard. The cancellation
    /// flag is cleared once the token is claimed.
    pub fn begin(&self) -> ActiveGuard {
        while self
            .flags
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            self.flags.cancelled.store(true, Ordering::SeqCst);
            std::thread::sleep(CLAIM_POLL);
        }
        self.flags.cancelled.store(false, Ordering::SeqCst);
        ActiveGuard {
            token: self.clone(),
        }
    }
}

/// Marks an operation as active until dropped
#[derive(Debug)]
pub struct ActiveGuard {
    token: CancelToken,
}

impl ActiveGuard {
    /// Token owned by this operation
    pub fn token(&self) -> &CancelToken {
        &self.token
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.token.flags.active.store(false, Ordering::SeqCst);
    }
}

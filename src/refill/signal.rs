//! Wake signal for the refill worker
//!
//! A single level-triggered flag plus a condition variable. Any number of
//! raisers, one waiter.

use parking_lot::{Condvar, Mutex};

/// Why the worker woke up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// At least one bucket dropped below its low watermark
    Refill,
    /// Shutdown was requested
    Shutdown,
}

#[derive(Debug, Default)]
struct SignalState {
    pending: bool,
    stopping: bool,
}

/// Level-triggered refill wake-up
#[derive(Debug, Default)]
pub struct RefillSignal {
    state: Mutex<SignalState>,
    cond: Condvar,
}

impl RefillSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a refill pass. Repeated raises before the worker runs coalesce.
    pub fn raise(&self) {
        let mut state = self.state.lock();
        if !state.pending {
            state.pending = true;
            self.cond.notify_one();
        }
    }

    /// Whether a raise is waiting to be consumed
    pub fn is_pending(&self) -> bool {
        self.state.lock().pending
    }

    /// Ask the waiter to exit
    pub fn stop(&self) {
        let mut state = self.state.lock();
        state.stopping = true;
        self.cond.notify_all();
    }

    pub fn is_stopping(&self) -> bool {
        self.state.lock().stopping
    }

    /// Block until raised or stopped, then clear the pending flag
    ///
    /// Shutdown is checked before every wait and wins over a pending raise.
    pub fn wait(&self) -> Wake {
        let mut state = self.state.lock();
        loop {
            if state.stopping {
                return Wake::Shutdown;
            }
            if state.pending {
                state.pending = false;
                return Wake::Refill;
            }
            self.cond.wait(&mut state);
        }
    }
}

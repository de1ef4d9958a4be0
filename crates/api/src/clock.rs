//! Lamport logical clock.

use std::sync::{Arc, Mutex};

/// A Lamport logical clock establishing a happens-before partial order
/// across weathervane participants without reference to physical time.
///
/// All three operations share one critical section, so interleaved use
/// from the acceptor and worker threads stays serializable. Cloning
/// yields a handle onto the same underlying counter.
#[derive(Debug, Clone, Default)]
pub struct LamportClock(Arc<Mutex<i64>>);

impl LamportClock {
    /// Construct a clock resuming from a previously stored value.
    pub fn resume_at(time: i64) -> Self {
        Self(Arc::new(Mutex::new(time.max(0))))
    }

    /// Tick the clock for a locally originated message and return the
    /// value to stamp on it.
    pub fn tick_send(&self) -> i64 {
        let mut time = self.0.lock().unwrap();
        *time += 1;
        *time
    }

    /// Merge a remote timestamp into the clock: `L = max(L, remote) + 1`.
    ///
    /// Invoked once per received request, after header parse and before
    /// any handler logic runs.
    pub fn observe(&self, remote: i64) {
        let mut time = self.0.lock().unwrap();
        *time = (*time).max(remote) + 1;
    }

    /// Read the clock without ticking it.
    ///
    /// This is what the connection handshake advertises: the peer needs
    /// to know what the server knows *now* to form a causally consistent
    /// request, and the tick happens on actual message receipt via
    /// [LamportClock::observe].
    pub fn current(&self) -> i64 {
        *self.0.lock().unwrap()
    }

    /// Raise the clock to at least `time`, never lowering it.
    pub fn resume(&self, time: i64) {
        let mut cur = self.0.lock().unwrap();
        *cur = (*cur).max(time);
    }
}

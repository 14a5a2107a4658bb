//! Frame pacing for clocked senders

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Releases frames no faster than their declared duration.
///
/// The first frame goes out immediately. A sender that falls more than one
/// period behind is resynchronized instead of bursting to catch up.
pub struct FrameClock {
    next_due: Mutex<Option<Instant>>,
}

impl FrameClock {
    pub fn new() -> Self {
        Self {
            next_due: Mutex::new(None),
        }
    }

    /// Block until the next frame may be released, then schedule the one after
    pub fn wait(&self, period: Duration) {
        let mut next_due = self.next_due.lock();
        let now = Instant::now();
        let release = match *next_due {
            Some(due) if due > now => {
                std::thread::sleep(due - now);
                due
            }
            Some(due) if now.duration_since(due) <= period => due,
            _ => now,
        };
        *next_due = Some(release + period);
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

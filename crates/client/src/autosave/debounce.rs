// Trailing-edge debouncer for autosave.
//
// Every mutation pushes the deadline out to `last mutation + window`; the
// save becomes ready once that deadline passes without another mutation.

use std::time::Duration;

use tokio::time::Instant;

/// Default quiet period before a save.
pub const DEFAULT_DEBOUNCE_MS: u64 = 2000;

pub struct Debouncer {
    window: Duration,
    last_seen: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self { window, last_seen: None }
    }

    /// Record a mutation observed at `now`. Restarts the window.
    pub fn push_at(&mut self, now: Instant) {
        self.last_seen = Some(match self.last_seen {
            Some(previous) if previous > now => previous,
            _ => now,
        });
    }

    /// Consume the pending mutation if its window has elapsed.
    pub fn take_ready(&mut self) -> bool {
        self.take_ready_at(Instant::now())
    }

    fn take_ready_at(&mut self, now: Instant) -> bool {
        match self.next_deadline() {
            Some(deadline) if now >= deadline => {
                self.last_seen = None;
                true
            }
            _ => false,
        }
    }

    /// When the pending mutation becomes ready, or None if idle.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.last_seen.map(|last_seen| last_seen + self.window)
    }
}

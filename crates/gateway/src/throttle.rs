//! Per-connection frame-rate limiting.
//!
//! A fixed one-second window per connection; frames beyond the configured
//! budget are dropped with a `Rate limited` error frame. The window state
//! lives in the read loop, so no shared lock is involved.

use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
pub struct FrameThrottle {
    max_per_window: u32,
    count: u32,
    window_started_at: Instant,
}

impl FrameThrottle {
    pub fn new(max_per_second: u32) -> Self {
        Self {
            max_per_window: max_per_second,
            count: 0,
            window_started_at: Instant::now(),
        }
    }

    /// Admit one frame. Returns `false` when the budget for the current
    /// window is exhausted. A budget of 0 disables throttling.
    pub fn admit(&mut self) -> bool {
        if self.max_per_window == 0 {
            return true;
        }
        let now = Instant::now();
        if now.duration_since(self.window_started_at) >= WINDOW {
            self.window_started_at = now;
            self.count = 0;
        }
        if self.count >= self.max_per_window {
            return false;
        }
        self.count += 1;
        true
    }
}

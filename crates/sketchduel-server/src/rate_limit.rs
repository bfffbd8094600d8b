use std::time::Duration;

use tokio::time::Instant;

/// Per-connection message counter over a fixed window. The window opens on
/// the first message and the count resets once it has fully elapsed.
#[derive(Debug)]
pub struct MessageRateLimiter {
    limit: u32,
    window: Duration,
    count: u32,
    window_start: Option<Instant>,
}

impl MessageRateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            count: 0,
            window_start: None,
        }
    }

    /// Returns `true` if the message is allowed; rejected messages are not
    /// counted.
    pub fn allow(&mut self, now: Instant) -> bool {
        match self.window_start {
            Some(start) if now.saturating_duration_since(start) < self.window => {},
            _ => {
                self.window_start = Some(now);
                self.count = 0;
            },
        }
        if self.count >= self.limit {
            return false;
        }
        self.count += 1;
        true
    }

    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.count)
    }
}

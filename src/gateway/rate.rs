//! Moving-window rate limiting
//!
//! Each remote service gets one limiter: at most `amount` acquisitions in
//! any `window`. Blocked callers wait and re-check on a poll interval rather
//! than queueing, which keeps the limiter fair-enough and trivially correct.

use crate::config::RateLimitConfig;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// The clock-free core of the limiter, testable without waiting.
#[derive(Debug)]
pub struct WindowState {
    amount: usize,
    window: Duration,
    acquisitions: VecDeque<Instant>,
}

impl WindowState {
    pub fn new(amount: u32, window: Duration) -> Self {
        Self {
            amount: amount as usize,
            window,
            acquisitions: VecDeque::with_capacity(amount as usize),
        }
    }

    /// Attempts to take one slot at `now`. Expired acquisitions fall out of
    /// the window first.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        while let Some(&front) = self.acquisitions.front() {
            if now.duration_since(front) >= self.window {
                self.acquisitions.pop_front();
            } else {
                break;
            }
        }

        if self.acquisitions.len() < self.amount {
            self.acquisitions.push_back(now);
            true
        } else {
            false
        }
    }
}

/// An async rate limiter shared by every caller of one service.
#[derive(Debug)]
pub struct RateLimiter {
    state: Mutex<WindowState>,
    poll_interval: Duration,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig, poll_interval: Duration) -> Self {
        Self {
            state: Mutex::new(WindowState::new(
                config.amount,
                Duration::from_secs_f64(config.window_secs),
            )),
            poll_interval,
        }
    }

    /// Blocks until a slot is free. The lock is never held across an await.
    pub async fn acquire(&self) {
        loop {
            let acquired = {
                let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                state.try_acquire(Instant::now())
            };
            if acquired {
                return;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Non-blocking variant, used where a caller would rather skip work than
    /// wait for a slot.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.try_acquire(Instant::now())
    }
}

//! Per-user session admission over a sliding window

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::config::RateLimitConfig;

/// Sliding-window limiter for session starts
///
/// Each user id keeps the instants of its admitted session starts inside the
/// window. The check and the insert happen under one lock acquisition, so two
/// concurrent connects for the same user can never both take the last slot.
#[derive(Debug)]
pub struct SlidingWindowRateLimiter {
    max_sessions: usize,
    window: Duration,
    starts: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl SlidingWindowRateLimiter {
    pub fn new(max_sessions: u32, window: Duration) -> Self {
        Self {
            max_sessions: max_sessions as usize,
            window,
            starts: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.max_sessions, config.window())
    }

    /// Admit a new session for `user_id` at the current instant
    pub fn admit(&self, user_id: &str) -> bool {
        self.admit_at(user_id, Instant::now())
    }

    /// Admit a new session for `user_id` as if it were `now`
    ///
    /// Starts older than the window are evicted first. When the remaining count
    /// is below the limit the start is recorded and `true` is returned; a denied
    /// start is not recorded.
    pub fn admit_at(&self, user_id: &str, now: Instant) -> bool {
        let mut starts = self.starts.lock();
        let window = starts.entry(user_id.to_string()).or_default();

        while let Some(oldest) = window.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() >= self.max_sessions {
            return false;
        }

        window.push_back(now);
        true
    }

    /// Drop users whose every recorded start has aged out
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut starts = self.starts.lock();
        let before = starts.len();
        starts.retain(|_, window| {
            window
                .back()
                .is_some_and(|latest| now.saturating_duration_since(*latest) < self.window)
        });
        before - starts.len()
    }

    /// Number of users currently tracked
    pub fn tracked_users(&self) -> usize {
        self.starts.lock().len()
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

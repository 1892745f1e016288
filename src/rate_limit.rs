//! Per-chat rate limiting. The limiter is consulted before any extraction work happens.

use crate::model::ChatId;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_MAX_REQUESTS: usize = 2;
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(1);

/// Once this many chats are tracked, `record` drops the ones whose windows have expired.
const SWEEP_THRESHOLD: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Limited { retry_after: Duration },
}

/// Decides whether a chat may send another message. Timestamps are supplied by the caller (the
/// message's receipt time), which keeps implementations deterministic.
pub trait RateLimiter: Send + Sync {
    fn check(&self, chat_id: &ChatId, at: DateTime<Utc>) -> RateDecision;

    fn record(&self, chat_id: &ChatId, at: DateTime<Utc>);

    /// Checks and, when allowed, records the message. Implementations shared between tasks
    /// should override this so that both steps happen under one lock.
    fn acquire(&self, chat_id: &ChatId, at: DateTime<Utc>) -> RateDecision {
        let decision = self.check(chat_id, at);
        if decision == RateDecision::Allowed {
            self.record(chat_id, at);
        }
        decision
    }
}

/// An in-process sliding window: at most `max_requests` messages per chat in any `window`.
#[derive(Debug)]
pub struct WindowRateLimiter {
    max_requests: usize,
    window: TimeDelta,
    sweep_threshold: usize,
    seen: Mutex<Seen>,
}

type Seen = HashMap<ChatId, VecDeque<DateTime<Utc>>>;

impl Default for WindowRateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW)
    }
}

impl WindowRateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window: TimeDelta::from_std(window).unwrap_or_else(|_| TimeDelta::days(1)),
            sweep_threshold: SWEEP_THRESHOLD,
            seen: Mutex::new(HashMap::new()),
        }
    }

    fn prune(times: &mut VecDeque<DateTime<Utc>>, cutoff: DateTime<Utc>) {
        while times.front().is_some_and(|t| *t <= cutoff) {
            let _ = times.pop_front();
        }
    }

    fn lock(&self) -> MutexGuard<'_, Seen> {
        match self.seen.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn decide(&self, seen: &mut Seen, chat_id: &ChatId, at: DateTime<Utc>) -> RateDecision {
        let Some(times) = seen.get_mut(chat_id) else {
            return RateDecision::Allowed;
        };
        Self::prune(times, at - self.window);
        if times.is_empty() {
            let _ = seen.remove(chat_id);
            return RateDecision::Allowed;
        }
        if times.len() < self.max_requests {
            return RateDecision::Allowed;
        }
        let oldest = times.front().copied().unwrap_or(at);
        let retry_after = (oldest + self.window - at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        RateDecision::Limited { retry_after }
    }

    fn insert(&self, seen: &mut Seen, chat_id: &ChatId, at: DateTime<Utc>) {
        let cutoff = at - self.window;
        if seen.len() >= self.sweep_threshold {
            seen.retain(|_, times| {
                Self::prune(times, cutoff);
                !times.is_empty()
            });
            debug!(tracked = seen.len(), "Swept expired rate-limit windows");
        }
        let times = seen.entry(chat_id.clone()).or_default();
        Self::prune(times, cutoff);
        times.push_back(at);
    }
}

impl RateLimiter for WindowRateLimiter {
    fn check(&self, chat_id: &ChatId, at: DateTime<Utc>) -> RateDecision {
        self.decide(&mut self.lock(), chat_id, at)
    }

    fn record(&self, chat_id: &ChatId, at: DateTime<Utc>) {
        self.insert(&mut self.lock(), chat_id, at);
    }

    fn acquire(&self, chat_id: &ChatId, at: DateTime<Utc>) -> RateDecision {
        let mut seen = self.lock();
        let decision = self.decide(&mut seen, chat_id, at);
        if decision == RateDecision::Allowed {
            self.insert(&mut seen, chat_id, at);
        }
        decision
    }
}

/// A limiter that allows everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unlimited;

impl RateLimiter for Unlimited {
    fn check(&self, _: &ChatId, _: DateTime<Utc>) -> RateDecision {
        RateDecision::Allowed
    }

    fn record(&self, _: &ChatId, _: DateTime<Utc>) {}
}

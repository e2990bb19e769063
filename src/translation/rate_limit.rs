/*!
 * Rate-limit-aware admission control.
 *
 * One `RateLimiter` is shared by every job in the process. Each call to the
 * translation backend must be admitted first. Admission suspends the caller
 * until the minute window has room, and fails fast once the daily quota is
 * used up.
 */

use std::time::Duration;

use log::debug;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::app_config::RateLimitConfig;
use crate::errors::TranslationError;

const MINUTE: Duration = Duration::from_secs(60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Counters of the current minute and day windows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateWindow {
    pub requests_this_minute: u32,
    pub tokens_this_minute: u64,
    pub requests_today: u32,
    pub minute_started_at: Instant,
    pub day_started_at: Instant,
}

impl RateWindow {
    fn fresh(now: Instant) -> Self {
        Self {
            requests_this_minute: 0,
            tokens_this_minute: 0,
            requests_today: 0,
            minute_started_at: now,
            day_started_at: now,
        }
    }

    fn roll(&mut self, now: Instant) {
        if now.duration_since(self.minute_started_at) >= MINUTE {
            self.requests_this_minute = 0;
            self.tokens_this_minute = 0;
            self.minute_started_at = now;
        }
        if now.duration_since(self.day_started_at) >= DAY {
            self.requests_today = 0;
            self.day_started_at = now;
        }
    }

    // A batch bigger than the whole minute budget still gets an empty window
    fn minute_is_full(&self, limits: &RateLimitConfig, cost: u64) -> bool {
        self.requests_this_minute >= limits.requests_per_minute
            || (self.tokens_this_minute > 0
                && self.tokens_this_minute.saturating_add(cost) > limits.tokens_per_minute)
    }
}

/// Shared admission controller for the translation backend
#[derive(Debug)]
pub struct RateLimiter {
    limits: RateLimitConfig,
    window: Mutex<RateWindow>,
}

impl RateLimiter {
    pub fn new(limits: RateLimitConfig) -> Self {
        Self {
            window: Mutex::new(RateWindow::fresh(Instant::now())),
            limits,
        }
    }

    /// Limiter starting from already consumed counters
    pub fn with_usage(limits: RateLimitConfig, requests_this_minute: u32, tokens_this_minute: u64, requests_today: u32) -> Self {
        let mut window = RateWindow::fresh(Instant::now());
        window.requests_this_minute = requests_this_minute;
        window.tokens_this_minute = tokens_this_minute;
        window.requests_today = requests_today;
        Self { limits, window: Mutex::new(window) }
    }

    pub fn limits(&self) -> &RateLimitConfig {
        &self.limits
    }

    /// Wait until one request costing `cost` tokens fits, then book it.
    ///
    /// Fails immediately with `DailyLimitExceeded` when the day is used up.
    /// The check and the increment happen under the same lock.
    pub async fn admit(&self, cost: u64) -> Result<(), TranslationError> {
        loop {
            let wait = {
                let mut window = self.window.lock().await;
                let now = Instant::now();
                window.roll(now);

                if window.requests_today >= self.limits.requests_per_day {
                    return Err(TranslationError::DailyLimitExceeded {
                        limit: self.limits.requests_per_day,
                    });
                }

                if !window.minute_is_full(&self.limits, cost) {
                    window.requests_this_minute += 1;
                    window.tokens_this_minute = window.tokens_this_minute.saturating_add(cost);
                    window.requests_today += 1;
                    return Ok(());
                }

                (window.minute_started_at + MINUTE).saturating_duration_since(now)
            };

            debug!(
                "Rate window full, waiting {:.1}s before admitting {} tokens",
                wait.as_secs_f64(),
                cost
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Current counters, with expired windows already reset
    pub async fn snapshot(&self) -> RateWindow {
        let mut window = self.window.lock().await;
        window.roll(Instant::now());
        *window
    }

    /// Whether the daily quota is used up for the current day window
    pub async fn daily_quota_exhausted(&self) -> bool {
        self.snapshot().await.requests_today >= self.limits.requests_per_day
    }

    /// Time until the day window rolls over
    pub async fn day_resets_in(&self) -> Duration {
        let window = self.snapshot().await;
        (window.day_started_at + DAY).saturating_duration_since(Instant::now())
    }
}

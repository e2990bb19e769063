/*!
 * Mock translator implementation for testing.
 *
 * This module provides a translator that simulates different behaviors:
 * - `MockTranslator::working()` - Always succeeds with prefixed text
 * - `MockTranslator::fail_times(n)` - Fails transiently `n` times, then succeeds
 * - `MockTranslator::failing()` - Always fails with a transient error
 * - `MockTranslator::permanent()` - Always fails with an authentication error
 *
 * It also backs the `mock` provider in the configuration, where latency and
 * a random failure rate simulate a remote backend.
 */

use async_trait::async_trait;
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::app_config::MockTranslatorConfig;
use crate::errors::ProviderError;
use crate::providers::Translator;

/// Behavior mode for the mock translator
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MockBehavior {
    /// Always succeeds
    Working,
    /// First `n` calls fail with HTTP 503
    FailTimes { n: usize },
    /// Fails every Nth call with HTTP 503
    Intermittent { fail_every: usize },
    /// Always fails with HTTP 503
    Failing,
    /// Always fails with an authentication error
    Permanent,
    /// Returns one text fewer than it was given
    WrongCount,
    /// Simulates slow responses
    Slow { delay_ms: u64 },
}

/// Mock translator; clones share the call counter
#[derive(Debug, Clone)]
pub struct MockTranslator {
    behavior: MockBehavior,
    calls: Arc<AtomicUsize>,
    latency: Duration,
    failure_rate: f64,
}

impl MockTranslator {
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            calls: Arc::new(AtomicUsize::new(0)),
            latency: Duration::ZERO,
            failure_rate: 0.0,
        }
    }

    /// Working translator with the configured latency and failure rate
    pub fn from_config(config: &MockTranslatorConfig) -> Self {
        Self::new(MockBehavior::Working)
            .with_latency(Duration::from_millis(config.latency_ms))
            .with_failure_rate(config.failure_rate)
    }

    pub fn working() -> Self {
        Self::new(MockBehavior::Working)
    }

    pub fn fail_times(n: usize) -> Self {
        Self::new(MockBehavior::FailTimes { n })
    }

    pub fn intermittent(fail_every: usize) -> Self {
        Self::new(MockBehavior::Intermittent { fail_every: fail_every.max(1) })
    }

    pub fn failing() -> Self {
        Self::new(MockBehavior::Failing)
    }

    pub fn permanent() -> Self {
        Self::new(MockBehavior::Permanent)
    }

    pub fn wrong_count() -> Self {
        Self::new(MockBehavior::WrongCount)
    }

    pub fn slow(delay_ms: u64) -> Self {
        Self::new(MockBehavior::Slow { delay_ms })
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_failure_rate(mut self, failure_rate: f64) -> Self {
        self.failure_rate = failure_rate.clamp(0.0, 1.0);
        self
    }

    /// Number of translate calls made so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The text this mock produces for `text`
    pub fn render(text: &str, target_language: &str) -> String {
        text.lines()
            .map(|line| format!("[{}] {}", target_language, line))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn unavailable(call: usize) -> ProviderError {
        ProviderError::ApiError {
            status_code: 503,
            message: format!("Simulated backend failure (call #{})", call),
        }
    }
}

#[async_trait]
impl Translator for MockTranslator {
    async fn translate(&self, texts: &[String], target_language: &str) -> Result<Vec<String>, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.failure_rate > 0.0 && rand::rng().random_bool(self.failure_rate) {
            return Err(Self::unavailable(call));
        }

        let translated = || texts.iter().map(|t| Self::render(t, target_language)).collect::<Vec<_>>();

        match self.behavior {
            MockBehavior::Working => Ok(translated()),
            MockBehavior::FailTimes { n } if call <= n => Err(Self::unavailable(call)),
            MockBehavior::FailTimes { .. } => Ok(translated()),
            MockBehavior::Intermittent { fail_every } if call % fail_every == 0 => Err(Self::unavailable(call)),
            MockBehavior::Intermittent { .. } => Ok(translated()),
            MockBehavior::Failing => Err(Self::unavailable(call)),
            MockBehavior::Permanent => Err(ProviderError::AuthenticationError("Simulated invalid API key".to_string())),
            MockBehavior::WrongCount => {
                let mut out = translated();
                out.pop();
                Ok(out)
            }
            MockBehavior::Slow { delay_ms } => {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                Ok(translated())
            }
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

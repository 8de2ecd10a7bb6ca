//! Call budget and adaptive pacing for one upstream API session.
//!
//! Three layers guard every outbound request:
//!
//! 1. a hard per-session call ceiling,
//! 2. a hard rolling-hour call ceiling,
//! 3. pacing driven by the upstream's self-reported remaining quota.
//!
//! The first two fail with [`RateLimitExceeded`]; the third only ever delays.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

const HOUR: Duration = Duration::from_secs(3600);
/// Upper clamp for the quota-proportional delay.
const MAX_PACED_DELAY: Duration = Duration::from_secs(5);
/// Share of the remaining quota the paced delay plans to spend before reset.
const QUOTA_SPEND_RATIO: f64 = 0.8;
/// Throttle multiplier reached right at the pause threshold.
const MAX_THROTTLE_FACTOR: f64 = 5.0;

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    pub max_calls_per_sync: u32,
    pub max_calls_per_hour: u32,
    pub base_delay: Duration,
    /// Below this remote remaining count, block until the quota resets.
    pub pause_threshold: u32,
    /// Below this remote remaining count, slow down proportionally.
    pub throttle_threshold: u32,
    /// Added to the reset time when pausing.
    pub reset_buffer: Duration,
    /// Pause length when the reset time is unknown.
    pub fallback_pause: Duration,
    pub max_pause: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_calls_per_sync: 2000,
            max_calls_per_hour: 4500,
            base_delay: Duration::from_millis(100),
            pause_threshold: 50,
            throttle_threshold: 500,
            reset_buffer: Duration::from_secs(1),
            fallback_pause: Duration::from_secs(60),
            max_pause: HOUR,
        }
    }
}

impl RateLimiterConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_calls_per_sync: env_or("RATE_LIMIT_MAX_CALLS_PER_SYNC", defaults.max_calls_per_sync),
            max_calls_per_hour: env_or("RATE_LIMIT_MAX_CALLS_PER_HOUR", defaults.max_calls_per_hour),
            base_delay: Duration::from_millis(env_or("RATE_LIMIT_BASE_DELAY_MS", 100u64)),
            pause_threshold: env_or("RATE_LIMIT_PAUSE_THRESHOLD", defaults.pause_threshold),
            throttle_threshold: env_or(
                "RATE_LIMIT_THROTTLE_THRESHOLD",
                defaults.throttle_threshold,
            ),
            ..defaults
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Ceiling {
    Session,
    Hourly,
}

impl fmt::Display for Ceiling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ceiling::Session => f.write_str("per-sync"),
            Ceiling::Hourly => f.write_str("per-hour"),
        }
    }
}

/// A local call ceiling was reached. The current unit of work should give up
/// rather than retry immediately.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("local {ceiling} call ceiling of {limit} reached")]
pub struct RateLimitExceeded {
    pub ceiling: Ceiling,
    pub limit: u32,
}

/// Read-only snapshot for logging.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimitStats {
    pub calls_this_sync: u32,
    pub remaining_this_sync: u32,
    pub calls_this_hour: u32,
    pub remaining_this_hour: u32,
    pub remote_remaining: Option<u32>,
    pub remote_limit: Option<u32>,
    pub remote_reset_at: Option<DateTime<Utc>>,
}

/// What `acquire` does before letting a call through.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Pacing {
    Delay(Duration),
    /// Quota nearly exhausted: wait for the reset, then re-measure.
    Pause(Duration),
}

impl Pacing {
    pub fn duration(&self) -> Duration {
        match self {
            Pacing::Delay(d) | Pacing::Pause(d) => *d,
        }
    }
}

#[derive(Debug)]
struct LimiterState {
    sync_calls: u32,
    hour_calls: u32,
    hour_started: Instant,
    remote_remaining: Option<u32>,
    remote_reset_at: Option<DateTime<Utc>>,
    remote_limit: Option<u32>,
}

impl LimiterState {
    fn roll_hour_window(&mut self) {
        if self.hour_started.elapsed() > HOUR {
            self.hour_calls = 0;
            self.hour_started = Instant::now();
        }
    }
}

/// Owned by one source client for one sync session. Counters live behind a
/// mutex so the limiter can be shared (e.g. in an `Arc`) if scopes are ever
/// processed concurrently.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            state: Mutex::new(LimiterState {
                sync_calls: 0,
                hour_calls: 0,
                hour_started: Instant::now(),
                remote_remaining: None,
                remote_reset_at: None,
                remote_limit: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LimiterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit one outbound call, waiting as long as pacing requires.
    ///
    /// Must be awaited immediately before every request.
    pub async fn acquire(&self) -> Result<(), RateLimitExceeded> {
        let pacing = {
            let mut state = self.lock();
            state.roll_hour_window();

            if state.sync_calls >= self.config.max_calls_per_sync {
                return Err(RateLimitExceeded {
                    ceiling: Ceiling::Session,
                    limit: self.config.max_calls_per_sync,
                });
            }
            if state.hour_calls >= self.config.max_calls_per_hour {
                return Err(RateLimitExceeded {
                    ceiling: Ceiling::Hourly,
                    limit: self.config.max_calls_per_hour,
                });
            }

            let pacing = self.plan(&state, Utc::now());
            state.sync_calls += 1;
            state.hour_calls += 1;
            pacing
        };

        let wait = pacing.duration();
        if wait.is_zero() {
            return Ok(());
        }
        match pacing {
            Pacing::Delay(_) => {
                tracing::debug!(delay_ms = wait.as_millis() as u64, "pacing api call");
                tokio::time::sleep(wait).await;
            }
            Pacing::Pause(_) => {
                tracing::warn!(
                    wait_secs = wait.as_secs(),
                    "remote quota nearly exhausted, pausing until reset"
                );
                tokio::time::sleep(wait).await;
                // Force the next response to re-measure the fresh quota.
                self.lock().remote_remaining = None;
            }
        }
        Ok(())
    }

    /// Decide how long the next call must wait, given the latest telemetry.
    fn plan(&self, state: &LimiterState, now: DateTime<Utc>) -> Pacing {
        let base = self.config.base_delay;
        let Some(remaining) = state.remote_remaining else {
            return Pacing::Delay(base);
        };

        if remaining < self.config.pause_threshold {
            let wait = match state.remote_reset_at {
                Some(reset_at) => {
                    let until_reset = (reset_at - now).to_std().unwrap_or(Duration::ZERO);
                    (until_reset + self.config.reset_buffer).min(self.config.max_pause)
                }
                None => self.config.fallback_pause,
            };
            return Pacing::Pause(wait);
        }

        if remaining < self.config.throttle_threshold {
            let paced = match state.remote_reset_at {
                Some(reset_at) if remaining > 0 => {
                    let until_reset = (reset_at - now).to_std().unwrap_or(Duration::ZERO);
                    let secs = until_reset.as_secs_f64() / (f64::from(remaining) * QUOTA_SPEND_RATIO);
                    Duration::from_secs_f64(secs.min(MAX_PACED_DELAY.as_secs_f64())).max(base)
                }
                Some(_) => MAX_PACED_DELAY.max(base),
                None => base,
            };
            let throttled = base.mul_f64(self.throttle_factor(remaining));
            return Pacing::Delay(paced.max(throttled));
        }

        Pacing::Delay(base)
    }

    /// 1.0 at the throttle threshold rising linearly to 5.0 at the pause threshold.
    fn throttle_factor(&self, remaining: u32) -> f64 {
        let span = self
            .config
            .throttle_threshold
            .saturating_sub(self.config.pause_threshold);
        if span == 0 {
            return 1.0;
        }
        let depth = self.config.throttle_threshold.saturating_sub(remaining).min(span);
        1.0 + (MAX_THROTTLE_FACTOR - 1.0) * f64::from(depth) / f64::from(span)
    }

    /// Merge upstream quota telemetry; absent fields keep their last known value.
    pub fn update_from_response(
        &self,
        remaining: Option<u32>,
        reset_at: Option<DateTime<Utc>>,
        limit: Option<u32>,
    ) {
        let mut state = self.lock();
        if remaining.is_some() {
            state.remote_remaining = remaining;
        }
        if reset_at.is_some() {
            state.remote_reset_at = reset_at;
        }
        if limit.is_some() {
            state.remote_limit = limit;
        }
    }

    /// Zero the per-session counter; `full` also restarts the hourly window.
    pub fn reset(&self, full: bool) {
        let mut state = self.lock();
        state.sync_calls = 0;
        if full {
            state.hour_calls = 0;
            state.hour_started = Instant::now();
        }
    }

    pub fn stats(&self) -> RateLimitStats {
        let state = self.lock();
        RateLimitStats {
            calls_this_sync: state.sync_calls,
            remaining_this_sync: self.config.max_calls_per_sync.saturating_sub(state.sync_calls),
            calls_this_hour: state.hour_calls,
            remaining_this_hour: self.config.max_calls_per_hour.saturating_sub(state.hour_calls),
            remote_remaining: state.remote_remaining,
            remote_limit: state.remote_limit,
            remote_reset_at: state.remote_reset_at,
        }
    }

    #[cfg(test)]
    fn plan_at(&self, now: DateTime<Utc>) -> Pacing {
        self.plan(&self.lock(), now)
    }
}

//! Per-host request pacing.
//!
//! Per-second and per-minute ceilings use governor's keyed limiters, so each
//! host is paced independently. A daily budget is tracked alongside; once a
//! host crosses the proactive threshold of that budget we log a warning and
//! add a growing delay before each request.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use governor::{DefaultKeyedRateLimiter, Quota};
use nonzero_ext::nonzero;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::RateLimitError;

/// Request ceilings applied to every host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub per_second: u32,
    pub per_minute: u32,
    pub per_day: u32,

    /// Fraction of `per_day` after which throttling kicks in (0.0..=1.0)
    pub proactive_threshold: f64,

    /// Extra delay applied when the daily budget is fully used
    pub max_throttle_delay: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_second: 2,
            per_minute: 30,
            per_day: 2_000,
            proactive_threshold: 0.8,
            max_throttle_delay: Duration::from_secs(5),
        }
    }
}

impl RateLimitConfig {
    pub fn with_per_second(mut self, n: u32) -> Self {
        self.per_second = n;
        self
    }

    pub fn with_per_minute(mut self, n: u32) -> Self {
        self.per_minute = n;
        self
    }

    pub fn with_per_day(mut self, n: u32) -> Self {
        self.per_day = n;
        self
    }

    pub fn with_proactive_threshold(mut self, threshold: f64) -> Self {
        self.proactive_threshold = threshold;
        self
    }

    pub fn with_max_throttle_delay(mut self, delay: Duration) -> Self {
        self.max_throttle_delay = delay;
        self
    }
}

/// Daily usage for one host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostUsage {
    pub date: NaiveDate,
    pub requests_today: u32,
    pub daily_limit: u32,
    pub throttling: bool,
}

#[derive(Debug)]
struct DailyCounter {
    date: NaiveDate,
    count: u32,
    warned: bool,
}

impl DailyCounter {
    fn new(date: NaiveDate) -> Self {
        Self {
            date,
            count: 0,
            warned: false,
        }
    }
}

/// Long-lived, shared request pacer.
pub struct RateLimiter {
    config: RateLimitConfig,
    per_second: DefaultKeyedRateLimiter<String>,
    per_minute: DefaultKeyedRateLimiter<String>,
    daily: Mutex<HashMap<String, DailyCounter>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Result<Self, RateLimitError> {
        if !(0.0..=1.0).contains(&config.proactive_threshold) {
            return Err(RateLimitError::InvalidConfig(format!(
                "proactive_threshold must be within 0..=1, got {}",
                config.proactive_threshold
            )));
        }
        if config.per_day == 0 {
            return Err(RateLimitError::InvalidConfig("per_day must be > 0".into()));
        }
        let per_second = NonZeroU32::new(config.per_second).unwrap_or(nonzero!(1u32));
        let per_minute = NonZeroU32::new(config.per_minute).unwrap_or(nonzero!(1u32));

        Ok(Self {
            per_second: governor::RateLimiter::keyed(Quota::per_second(per_second)),
            per_minute: governor::RateLimiter::keyed(Quota::per_minute(per_minute)),
            daily: Mutex::new(HashMap::new()),
            config,
        })
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Host component of a URL, used as the limiter key.
    pub fn host_of(url: &str) -> String {
        url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
            .unwrap_or_else(|| "unknown".to_string())
    }

    /// Wait until a request to `host` is allowed.
    pub async fn acquire(&self, host: &str) -> Result<(), RateLimitError> {
        let throttle = self.count_request(host)?;

        let key = host.to_string();
        self.per_second.until_key_ready(&key).await;
        self.per_minute.until_key_ready(&key).await;

        if let Some(delay) = throttle {
            debug!(host, delay_ms = delay.as_millis() as u64, "Proactive throttle");
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    /// Acquire for the host of `url`.
    pub async fn acquire_for_url(&self, url: &str) -> Result<(), RateLimitError> {
        self.acquire(&Self::host_of(url)).await
    }

    /// Current daily usage for `host`.
    pub fn usage(&self, host: &str) -> HostUsage {
        let today = Utc::now().date_naive();
        let daily = self.daily.lock().unwrap_or_else(PoisonError::into_inner);
        let count = daily
            .get(host)
            .filter(|c| c.date == today)
            .map_or(0, |c| c.count);
        HostUsage {
            date: today,
            requests_today: count,
            daily_limit: self.config.per_day,
            throttling: self.fraction(count) >= self.config.proactive_threshold,
        }
    }

    // Returns the extra delay to apply, if throttling.
    fn count_request(&self, host: &str) -> Result<Option<Duration>, RateLimitError> {
        let today = Utc::now().date_naive();
        let mut daily = self.daily.lock().unwrap_or_else(PoisonError::into_inner);
        let counter = daily
            .entry(host.to_string())
            .or_insert_with(|| DailyCounter::new(today));
        if counter.date != today {
            *counter = DailyCounter::new(today);
        }

        if counter.count >= self.config.per_day {
            return Err(RateLimitError::DailyLimitExceeded {
                host: host.to_string(),
                limit: self.config.per_day,
            });
        }
        counter.count += 1;

        let fraction = self.fraction(counter.count);
        if fraction < self.config.proactive_threshold {
            return Ok(None);
        }
        if !counter.warned {
            counter.warned = true;
            warn!(
                host,
                used = counter.count,
                limit = self.config.per_day,
                "Daily request budget nearly exhausted, throttling"
            );
        }
        Ok(Some(self.throttle_delay(fraction)))
    }

    fn fraction(&self, count: u32) -> f64 {
        f64::from(count) / f64::from(self.config.per_day)
    }

    fn throttle_delay(&self, fraction: f64) -> Duration {
        let threshold = self.config.proactive_threshold;
        let span = (1.0 - threshold).max(f64::EPSILON);
        let overshoot = ((fraction - threshold) / span).clamp(0.0, 1.0);
        self.config.max_throttle_delay.mul_f64(overshoot)
    }
}

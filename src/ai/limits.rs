// Per-provider usage metering - rolling rate and budget counters

//! # Usage Limits
//!
//! Each registered provider carries a meter tracking requests and tokens in
//! the current minute and spend in the current UTC day. The router checks
//! the meter before every call and records actuals after. Counters are
//! advisory: the check and the record are separate steps, so a race between
//! in-flight calls can overshoot a budget by at most one request - the
//! accepted trade-off for not serializing all traffic through one lock.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::sync::Mutex;

/// Configured ceilings for one provider
#[derive(Debug, Clone)]
pub struct ProviderLimits {
    pub requests_per_minute: u32,
    pub tokens_per_minute: u64,
    /// Currency units per UTC day
    pub daily_budget: f64,
}

impl Default for ProviderLimits {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            tokens_per_minute: 100_000,
            daily_budget: 50.0,
        }
    }
}

/// Which ceiling a pre-call check tripped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitExceeded {
    RequestsPerMinute,
    TokensPerMinute,
    DailyBudget,
}

#[derive(Debug)]
struct MeterWindows {
    minute_start: DateTime<Utc>,
    requests_this_minute: u32,
    tokens_this_minute: u64,
    day: NaiveDate,
    cost_today: f64,
}

impl MeterWindows {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            minute_start: now,
            requests_this_minute: 0,
            tokens_this_minute: 0,
            day: now.date_naive(),
            cost_today: 0.0,
        }
    }

    fn roll(&mut self, now: DateTime<Utc>) {
        if (now - self.minute_start).num_seconds() >= 60 {
            self.minute_start = now;
            self.requests_this_minute = 0;
            self.tokens_this_minute = 0;
        }
        if now.date_naive() != self.day {
            self.day = now.date_naive();
            self.cost_today = 0.0;
        }
    }
}

/// Copy of the current counters, for health/ops endpoints
#[derive(Debug, Clone, Serialize)]
pub struct UsageSnapshot {
    pub requests_this_minute: u32,
    pub tokens_this_minute: u64,
    pub cost_today: f64,
}

/// Rolling usage counters for one provider
pub struct UsageMeter {
    windows: Mutex<MeterWindows>,
}

impl UsageMeter {
    pub fn new() -> Self {
        Self {
            windows: Mutex::new(MeterWindows::new(Utc::now())),
        }
    }

    /// Would admitting a call with these estimates break a ceiling?
    pub fn check(
        &self,
        limits: &ProviderLimits,
        estimated_tokens: u64,
        estimated_cost: f64,
        now: DateTime<Utc>,
    ) -> Result<(), LimitExceeded> {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        windows.roll(now);

        if windows.requests_this_minute + 1 > limits.requests_per_minute {
            return Err(LimitExceeded::RequestsPerMinute);
        }
        if windows.tokens_this_minute + estimated_tokens > limits.tokens_per_minute {
            return Err(LimitExceeded::TokensPerMinute);
        }
        if windows.cost_today + estimated_cost > limits.daily_budget {
            return Err(LimitExceeded::DailyBudget);
        }
        Ok(())
    }

    /// Record actuals after a successful call
    pub fn record(&self, tokens: u64, cost: f64, now: DateTime<Utc>) {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        windows.roll(now);
        windows.requests_this_minute += 1;
        windows.tokens_this_minute += tokens;
        windows.cost_today += cost;
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> UsageSnapshot {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        windows.roll(now);
        UsageSnapshot {
            requests_this_minute: windows.requests_this_minute,
            tokens_this_minute: windows.tokens_this_minute,
            cost_today: windows.cost_today,
        }
    }
}

impl Default for UsageMeter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn limits() -> ProviderLimits {
        ProviderLimits {
            requests_per_minute: 2,
            tokens_per_minute: 1_000,
            daily_budget: 1.0,
        }
    }

    #[test]
    fn request_ceiling_trips_after_the_limit() {
        let meter = UsageMeter::new();
        let now = Utc::now();

        assert!(meter.check(&limits(), 10, 0.01, now).is_ok());
        meter.record(10, 0.01, now);
        assert!(meter.check(&limits(), 10, 0.01, now).is_ok());
        meter.record(10, 0.01, now);

        assert_eq!(
            meter.check(&limits(), 10, 0.01, now),
            Err(LimitExceeded::RequestsPerMinute)
        );
    }

    #[test]
    fn minute_window_rolls_over() {
        let meter = UsageMeter::new();
        let now = Utc::now();
        meter.record(10, 0.01, now);
        meter.record(10, 0.01, now);
        assert!(meter.check(&limits(), 10, 0.01, now).is_err());

        let later = now + Duration::seconds(61);
        assert!(meter.check(&limits(), 10, 0.01, later).is_ok());
    }

    #[test]
    fn token_ceiling_accounts_for_the_estimate() {
        let meter = UsageMeter::new();
        let now = Utc::now();
        meter.record(900, 0.01, now);
        assert_eq!(
            meter.check(&limits(), 200, 0.01, now),
            Err(LimitExceeded::TokensPerMinute)
        );
        assert!(meter.check(&limits(), 50, 0.01, now).is_ok());
    }

    #[test]
    fn daily_budget_survives_minute_rollover() {
        let meter = UsageMeter::new();
        let now = Utc::now();
        meter.record(10, 0.95, now);

        let later = now + Duration::seconds(120);
        assert_eq!(
            meter.check(&limits(), 10, 0.1, later),
            Err(LimitExceeded::DailyBudget)
        );

        let snapshot = meter.snapshot(later);
        assert_eq!(snapshot.requests_this_minute, 0);
        assert!((snapshot.cost_today - 0.95).abs() < 1e-9);
    }
}

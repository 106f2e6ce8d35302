//! Per-resource cost accounting against day and month budgets.
//!
//! Costs are tracked in micro-dollars (1 USD = 1,000,000 micro-dollars) so
//! accumulation is exact integer arithmetic; floats appear only at the
//! display boundary. Every key accumulates into two calendar buckets, the
//! current UTC day and the current UTC month. Crossing a bucket boundary
//! resets the accumulated spend while the configured ceilings persist.
//!
//! The `_at` variants take an explicit timestamp; the plain methods use
//! `Utc::now()`. The explicit forms exist for deterministic tests and for
//! replaying recorded traffic, not because callers are expected to supply
//! their own clock in production.

use crate::ResourceKey;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use dashmap::DashMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

fn default_daily_ceiling_micro() -> u64 {
    10_000_000 // $10
}
fn default_monthly_ceiling_micro() -> u64 {
    200_000_000 // $200
}
fn default_warn_ratio() -> f64 {
    0.8
}

/// Static per-key budget configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BudgetConfig {
    /// Hard ceiling for one UTC day, in micro-dollars.
    #[serde(default = "default_daily_ceiling_micro")]
    pub daily_ceiling_micro: u64,
    /// Hard ceiling for one UTC month, in micro-dollars.
    #[serde(default = "default_monthly_ceiling_micro")]
    pub monthly_ceiling_micro: u64,
    /// Fraction of either ceiling at which the verdict turns to warn.
    #[serde(default = "default_warn_ratio")]
    pub warn_ratio: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            daily_ceiling_micro: default_daily_ceiling_micro(),
            monthly_ceiling_micro: default_monthly_ceiling_micro(),
            warn_ratio: default_warn_ratio(),
        }
    }
}

/// Budget check result, in increasing order of severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetVerdict {
    /// Spend is comfortably below every threshold.
    Ok,
    /// Spend passed the warn fraction of a ceiling.
    Warn,
    /// A ceiling is reached; calls must be refused until rollover.
    Exceeded,
}

/// Serialisable view of one key's budget position.
#[derive(Debug, Clone, Serialize)]
pub struct BudgetSnapshot {
    /// Current verdict.
    pub verdict: BudgetVerdict,
    /// Spend accumulated in the current UTC day.
    pub day_spent_micro: u64,
    /// Daily ceiling.
    pub daily_ceiling_micro: u64,
    /// Spend accumulated in the current UTC month.
    pub month_spent_micro: u64,
    /// Monthly ceiling.
    pub monthly_ceiling_micro: u64,
    /// Headroom left today, bounded by both ceilings.
    pub remaining_micro: u64,
}

#[derive(Debug)]
struct SpendState {
    day: NaiveDate,
    day_spent_micro: u64,
    month: (i32, u32),
    month_spent_micro: u64,
}

impl SpendState {
    fn fresh(now: DateTime<Utc>) -> Self {
        let date = now.date_naive();
        Self {
            day: date,
            day_spent_micro: 0,
            month: (date.year(), date.month()),
            month_spent_micro: 0,
        }
    }

    /// Reset any bucket whose calendar period has passed.
    fn roll_over(&mut self, now: DateTime<Utc>) {
        let date = now.date_naive();
        if date != self.day {
            self.day = date;
            self.day_spent_micro = 0;
        }
        let month = (date.year(), date.month());
        if month != self.month {
            self.month = month;
            self.month_spent_micro = 0;
        }
    }
}

/// Accumulates usage cost per resource key and enforces budget ceilings.
///
/// Spend within a bucket is monotonically non-decreasing; only a calendar
/// rollover resets it. All mutation happens under the key's map entry.
pub struct CostTracker {
    states: DashMap<ResourceKey, SpendState>,
    configs: HashMap<ResourceKey, BudgetConfig>,
    default_config: BudgetConfig,
}

impl CostTracker {
    /// Tracker applying `default_config` to every key.
    pub fn new(default_config: BudgetConfig) -> Self {
        Self::with_configs(default_config, HashMap::new())
    }

    /// Tracker with per-key budgets; keys not listed fall back to
    /// `default_config`.
    pub fn with_configs(
        default_config: BudgetConfig,
        configs: HashMap<ResourceKey, BudgetConfig>,
    ) -> Self {
        Self {
            states: DashMap::new(),
            configs,
            default_config,
        }
    }

    fn config_for(&self, key: &ResourceKey) -> BudgetConfig {
        self.configs.get(key).copied().unwrap_or(self.default_config)
    }

    /// Add `amount_micro` to `key`'s current day and month buckets.
    pub fn record_usage(&self, key: &ResourceKey, amount_micro: u64) {
        self.record_usage_at(key, amount_micro, Utc::now());
    }

    /// [`record_usage`](Self::record_usage) at an explicit instant.
    pub fn record_usage_at(&self, key: &ResourceKey, amount_micro: u64, now: DateTime<Utc>) {
        let config = self.config_for(key);
        let mut entry = self
            .states
            .entry(key.clone())
            .or_insert_with(|| SpendState::fresh(now));
        entry.roll_over(now);

        let was_below = entry.day_spent_micro < config.daily_ceiling_micro
            && entry.month_spent_micro < config.monthly_ceiling_micro;

        entry.day_spent_micro = entry.day_spent_micro.saturating_add(amount_micro);
        entry.month_spent_micro = entry.month_spent_micro.saturating_add(amount_micro);

        let now_exceeded = entry.day_spent_micro >= config.daily_ceiling_micro
            || entry.month_spent_micro >= config.monthly_ceiling_micro;
        if was_below && now_exceeded {
            warn!(
                resource = %key,
                day_spent_micro = entry.day_spent_micro,
                month_spent_micro = entry.month_spent_micro,
                "budget ceiling reached"
            );
        } else {
            debug!(
                resource = %key,
                amount_micro,
                day_spent_micro = entry.day_spent_micro,
                "usage recorded"
            );
        }
    }

    /// Verdict for `key`'s current buckets.
    ///
    /// Once a ceiling is reached this stays [`BudgetVerdict::Exceeded`]
    /// until the calendar rolls the bucket over, whether or not any more
    /// usage is recorded.
    pub fn check_budget(&self, key: &ResourceKey) -> BudgetVerdict {
        self.check_budget_at(key, Utc::now())
    }

    /// [`check_budget`](Self::check_budget) at an explicit instant.
    pub fn check_budget_at(&self, key: &ResourceKey, now: DateTime<Utc>) -> BudgetVerdict {
        self.snapshot_at(key, now).verdict
    }

    /// Full budget view for `key`. Unseen keys report zero spend.
    pub fn snapshot(&self, key: &ResourceKey) -> BudgetSnapshot {
        self.snapshot_at(key, Utc::now())
    }

    /// [`snapshot`](Self::snapshot) at an explicit instant.
    pub fn snapshot_at(&self, key: &ResourceKey, now: DateTime<Utc>) -> BudgetSnapshot {
        let config = self.config_for(key);
        let mut entry = self
            .states
            .entry(key.clone())
            .or_insert_with(|| SpendState::fresh(now));
        entry.roll_over(now);

        let day_spent = entry.day_spent_micro;
        let month_spent = entry.month_spent_micro;

        let verdict = if day_spent >= config.daily_ceiling_micro
            || month_spent >= config.monthly_ceiling_micro
        {
            BudgetVerdict::Exceeded
        } else if above_warn(day_spent, config.daily_ceiling_micro, config.warn_ratio)
            || above_warn(month_spent, config.monthly_ceiling_micro, config.warn_ratio)
        {
            BudgetVerdict::Warn
        } else {
            BudgetVerdict::Ok
        };

        let day_headroom = config.daily_ceiling_micro.saturating_sub(day_spent);
        let month_headroom = config.monthly_ceiling_micro.saturating_sub(month_spent);

        BudgetSnapshot {
            verdict,
            day_spent_micro: day_spent,
            daily_ceiling_micro: config.daily_ceiling_micro,
            month_spent_micro: month_spent,
            monthly_ceiling_micro: config.monthly_ceiling_micro,
            remaining_micro: day_headroom.min(month_headroom),
        }
    }
}

fn above_warn(spent: u64, ceiling: u64, warn_ratio: f64) -> bool {
    spent as f64 >= ceiling as f64 * warn_ratio
}

/// Convert micro-dollars to dollars for display.
pub fn micro_to_dollars(micro: u64) -> f64 {
    micro as f64 / 1_000_000.0
}

/// Convert dollars to micro-dollars, saturating at zero for negatives.
pub fn dollars_to_micro(dollars: f64) -> u64 {
    if dollars <= 0.0 {
        0
    } else {
        (dollars * 1_000_000.0) as u64
    }
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn key(name: &str) -> ResourceKey {
        ResourceKey::new(name)
    }

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn tracker(daily: u64, monthly: u64) -> CostTracker {
        CostTracker::new(BudgetConfig {
            daily_ceiling_micro: daily,
            monthly_ceiling_micro: monthly,
            warn_ratio: 0.8,
        })
    }

    #[test]
    fn test_fresh_key_is_ok() {
        let t = tracker(1_000, 10_000);
        assert_eq!(t.check_budget(&key("api")), BudgetVerdict::Ok);
    }

    #[test]
    fn test_verdict_progression_ok_warn_exceeded() {
        let t = tracker(1_000, 1_000_000);
        let k = key("api");
        let now = at(2026, 8, 23, 10);

        t.record_usage_at(&k, 500, now);
        assert_eq!(t.check_budget_at(&k, now), BudgetVerdict::Ok);

        t.record_usage_at(&k, 300, now);
        assert_eq!(
            t.check_budget_at(&k, now),
            BudgetVerdict::Warn,
            "800 of 1000 is at the 0.8 warn line"
        );

        t.record_usage_at(&k, 200, now);
        assert_eq!(t.check_budget_at(&k, now), BudgetVerdict::Exceeded);
    }

    #[test]
    fn test_exceeded_persists_without_further_usage() {
        let t = tracker(1_000, 1_000_000);
        let k = key("api");
        let now = at(2026, 8, 23, 10);
        t.record_usage_at(&k, 1_000, now);

        for hour in 10..14 {
            assert_eq!(
                t.check_budget_at(&k, at(2026, 8, 23, hour)),
                BudgetVerdict::Exceeded,
                "exceeded must persist within the bucket"
            );
        }
    }

    #[test]
    fn test_day_rollover_resets_daily_spend() {
        let t = tracker(1_000, 1_000_000);
        let k = key("api");
        t.record_usage_at(&k, 1_000, at(2026, 8, 23, 10));
        assert_eq!(
            t.check_budget_at(&k, at(2026, 8, 23, 23)),
            BudgetVerdict::Exceeded
        );
        assert_eq!(
            t.check_budget_at(&k, at(2026, 8, 24, 0)),
            BudgetVerdict::Ok,
            "new day, fresh daily bucket"
        );
    }

    #[test]
    fn test_month_bucket_accumulates_across_days() {
        let t = tracker(1_000, 2_500);
        let k = key("api");
        t.record_usage_at(&k, 1_000, at(2026, 8, 20, 10));
        t.record_usage_at(&k, 1_000, at(2026, 8, 21, 10));
        t.record_usage_at(&k, 500, at(2026, 8, 22, 10));
        assert_eq!(
            t.check_budget_at(&k, at(2026, 8, 22, 11)),
            BudgetVerdict::Exceeded,
            "monthly ceiling binds even though today is under the daily"
        );
        assert_eq!(
            t.check_budget_at(&k, at(2026, 9, 1, 0)),
            BudgetVerdict::Ok,
            "month rollover resets the monthly bucket"
        );
    }

    #[test]
    fn test_rollover_preserves_ceiling_config() {
        let t = tracker(1_000, 1_000_000);
        let k = key("api");
        t.record_usage_at(&k, 1_000, at(2026, 8, 23, 10));
        let next_day = at(2026, 8, 24, 10);
        let snap = t.snapshot_at(&k, next_day);
        assert_eq!(snap.daily_ceiling_micro, 1_000);
        assert_eq!(snap.day_spent_micro, 0);
        // Same ceiling still enforced after rollover.
        t.record_usage_at(&k, 1_000, next_day);
        assert_eq!(t.check_budget_at(&k, next_day), BudgetVerdict::Exceeded);
    }

    #[test]
    fn test_keys_are_isolated() {
        let t = tracker(1_000, 1_000_000);
        let now = at(2026, 8, 23, 10);
        t.record_usage_at(&key("busy"), 1_000, now);
        assert_eq!(t.check_budget_at(&key("busy"), now), BudgetVerdict::Exceeded);
        assert_eq!(t.check_budget_at(&key("idle"), now), BudgetVerdict::Ok);
    }

    #[test]
    fn test_spend_is_monotone_within_bucket() {
        let t = tracker(1_000_000, 10_000_000);
        let k = key("api");
        let now = at(2026, 8, 23, 10);
        let mut last = 0;
        for _ in 0..5 {
            t.record_usage_at(&k, 123, now);
            let spent = t.snapshot_at(&k, now).day_spent_micro;
            assert!(spent > last, "spend must grow, {spent} after {last}");
            last = spent;
        }
    }

    #[test]
    fn test_snapshot_remaining_uses_tighter_ceiling() {
        let t = tracker(1_000, 1_500);
        let k = key("api");
        let now = at(2026, 8, 23, 10);
        t.record_usage_at(&k, 600, now);
        let snap = t.snapshot_at(&k, now);
        // Day headroom 400, month headroom 900.
        assert_eq!(snap.remaining_micro, 400);
    }

    #[test]
    fn test_per_key_budget_overrides_default() {
        let mut configs = HashMap::new();
        configs.insert(
            key("cheap"),
            BudgetConfig {
                daily_ceiling_micro: 100,
                monthly_ceiling_micro: 1_000,
                warn_ratio: 0.8,
            },
        );
        let t = CostTracker::with_configs(BudgetConfig::default(), configs);
        let now = at(2026, 8, 23, 10);
        t.record_usage_at(&key("cheap"), 100, now);
        t.record_usage_at(&key("normal"), 100, now);
        assert_eq!(t.check_budget_at(&key("cheap"), now), BudgetVerdict::Exceeded);
        assert_eq!(t.check_budget_at(&key("normal"), now), BudgetVerdict::Ok);
    }

    #[test]
    fn test_dollar_conversions() {
        assert!((micro_to_dollars(2_500_000) - 2.5).abs() < f64::EPSILON);
        assert_eq!(dollars_to_micro(2.5), 2_500_000);
        assert_eq!(dollars_to_micro(-1.0), 0);
        assert_eq!(dollars_to_micro(0.0000004), 0, "sub-micro rounds down");
    }

    #[test]
    fn test_saturating_accumulation_never_overflows() {
        let t = tracker(u64::MAX, u64::MAX);
        let k = key("api");
        let now = at(2026, 8, 23, 10);
        t.record_usage_at(&k, u64::MAX, now);
        t.record_usage_at(&k, u64::MAX, now);
        assert_eq!(t.snapshot_at(&k, now).day_spent_micro, u64::MAX);
    }
}

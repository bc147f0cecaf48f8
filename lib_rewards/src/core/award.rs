//! # Award Calculation
//!
//! Points per accrual tick. Both modes express a daily rate and spread it
//! evenly over the ticks of one day:
//!
//! `award = rate_per_day / (86400 / tick_seconds)`
//!
//! No rounding happens here; the store keeps whatever precision it has.

use std::time::Duration;

use serde::{Deserialize, Serialize};

const SECONDS_PER_DAY: f64 = 86_400.0;

/// One tier: when the online-in-channel count is within `from..=to`, the
/// rate is `value` points per hour.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tier {
    pub from: i64,
    pub to: i64,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AwardPolicy {
    /// Fixed points per 24 hours.
    Flat { points_per_day: f64 },
    /// Hourly rate picked by the online-in-channel count.
    Tiered(Vec<Tier>),
}

impl AwardPolicy {
    /// Points per day for this tick, or `None` when no tier matches.
    pub fn rate_per_day(&self, online_in_channel: usize) -> Option<f64> {
        match self {
            AwardPolicy::Flat { points_per_day } => Some(*points_per_day),
            AwardPolicy::Tiered(tiers) => {
                let count = online_in_channel as i64;
                // Later matches override earlier ones.
                let mut hourly = None;
                for tier in tiers {
                    if count >= tier.from && count <= tier.to {
                        hourly = Some(tier.value);
                    }
                }
                hourly.map(|h| h * 24.0)
            }
        }
    }

    /// Points credited to each eligible identity for one tick.
    pub fn award_per_tick(&self, online_in_channel: usize, tick: Duration) -> f64 {
        match self.rate_per_day(online_in_channel) {
            Some(rate) => rate / (SECONDS_PER_DAY / tick.as_secs_f64()),
            None => {
                tracing::error!(online_in_channel, "no accrual tier matches, award is zero");
                0.0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiers() -> AwardPolicy {
        AwardPolicy::Tiered(vec![
            Tier { from: 0, to: 10, value: 1.0 },
            Tier { from: 11, to: 50, value: 2.0 },
        ])
    }

    #[test]
    fn test_flat_award_matches_formula() {
        let policy = AwardPolicy::Flat { points_per_day: 12.0 };
        for secs in [60u64, 300, 600, 3600, 7] {
            let expected = 12.0 / (86_400.0 / secs as f64);
            assert_eq!(policy.award_per_tick(0, Duration::from_secs(secs)), expected);
        }
    }

    #[test]
    fn test_tier_selection() {
        let policy = tiers();
        assert_eq!(policy.rate_per_day(25), Some(48.0));
        assert_eq!(policy.rate_per_day(5), Some(24.0));
        assert_eq!(policy.rate_per_day(1000), None);
        assert_eq!(policy.award_per_tick(1000, Duration::from_secs(300)), 0.0);
    }

    #[test]
    fn test_tiered_award_uses_same_division() {
        let policy = tiers();
        let tick = Duration::from_secs(3600);
        assert_eq!(policy.award_per_tick(25, tick), 2.0);
        assert_eq!(policy.award_per_tick(5, tick), 1.0);
    }

    #[test]
    fn test_last_matching_tier_wins() {
        let policy = AwardPolicy::Tiered(vec![
            Tier { from: 0, to: 100, value: 1.0 },
            Tier { from: 10, to: 20, value: 3.0 },
        ]);
        assert_eq!(policy.rate_per_day(15), Some(72.0));
        assert_eq!(policy.rate_per_day(50), Some(24.0));
    }
}

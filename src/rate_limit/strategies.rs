//! The three admission algorithms. Each runs with the key's state locked.

use super::store::WindowState;
use super::{Decision, DenyReason, RateLimitRule};
use std::collections::VecDeque;
use std::time::Duration;

pub(crate) const MINUTE_MS: u64 = 60 * 1_000;
pub(crate) const HOUR_MS: u64 = 60 * MINUTE_MS;
pub(crate) const DAY_MS: u64 = 24 * HOUR_MS;

/// Initial state for a fresh fixed-window key.
pub(crate) fn fixed_init(now: u64) -> WindowState {
    WindowState::Fixed { window_start: now, count: 0 }
}

/// Initial state for a fresh token-bucket key: full bucket.
pub(crate) fn bucket_init(rule: &RateLimitRule, now: u64) -> WindowState {
    WindowState::Bucket { tokens: rule.bucket_capacity(), last_refill: now }
}

pub(crate) fn sliding_init() -> WindowState {
    WindowState::Sliding { hits: VecDeque::new() }
}

/// Count accepted hits strictly newer than `now - window`.
fn hits_in_window(hits: &VecDeque<u64>, now: u64, window: u64) -> (usize, Option<u64>) {
    let start = match now.checked_sub(window) {
        Some(cutoff) => hits.partition_point(|&t| t <= cutoff),
        None => 0,
    };
    (hits.len() - start, hits.get(start).copied())
}

/// Sliding window over minute, hour, and day tiers.
pub(crate) fn sliding_window(state: &mut WindowState, rule: &RateLimitRule, now: u64) -> Decision {
    if let WindowState::Sliding { hits } = state {
        return sliding_window_hits(hits, rule, now);
    }
    *state = sliding_init();
    sliding_window(state, rule, now)
}

fn sliding_window_hits(hits: &mut VecDeque<u64>, rule: &RateLimitRule, now: u64) -> Decision {
    if let Some(day_cutoff) = now.checked_sub(DAY_MS) {
        while hits.front().is_some_and(|&t| t <= day_cutoff) {
            hits.pop_front();
        }
    }

    let tiers: [(u64, Option<u32>, fn(u32) -> DenyReason); 3] = [
        (MINUTE_MS, Some(rule.per_minute), |limit| DenyReason::MinuteLimit { limit }),
        (HOUR_MS, rule.per_hour, |limit| DenyReason::HourLimit { limit }),
        (DAY_MS, rule.per_day, |limit| DenyReason::DayLimit { limit }),
    ];

    let mut remaining = u32::MAX;
    for (window, limit, reason) in tiers {
        let Some(limit) = limit else { continue };
        let (count, oldest) = hits_in_window(hits, now, window);
        if count >= limit as usize {
            let retry_after = oldest.map_or(window, |t| (t + window).saturating_sub(now));
            return Decision::Denied {
                retry_after: Duration::from_millis(retry_after),
                reason: reason(limit),
            };
        }
        remaining = remaining.min(limit - count as u32 - 1);
    }

    hits.push_back(now);
    Decision::Allowed { remaining, limit: rule.per_minute }
}

/// Single counter reset once more than a minute has passed since the window opened.
pub(crate) fn fixed_window(state: &mut WindowState, rule: &RateLimitRule, now: u64) -> Decision {
    let WindowState::Fixed { window_start, count } = state else {
        *state = fixed_init(now);
        return fixed_window(state, rule, now);
    };

    if now.saturating_sub(*window_start) > MINUTE_MS {
        *window_start = now;
        *count = 0;
    }

    if *count >= rule.per_minute {
        let elapsed = now.saturating_sub(*window_start);
        return Decision::Denied {
            retry_after: Duration::from_millis(MINUTE_MS.saturating_sub(elapsed)),
            reason: DenyReason::MinuteLimit { limit: rule.per_minute },
        };
    }

    *count += 1;
    Decision::Allowed { remaining: rule.per_minute - *count, limit: rule.per_minute }
}

/// Continuous refill at `per_minute / 60` tokens per second, capped at the burst size.
pub(crate) fn token_bucket(state: &mut WindowState, rule: &RateLimitRule, now: u64) -> Decision {
    let WindowState::Bucket { tokens, last_refill } = state else {
        *state = bucket_init(rule, now);
        return token_bucket(state, rule, now);
    };

    let capacity = rule.bucket_capacity();
    let elapsed_ms = now.saturating_sub(*last_refill) as f64;
    let refill = elapsed_ms * f64::from(rule.per_minute) / MINUTE_MS as f64;
    *tokens = (*tokens + refill).min(capacity);
    // Refill is recorded even when the request is rejected.
    *last_refill = now;

    let cost = f64::from(rule.request_cost);
    if *tokens >= cost {
        *tokens -= cost;
        return Decision::Allowed { remaining: tokens.floor() as u32, limit: capacity as u32 };
    }

    let per_second = f64::from(rule.per_minute) / 60.0;
    let retry_after = if per_second > 0.0 {
        Duration::from_secs_f64((cost - *tokens) / per_second)
    } else {
        Duration::from_millis(MINUTE_MS)
    };
    Decision::Denied { retry_after, reason: DenyReason::TokensExhausted { tokens_remaining: *tokens } }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::Strategy;

    fn rule(per_minute: u32) -> RateLimitRule {
        RateLimitRule::per_minute("/x/*", per_minute)
    }

    #[test]
    fn sliding_reports_time_until_oldest_hit_expires() {
        let rule = rule(2);
        let mut state = sliding_init();
        assert!(sliding_window(&mut state, &rule, 1_000).is_allowed());
        assert!(sliding_window(&mut state, &rule, 11_000).is_allowed());
        match sliding_window(&mut state, &rule, 21_000) {
            Decision::Denied { retry_after, reason } => {
                assert_eq!(retry_after, Duration::from_millis(40_000));
                assert_eq!(reason, DenyReason::MinuteLimit { limit: 2 });
            }
            other => panic!("expected denial, got {:?}", other),
        }
        assert!(sliding_window(&mut state, &rule, 61_001).is_allowed());
    }

    #[test]
    fn sliding_counts_hits_at_time_zero() {
        let rule = rule(1);
        let mut state = sliding_init();
        assert!(sliding_window(&mut state, &rule, 0).is_allowed());
        assert!(!sliding_window(&mut state, &rule, 5).is_allowed());
    }

    #[test]
    fn sliding_hour_tier_reports_hour_limit() {
        let rule = rule(10).per_hour(3);
        let mut state = sliding_init();
        let mut now = DAY_MS;
        for _ in 0..3 {
            assert!(sliding_window(&mut state, &rule, now).is_allowed());
            now += 2 * MINUTE_MS;
        }
        match sliding_window(&mut state, &rule, now) {
            Decision::Denied { retry_after, reason } => {
                assert_eq!(reason, DenyReason::HourLimit { limit: 3 });
                assert_eq!(retry_after, Duration::from_millis(HOUR_MS - 6 * MINUTE_MS));
            }
            other => panic!("expected hour denial, got {:?}", other),
        }
    }

    #[test]
    fn sliding_prunes_hits_older_than_a_day() {
        let rule = rule(100).per_day(100);
        let mut state = sliding_init();
        sliding_window(&mut state, &rule, 0);
        sliding_window(&mut state, &rule, DAY_MS + 1);
        match &state {
            WindowState::Sliding { hits } => assert_eq!(hits.len(), 1),
            other => panic!("unexpected state {:?}", other),
        }
    }

    #[test]
    fn fixed_window_retry_after_counts_down() {
        let rule = rule(1).strategy(Strategy::FixedWindow);
        let mut state = fixed_init(0);
        assert!(fixed_window(&mut state, &rule, 0).is_allowed());
        match fixed_window(&mut state, &rule, 45_000) {
            Decision::Denied { retry_after, .. } => {
                assert_eq!(retry_after, Duration::from_secs(15))
            }
            other => panic!("expected denial, got {:?}", other),
        }
        // Exactly sixty seconds is still inside the window.
        assert!(!fixed_window(&mut state, &rule, 60_000).is_allowed());
        assert!(fixed_window(&mut state, &rule, 60_001).is_allowed());
    }

    #[test]
    fn token_bucket_refills_even_when_rejecting() {
        let rule = rule(60).strategy(Strategy::TokenBucket).burst(1);
        let mut state = bucket_init(&rule, 0);
        assert!(token_bucket(&mut state, &rule, 0).is_allowed());
        assert!(!token_bucket(&mut state, &rule, 500).is_allowed());
        match &state {
            WindowState::Bucket { tokens, last_refill } => {
                assert_eq!(*last_refill, 500);
                assert!((*tokens - 0.5).abs() < 1e-9);
            }
            other => panic!("unexpected state {:?}", other),
        }
        assert!(token_bucket(&mut state, &rule, 1_000).is_allowed());
    }

    #[test]
    fn token_bucket_honors_request_cost() {
        let rule = rule(60).strategy(Strategy::TokenBucket).burst(5).cost(3);
        let mut state = bucket_init(&rule, 0);
        assert!(token_bucket(&mut state, &rule, 0).is_allowed());
        match token_bucket(&mut state, &rule, 0) {
            Decision::Denied { retry_after, reason } => {
                assert_eq!(reason, DenyReason::TokensExhausted { tokens_remaining: 2.0 });
                assert_eq!(retry_after, Duration::from_secs(1));
            }
            other => panic!("expected denial, got {:?}", other),
        }
    }

    #[test]
    fn mismatched_state_is_reset_to_the_rule_strategy() {
        let rule = rule(1).strategy(Strategy::FixedWindow);
        let mut state = sliding_init();
        assert!(fixed_window(&mut state, &rule, 10).is_allowed());
        assert_eq!(state, WindowState::Fixed { window_start: 10, count: 1 });
    }
}

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use switchyard::rate_limit::{Decision, DenyReason, KeyScope, RateLimitRule, RateLimiter, Strategy};
use switchyard::ManualClock;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_checks_never_over_admit() {
    let limiter = Arc::new(RateLimiter::new().with_clock(ManualClock::starting_at(0)));
    let rule = Arc::new(RateLimitRule::per_minute("/api/*", 100));
    let admitted = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..1000)
        .map(|_| {
            let limiter = limiter.clone();
            let rule = rule.clone();
            let admitted = admitted.clone();
            tokio::spawn(async move {
                if limiter.check(&rule, "10.0.0.1").is_allowed() {
                    admitted.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(admitted.load(Ordering::SeqCst), 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_token_bucket_never_over_admits() {
    let limiter = Arc::new(RateLimiter::new().with_clock(ManualClock::starting_at(0)));
    let rule = Arc::new(RateLimitRule::per_minute("/api/*", 50).strategy(Strategy::TokenBucket));
    let admitted = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..500)
        .map(|_| {
            let (limiter, rule, admitted) = (limiter.clone(), rule.clone(), admitted.clone());
            tokio::spawn(async move {
                if limiter.check(&rule, "tenant-a").is_allowed() {
                    admitted.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(admitted.load(Ordering::SeqCst), 50);
}

#[test]
fn sliding_window_hour_tier_reports_its_own_retry_after() {
    let clock = ManualClock::starting_at(0);
    let limiter = RateLimiter::new().with_clock(clock.clone());
    let rule = RateLimitRule::per_minute("/reports", 10).per_hour(3);

    for _ in 0..3 {
        assert!(limiter.check(&rule, "u1").is_allowed());
        clock.advance_secs(120);
    }

    match limiter.check(&rule, "u1") {
        Decision::Denied { retry_after, reason } => {
            assert_eq!(reason, DenyReason::HourLimit { limit: 3 });
            // Oldest hit at t=0, now t=360s: the hour window frees it at t=3600s.
            assert_eq!(retry_after, Duration::from_secs(3600 - 360));
        }
        other => panic!("expected denial, got {other:?}"),
    }
}

#[test]
fn fixed_window_resets_after_a_minute() {
    let clock = ManualClock::starting_at(10_000);
    let limiter = RateLimiter::new().with_clock(clock.clone());
    let rule = RateLimitRule::per_minute("/search", 2).strategy(Strategy::FixedWindow);

    assert!(limiter.check(&rule, "ip").is_allowed());
    assert!(limiter.check(&rule, "ip").is_allowed());
    clock.advance_secs(45);
    match limiter.check(&rule, "ip") {
        Decision::Denied { retry_after, .. } => assert_eq!(retry_after, Duration::from_secs(15)),
        other => panic!("expected denial, got {other:?}"),
    }

    clock.advance_secs(16);
    assert!(limiter.check(&rule, "ip").is_allowed());
}

#[test]
fn token_bucket_refills_over_time() {
    let clock = ManualClock::starting_at(0);
    let limiter = RateLimiter::new().with_clock(clock.clone());
    let rule = RateLimitRule::per_minute("/export", 60).strategy(Strategy::TokenBucket).burst(2);

    assert!(limiter.check(&rule, "k").is_allowed());
    assert!(limiter.check(&rule, "k").is_allowed());
    assert!(!limiter.check(&rule, "k").is_allowed());

    // One token per second.
    clock.advance(1_000);
    assert!(limiter.check(&rule, "k").is_allowed());
    assert!(!limiter.check(&rule, "k").is_allowed());
}

#[test]
fn first_denial_wins_and_earlier_rules_keep_their_slot() {
    let limiter = RateLimiter::new().with_clock(ManualClock::starting_at(0));
    let loose = RateLimitRule::per_minute("/api/*", 100).keyed_by(KeyScope::User);
    let tight = RateLimitRule::per_minute("/api/orders", 1).keyed_by(KeyScope::Route);

    assert!(limiter.check_all([&loose, &tight], "alice").is_ok());
    let rejection = limiter.check_all([&loose, &tight], "alice").unwrap_err();

    assert_eq!(rejection.key, tight.key_for("alice"));
    assert_eq!(
        limiter.check(&loose, "alice"),
        Decision::Allowed { remaining: 97, limit: 100 }
    );
}

#[test]
fn idle_keys_are_evicted() {
    let clock = ManualClock::starting_at(0);
    let limiter = RateLimiter::new().with_clock(clock.clone());
    let rule = RateLimitRule::per_minute("/*", 5);

    limiter.check(&rule, "a");
    clock.advance_secs(30);
    limiter.check(&rule, "b");
    assert_eq!(limiter.tracked_keys(), 2);

    clock.advance_secs(40);
    assert_eq!(limiter.evict_idle(Duration::from_secs(60)), 1);
    assert!(limiter.state(&rule.key_for("a")).is_none());
    assert!(limiter.state(&rule.key_for("b")).is_some());
}

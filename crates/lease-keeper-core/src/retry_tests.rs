//! Tests for the renewal retry policy

use super::*;
use lease_keeper_runtime::codes;

fn throttled() -> QueueError {
    QueueError::from_code("AwsSqs", codes::THROTTLING_EXCEPTION, "Rate exceeded")
}

fn connection_reset() -> QueueError {
    QueueError::ConnectionFailed {
        message: "connection reset".to_string(),
    }
}

#[test]
fn test_default_values() {
    let policy = RenewalRetryPolicy::default();

    assert_eq!(policy.max_attempts, 2);
    assert_eq!(policy.throttle_delay, Duration::from_millis(500));
    assert_eq!(policy.retry_delay, Duration::from_millis(200));
    assert!(!policy.use_jitter);
}

/// Verify the attempt ceiling counts the first attempt
#[test]
fn test_should_retry() {
    let policy = RenewalRetryPolicy::default();

    assert!(policy.should_retry(1));
    assert!(!policy.should_retry(2));
    assert!(!policy.should_retry(3));
}

/// Verify throttling waits longer than other transient errors
#[test]
fn test_delay_depends_on_error_kind() {
    let policy = RenewalRetryPolicy::default();

    assert_eq!(policy.delay_for(&throttled(), 1), Duration::from_millis(500));
    assert_eq!(
        policy.delay_for(&connection_reset(), 1),
        Duration::from_millis(200)
    );
}

/// Verify later retries back off exponentially up to the cap
#[test]
fn test_exponential_backoff_is_capped() {
    let policy = RenewalRetryPolicy {
        max_attempts: 10,
        ..RenewalRetryPolicy::default()
    };

    assert_eq!(
        policy.delay_for(&connection_reset(), 2),
        Duration::from_millis(400)
    );
    assert_eq!(
        policy.delay_for(&connection_reset(), 3),
        Duration::from_millis(800)
    );
    assert_eq!(policy.delay_for(&throttled(), 8), Duration::from_secs(5));
}

/// Verify jitter stays within its range
#[test]
fn test_jitter_range() {
    let policy = RenewalRetryPolicy::default().with_jitter(0.5);

    for _ in 0..100 {
        let delay = policy.delay_for(&throttled(), 1);
        assert!(delay >= Duration::from_millis(250));
        assert!(delay <= Duration::from_millis(750));
    }
}

#[test]
fn test_from_settings() {
    let settings = ExtensionSettings {
        max_attempts: 4,
        throttle_backoff_ms: 1_000,
        retry_backoff_ms: 50,
        ..ExtensionSettings::default()
    };

    let policy = RenewalRetryPolicy::from_settings(&settings);

    assert_eq!(policy.max_attempts, 4);
    assert_eq!(policy.throttle_delay, Duration::from_secs(1));
    assert_eq!(policy.retry_delay, Duration::from_millis(50));
    assert!(!policy.use_jitter);
}

/// Verify a configured jitter reaches the delays
#[test]
fn test_from_settings_with_jitter() {
    let settings = ExtensionSettings {
        retry_jitter_percent: 0.2,
        ..ExtensionSettings::default()
    };

    let policy = RenewalRetryPolicy::from_settings(&settings);

    assert!(policy.use_jitter);
    assert_eq!(policy.jitter_percent, 0.2);
    for _ in 0..100 {
        let delay = policy.delay_for(&connection_reset(), 1);
        assert!(delay >= Duration::from_millis(160));
        assert!(delay <= Duration::from_millis(240));
    }
}

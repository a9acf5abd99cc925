//! Tests for the recovery module

use super::*;
use crate::config::{RecoveryConfig, ReporterConfig, RetryConfig};
use crate::pagination::{FeedFilters, PaginationMode, PaginationState};
use crate::types::FeedItem;
use chrono::Utc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use test_case::test_case;

fn feed(n: usize) -> Vec<FeedItem> {
    (0..n)
        .map(|i| FeedItem::new(format!("p{i}"), format!("post {i}"), Utc::now()))
        .collect()
}

fn ctx(state: &PaginationState, attempt: u32) -> RecoveryContext<'_> {
    RecoveryContext {
        attempt,
        state,
        current_timeout: Duration::from_secs(10),
    }
}

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

// ============================================================================
// Classification Tests
// ============================================================================

#[test_case(FetchError::with_status(401, "nope"), ErrorKind::Network(NetworkSubtype::Unauthorized))]
#[test_case(FetchError::with_status(403, "nope"), ErrorKind::Network(NetworkSubtype::Forbidden))]
#[test_case(FetchError::with_status(429, "slow down"), ErrorKind::Network(NetworkSubtype::RateLimited))]
#[test_case(FetchError::with_status(503, "oops"), ErrorKind::Network(NetworkSubtype::ServerError))]
#[test_case(FetchError::with_status(504, "gateway"), ErrorKind::Network(NetworkSubtype::Timeout))]
#[test_case(FetchError::new("Request timed out after 10s"), ErrorKind::Network(NetworkSubtype::Timeout))]
#[test_case(FetchError::new("connection refused"), ErrorKind::Network(NetworkSubtype::ConnectionFailed))]
#[test_case(FetchError::new("device is offline"), ErrorKind::Network(NetworkSubtype::NetworkUnavailable))]
#[test_case(FetchError::new("Load more already in progress"), ErrorKind::RaceCondition(RaceSubtype::ConcurrentRequest))]
#[test_case(FetchError::new("duplicate request for page 3"), ErrorKind::RaceCondition(RaceSubtype::DuplicateRequest))]
#[test_case(FetchError::new("request queue overflow"), ErrorKind::RaceCondition(RaceSubtype::RequestQueueOverflow))]
#[test_case(FetchError::new("lock timed out"), ErrorKind::RaceCondition(RaceSubtype::ResourceLockTimeout))]
#[test_case(FetchError::new("The user aborted a request"), ErrorKind::RaceCondition(RaceSubtype::OperationCancelled))]
#[test_case(FetchError::new("search index returned garbage"), ErrorKind::State(StateSubtype::SearchStateInvalid))]
#[test_case(FetchError::new("state corrupted"), ErrorKind::State(StateSubtype::StateCorruption))]
#[test_case(FetchError::new("something odd").context("code", "STATE.INCONSISTENT_DATA"), ErrorKind::State(StateSubtype::InconsistentData))]
fn test_classification(raw: FetchError, expected: ErrorKind) {
    let error = ErrorClassifier::new().classify(&raw, 1);
    assert_eq!(error.kind, expected);
    assert_eq!(error.message, raw.message);
    assert_eq!(error.context["attempt"], 1);
}

#[test]
fn test_classification_keeps_status_and_context() {
    let raw = FetchError::with_status(500, "boom").context("request_id", "r-1");
    let error = ErrorClassifier::new().classify(&raw, 2);
    assert_eq!(error.context["status"], 500);
    assert_eq!(error.context["request_id"], "r-1");
    assert_eq!(error.context["attempt"], 2);
    assert!(error.retryable);
}

// ============================================================================
// Recovery Strategy Tests
// ============================================================================

#[test_case(NetworkSubtype::ConnectionFailed, Some(2000))]
#[test_case(NetworkSubtype::NetworkUnavailable, Some(2000))]
#[test_case(NetworkSubtype::Timeout, Some(1000))]
#[test_case(NetworkSubtype::RateLimited, Some(5000))]
#[test_case(NetworkSubtype::Unauthorized, None)]
#[test_case(NetworkSubtype::Forbidden, None)]
fn test_network_table(subtype: NetworkSubtype, delay_ms: Option<u64>) {
    let engine = RecoveryEngine::default();
    let state = PaginationState::new(10);
    let result = engine.recover(&LoadMoreError::network(subtype, "x"), &ctx(&state, 1));

    match delay_ms {
        Some(d) => assert_eq!(result.action, RecoveryAction::Retry { delay: ms(d) }),
        None => assert_eq!(result.action, RecoveryAction::Abort),
    }
    assert!(result.new_state.is_none());
    assert!(!result.message.is_empty());
}

#[test]
fn test_timeout_lengthens_request_timeout() {
    let engine = RecoveryEngine::default();
    let state = PaginationState::new(10);
    let error = LoadMoreError::network(NetworkSubtype::Timeout, "slow");
    let result = engine.recover(&error, &ctx(&state, 1));
    assert_eq!(result.adjusted_timeout, Some(Duration::from_secs(15)));
}

#[test]
fn test_server_error_retry_then_fallback() {
    let engine = RecoveryEngine::default();
    let state = PaginationState::new(10);
    let error = LoadMoreError::network(NetworkSubtype::ServerError, "500");

    let first = engine.recover(&error, &ctx(&state, 1));
    assert_eq!(first.action, RecoveryAction::Retry { delay: ms(3000) });

    let second = engine.recover(&error, &ctx(&state, 2));
    assert_eq!(second.action, RecoveryAction::Fallback);
}

#[test]
fn test_server_error_threshold_is_configurable() {
    let engine = RecoveryEngine::new(RecoveryConfig {
        server_error_retry_threshold: 3,
        ..RecoveryConfig::default()
    });
    let state = PaginationState::new(10);
    let error = LoadMoreError::network(NetworkSubtype::ServerError, "500");

    let second = engine.recover(&error, &ctx(&state, 2));
    assert_eq!(second.action, RecoveryAction::Retry { delay: ms(6000) });
    let third = engine.recover(&error, &ctx(&state, 3));
    assert_eq!(third.action, RecoveryAction::Fallback);
}

#[test_case(StateSubtype::InvalidState)]
#[test_case(StateSubtype::StateCorruption)]
#[test_case(StateSubtype::InconsistentData)]
fn test_state_reset_builds_clean_state(subtype: StateSubtype) {
    let engine = RecoveryEngine::default();
    let mut state = PaginationState::new(10);
    state.all_items = feed(5);
    state.current_page = 3;
    state.recompute();

    let result = engine.recover(&LoadMoreError::state(subtype, "x"), &ctx(&state, 1));
    assert_eq!(result.action, RecoveryAction::Reset);

    let clean = result.new_state.unwrap();
    assert!(clean.all_items.is_empty());
    assert_eq!(clean.current_page, 1);
    assert_eq!(clean.items_per_page, 10);
    assert!(clean.validate().is_valid());
}

#[test]
fn test_invalid_pagination_reset_keeps_items() {
    let engine = RecoveryEngine::default();
    let mut state = PaginationState::new(2);
    state.all_items = feed(5);
    state.current_page = 0;
    state.recompute();

    let error = LoadMoreError::state(StateSubtype::InvalidPaginationState, "x");
    let fixed = engine.recover(&error, &ctx(&state, 1)).new_state.unwrap();
    assert_eq!(fixed.current_page, 1);
    assert_eq!(fixed.all_items.len(), 5);
    assert_eq!(fixed.window_items.len(), 2);
    assert!(fixed.validate().is_valid());
}

#[test_case(StateSubtype::FilterStateMismatch)]
#[test_case(StateSubtype::SearchStateInvalid)]
fn test_search_reset_clears_search_keeps_items(subtype: StateSubtype) {
    let engine = RecoveryEngine::default();
    let mut state = PaginationState::new(10);
    state.all_items = feed(4);
    state.mode = PaginationMode::Client;
    state.search.active = true;
    state.search.results = feed(1);
    state.filters.category = Some("jazz".into());
    state.recompute();

    let fixed = engine
        .recover(&LoadMoreError::state(subtype, "x"), &ctx(&state, 1))
        .new_state
        .unwrap();
    assert!(!fixed.search.active);
    assert_eq!(fixed.filters, FeedFilters::default());
    assert_eq!(fixed.mode, PaginationMode::Server);
    assert_eq!(fixed.all_items.len(), 4);
    assert_eq!(fixed.window_items.len(), 4);
}

#[test_case(RaceSubtype::RequestQueueOverflow, 2000)]
#[test_case(RaceSubtype::StateTransitionConflict, 1000)]
#[test_case(RaceSubtype::ResourceLockTimeout, 1500)]
fn test_race_fixed_delays(subtype: RaceSubtype, delay_ms: u64) {
    let engine = RecoveryEngine::default();
    let state = PaginationState::new(10);
    let result = engine.recover(&LoadMoreError::race(subtype, "x"), &ctx(&state, 1));
    assert_eq!(result.action, RecoveryAction::Retry { delay: ms(delay_ms) });
}

#[test]
fn test_race_duplicate_delay_is_randomized_in_window() {
    let engine = RecoveryEngine::default();
    let state = PaginationState::new(10);
    for subtype in [RaceSubtype::ConcurrentRequest, RaceSubtype::DuplicateRequest] {
        for _ in 0..50 {
            let result = engine.recover(&LoadMoreError::race(subtype, "x"), &ctx(&state, 1));
            let delay = result.action.delay().unwrap();
            assert!(delay >= ms(500) && delay <= ms(1500), "{delay:?}");
        }
    }
}

#[test]
fn test_inverted_race_window_is_normalized() {
    let engine = RecoveryEngine::new(RecoveryConfig {
        race_delay_min_ms: 1500,
        race_delay_max_ms: 500,
        ..RecoveryConfig::default()
    });
    let state = PaginationState::new(10);
    for _ in 0..50 {
        let error = LoadMoreError::race(RaceSubtype::ConcurrentRequest, "x");
        let delay = engine.recover(&error, &ctx(&state, 1)).action.delay().unwrap();
        assert!(delay >= ms(500) && delay <= ms(1500), "{delay:?}");
    }
}

#[test]
fn test_cancellation_aborts_silently() {
    let engine = RecoveryEngine::default();
    let state = PaginationState::new(10);
    let error = LoadMoreError::race(RaceSubtype::OperationCancelled, "user");
    let result = engine.recover(&error, &ctx(&state, 1));
    assert_eq!(result.action, RecoveryAction::Abort);
    assert!(!result.surface_to_user);
}

#[test]
fn test_recovery_result_serializes() {
    let engine = RecoveryEngine::default();
    let state = PaginationState::new(10);
    let error = LoadMoreError::network(NetworkSubtype::Timeout, "slow");
    let json = serde_json::to_value(engine.recover(&error, &ctx(&state, 1))).unwrap();
    assert_eq!(json["action"]["action"], "retry");
    assert_eq!(json["action"]["delay"], 1000);
    assert_eq!(json["adjusted_timeout"], 15000);
}

// ============================================================================
// Retry Scheduler Tests
// ============================================================================

fn scheduler(max_attempts: u32) -> RetryScheduler {
    RetryScheduler::new(
        RetryConfig {
            max_attempts,
            base_delay_ms: 100,
            multiplier: 2.0,
            max_delay_ms: 1000,
            ..RetryConfig::default()
        }
        .without_jitter(),
    )
}

#[test]
fn test_delay_without_jitter_is_exact() {
    let s = scheduler(10);
    assert_eq!(s.delay(1), ms(100));
    assert_eq!(s.delay(2), ms(200));
    assert_eq!(s.delay(3), ms(400));
    assert_eq!(s.delay(4), ms(800));
    assert_eq!(s.delay(5), ms(1000));
    assert_eq!(s.delay(40), ms(1000));
}

#[test]
fn test_delay_is_non_decreasing() {
    let s = scheduler(10);
    let delays: Vec<Duration> = (1..20).map(|n| s.delay(n)).collect();
    assert!(delays.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn test_jitter_stays_within_quarter() {
    let s = RetryScheduler::new(RetryConfig {
        base_delay_ms: 1000,
        ..RetryConfig::default()
    });
    for _ in 0..100 {
        let d = s.delay(1);
        assert!(d >= ms(750) && d <= ms(1250), "{d:?}");
    }
}

#[test]
fn test_is_retryable_rules() {
    let s = scheduler(3);
    let timeout = LoadMoreError::network(NetworkSubtype::Timeout, "x");
    assert!(s.is_retryable(&timeout, 1));
    assert!(s.is_retryable(&timeout, 2));
    assert!(!s.is_retryable(&timeout, 3));

    let flagged_off = timeout.clone().with_retryable(false);
    assert!(!s.is_retryable(&flagged_off, 1));

    let auth = LoadMoreError::network(NetworkSubtype::Unauthorized, "x").with_retryable(true);
    assert!(!s.is_retryable(&auth, 1));
}

#[tokio::test(start_paused = true)]
async fn test_execute_with_retry_succeeds_after_failures() {
    let s = scheduler(3);
    let calls = Arc::new(AtomicU32::new(0));
    let retries = Arc::new(Mutex::new(Vec::new()));

    let c = Arc::clone(&calls);
    let r = Arc::clone(&retries);
    let result = s
        .execute_with_retry(
            |attempt| {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    if attempt < 3 {
                        Err(FetchError::new("connection reset"))
                    } else {
                        Ok("page")
                    }
                }
            },
            |raw, attempt| ErrorClassifier::new().classify(&raw, attempt),
            |_, attempt, delay| r.lock().unwrap().push((attempt, delay)),
        )
        .await;

    assert_eq!(result.unwrap(), "page");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(*retries.lock().unwrap(), vec![(1, ms(100)), (2, ms(200))]);
}

#[tokio::test(start_paused = true)]
async fn test_execute_with_retry_aborts_on_non_retryable() {
    let s = scheduler(5);
    let calls = AtomicU32::new(0);

    let result: Result<(), LoadMoreError> = s
        .execute_with_retry(
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(FetchError::with_status(401, "expired")) }
            },
            |raw, attempt| ErrorClassifier::new().classify(&raw, attempt),
            |_, _, _| panic!("must not retry"),
        )
        .await;

    assert_eq!(
        result.unwrap_err().kind,
        ErrorKind::Network(NetworkSubtype::Unauthorized)
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_execute_with_retry_exhaustion_returns_last_error() {
    let s = scheduler(3);
    let calls = AtomicU32::new(0);

    let result: Result<(), LoadMoreError> = s
        .execute_with_retry(
            |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Err(FetchError::new(format!("timed out #{attempt}"))) }
            },
            |raw, attempt| ErrorClassifier::new().classify(&raw, attempt),
            |_, _, _| {},
        )
        .await;

    let err = result.unwrap_err();
    assert_eq!(err.message, "timed out #3");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

// ============================================================================
// Reporter Tests
// ============================================================================

#[derive(Default)]
struct CountingSink {
    errors: AtomicUsize,
    recoveries: AtomicUsize,
}

impl TelemetrySink for CountingSink {
    fn error_reported(&self, _report: &ErrorReport) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }

    fn recovery_reported(&self, _report: &RecoveryReport) {
        self.recoveries.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_reporter_bounded_history() {
    let reporter = ErrorReporter::default();
    for i in 0..150 {
        reporter.report_error(&LoadMoreError::network(
            NetworkSubtype::Timeout,
            format!("e{i}"),
        ));
    }

    let stats = reporter.get_error_stats();
    assert_eq!(stats.total_errors, 100);
    assert_eq!(stats.recent_trend.len(), 10);

    let recent = reporter.recent_errors(1);
    assert_eq!(recent[0].message, "e149");
    let oldest = reporter.recent_errors(100);
    assert_eq!(oldest[0].message, "e50");
}

#[test]
fn test_reporter_stats() {
    let sink = Arc::new(CountingSink::default());
    let reporter = ErrorReporter::with_sink(ReporterConfig::default(), sink.clone());
    let engine = RecoveryEngine::default();
    let state = PaginationState::new(10);

    let timeout = LoadMoreError::network(NetworkSubtype::Timeout, "slow");
    let auth = LoadMoreError::network(NetworkSubtype::Unauthorized, "401");

    let id1 = reporter.report_error(&timeout);
    let id2 = reporter.report_error(&timeout);
    let id3 = reporter.report_error(&auth);

    reporter.report_recovery(id1, &timeout, &engine.recover(&timeout, &ctx(&state, 1)), true);
    reporter.report_recovery(id2, &timeout, &engine.recover(&timeout, &ctx(&state, 1)), true);
    reporter.report_recovery(id3, &auth, &engine.recover(&auth, &ctx(&state, 1)), false);

    let stats = reporter.get_error_stats();
    assert_eq!(stats.total_errors, 3);
    assert_eq!(stats.errors_by_code["NETWORK.TIMEOUT"], 2);
    assert_eq!(stats.errors_by_code["NETWORK.UNAUTHORIZED"], 1);
    assert!((stats.recovery_success_rate - 2.0 / 3.0).abs() < 1e-9);
    assert_eq!(
        stats
            .recent_trend
            .iter()
            .map(|t| t.recovered)
            .collect::<Vec<_>>(),
        vec![true, true, false]
    );

    assert_eq!(sink.errors.load(Ordering::SeqCst), 3);
    assert_eq!(sink.recoveries.load(Ordering::SeqCst), 3);

    reporter.clear();
    assert_eq!(reporter.get_error_stats(), ErrorStats::default());
}

//! Tests for pagination module

use super::*;
use crate::types::FeedItem;
use chrono::{Duration, TimeZone, Utc};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn items(prefix: &str, n: usize) -> Vec<FeedItem> {
    let base = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
    (0..n)
        .map(|i| {
            FeedItem::new(
                format!("{prefix}-{i}"),
                format!("{prefix} item {i}"),
                base - Duration::minutes(i as i64),
            )
        })
        .collect()
}

fn assert_invariants(state: &PaginationState) {
    assert!(state.window_items.len() <= state.display_items.len());
    assert!(state.display_items.len() <= state.source_items().len());
    assert!(state.current_page >= 1);
    assert!(state.items_per_page >= 1);
    if state.search.active {
        assert_eq!(state.mode, PaginationMode::Client);
    }
}

// ============================================================================
// Construction Tests
// ============================================================================

#[test]
fn test_store_initial_state() {
    let store = PaginationStateStore::new(15);
    let state = store.get_state();

    assert!(state.all_items.is_empty());
    assert!(state.display_items.is_empty());
    assert!(state.window_items.is_empty());
    assert_eq!(state.current_page, 1);
    assert_eq!(state.items_per_page, 15);
    assert_eq!(state.mode, PaginationMode::Server);
    assert!(state.has_more);
    assert!(!state.search.active);
    assert_eq!(store.version(), 0);
}

#[test]
fn test_store_clamps_zero_page_size_at_construction() {
    let store = PaginationStateStore::new(0);
    assert_eq!(store.get_state().items_per_page, 1);
}

// ============================================================================
// update_items Tests
// ============================================================================

#[test]
fn test_update_items_fills_first_window() {
    let store = PaginationStateStore::new(15);
    let state = store.update_items(items("a", 15), false, MetadataPatch::new());

    assert_eq!(state.window_items.len(), 15);
    assert_eq!(state.current_page, 1);
    assert_eq!(state.metadata.loaded_count, 15);
    assert_eq!(state.metadata.filtered_count, 15);
    assert!(state.has_more);
}

#[test]
fn test_update_items_append_advances_page() {
    let store = PaginationStateStore::new(10);
    store.update_items(items("a", 10), false, MetadataPatch::new());
    let state = store.update_items(items("b", 10), false, MetadataPatch::new());

    assert_eq!(state.current_page, 2);
    assert_eq!(state.all_items.len(), 20);
    assert_eq!(state.window_items.len(), 20);
    assert_eq!(state.all_items[10].id, "b-0");
}

#[test]
fn test_update_items_dedupes_by_id() {
    let store = PaginationStateStore::new(10);
    store.update_items(items("a", 5), false, MetadataPatch::new());

    let mut next = items("a", 7);
    next.push(items("a", 1).remove(0));
    let state = store.update_items(next, false, MetadataPatch::new());

    assert_eq!(state.all_items.len(), 7);
}

#[test]
fn test_update_items_reset_replaces() {
    let store = PaginationStateStore::new(5);
    store.update_items(items("a", 5), false, MetadataPatch::new());
    store.update_items(items("b", 5), false, MetadataPatch::new());
    assert_eq!(store.get_state().metadata.pages_loaded, 2);

    let state = store.update_items(items("c", 3), true, MetadataPatch::new());
    assert_eq!(state.current_page, 1);
    assert_eq!(state.all_items.len(), 3);
    assert_eq!(state.all_items[0].id, "c-0");
    assert_eq!(state.metadata.pages_loaded, 1);
}

#[test]
fn test_filter_change_keeps_server_page_count() {
    let store = PaginationStateStore::new(5);
    store.update_items(items("a", 5), false, MetadataPatch::new());
    store.update_items(items("b", 5), false, MetadataPatch::new());

    let state = store.update_filters(FilterPatch::new().sort(SortOrder::Oldest));
    assert_eq!(state.current_page, 1);
    assert_eq!(state.metadata.pages_loaded, 2);

    let state = store.clear_search();
    assert_eq!(state.metadata.pages_loaded, 2);
}

#[test]
fn test_update_items_has_more_from_total() {
    let store = PaginationStateStore::new(5);
    let state = store.update_items(items("a", 5), false, MetadataPatch::new().total(5));
    assert!(!state.has_more);
    assert!(state.metadata.server_exhausted);

    let store = PaginationStateStore::new(5);
    let state = store.update_items(items("a", 5), false, MetadataPatch::new().total(12));
    assert!(state.has_more);
}

#[test]
fn test_update_items_short_page_means_no_more() {
    let store = PaginationStateStore::new(10);
    let state = store.update_items(items("a", 4), false, MetadataPatch::new());
    assert!(!state.has_more);

    let state = store.update_items(Vec::new(), false, MetadataPatch::new().has_more(true));
    assert!(state.has_more);
}

// ============================================================================
// Search Tests
// ============================================================================

#[test]
fn test_search_scenario() {
    let store = PaginationStateStore::new(15);
    let state = store.update_items(items("a", 15), false, MetadataPatch::new());
    assert_eq!(state.window_items.len(), 15);

    let results: Vec<FeedItem> = items("a", 5);
    let state = store.update_search(results, "item", None);

    assert_eq!(state.mode, PaginationMode::Client);
    assert_eq!(state.current_page, 1);
    assert_eq!(state.window_items.len(), 5);
    assert!(state.search.active);
    assert_eq!(state.search.query, "item");
    assert!(!state.has_more);
    assert_invariants(&state);
}

#[test]
fn test_search_always_resets_page() {
    let store = PaginationStateStore::new(2);
    store.update_search(items("s", 6), "q", None);
    let state = store.advance_page();
    assert_eq!(state.current_page, 2);

    let state = store.update_search(items("t", 6), "q2", None);
    assert_eq!(state.current_page, 1);
    assert_eq!(state.window_items.len(), 2);
}

#[test]
fn test_clear_search_restores_server_mode() {
    let store = PaginationStateStore::new(5);
    store.update_items(items("a", 5), false, MetadataPatch::new());
    store.update_filters(FilterPatch::new().category("jazz"));
    store.update_search(items("s", 3), "q", None);

    let state = store.clear_search();
    assert_eq!(state.mode, PaginationMode::Server);
    assert!(!state.search.active);
    assert!(state.search.query.is_empty());
    assert!(state.filters.is_default());
    assert_eq!(state.current_page, 1);
    assert_eq!(state.window_items.len(), 5);
    assert!(state.has_more);
}

#[test]
fn test_clear_search_keeps_exhausted_flag() {
    let store = PaginationStateStore::new(5);
    store.update_items(items("a", 3), false, MetadataPatch::new());
    store.update_search(items("s", 3), "q", None);

    let state = store.clear_search();
    assert!(!state.has_more);
}

// ============================================================================
// Filter Tests
// ============================================================================

#[test]
fn test_update_filters_keeps_mode() {
    let store = PaginationStateStore::new(10);
    let mut feed = items("a", 4);
    feed[0].category = Some("jazz".into());
    feed[2].category = Some("Jazz".into());
    store.update_items(feed, false, MetadataPatch::new());

    let state = store.update_filters(FilterPatch::new().category("jazz"));
    assert_eq!(state.mode, PaginationMode::Server);
    assert_eq!(state.display_items.len(), 2);
    assert_eq!(state.window_items.len(), 2);
    assert_eq!(state.all_items.len(), 4);

    let state = store.update_filters(FilterPatch::new().sort(SortOrder::Oldest));
    assert_eq!(state.filters.category.as_deref(), Some("jazz"));
    assert_eq!(state.display_items[0].id, "a-2");

    let state = store.update_filters(FilterPatch::new().clear_category());
    assert_eq!(state.display_items.len(), 4);
}

#[test]
fn test_filters_apply_to_search_results() {
    let store = PaginationStateStore::new(10);
    let mut results = items("s", 3);
    results[1] = results[1].clone().with_tag("live");

    let state = store.update_search(
        results,
        "q",
        Some(FeedFilters {
            tag: Some("LIVE".into()),
            ..FeedFilters::default()
        }),
    );
    assert_eq!(state.display_items.len(), 1);
    assert_eq!(state.display_items[0].id, "s-1");
}

#[test]
fn test_title_sort() {
    let mut feed = items("a", 3);
    feed[0].title = "zebra".into();
    feed[1].title = "apple".into();
    feed[2].title = "mango".into();
    let filters = FeedFilters {
        sort: SortOrder::Title,
        ..FeedFilters::default()
    };
    let titles: Vec<String> = filters.apply(&feed).into_iter().map(|i| i.title).collect();
    assert_eq!(titles, vec!["apple", "mango", "zebra"]);
}

// ============================================================================
// Client Window Tests
// ============================================================================

#[test]
fn test_advance_page_grows_window_until_exhausted() {
    let store = PaginationStateStore::new(4);
    store.update_search(items("s", 10), "q", None);

    let state = store.advance_page();
    assert_eq!(state.window_items.len(), 8);
    assert!(state.has_more);

    let state = store.advance_page();
    assert_eq!(state.window_items.len(), 10);
    assert_eq!(state.current_page, 3);
    assert!(!state.has_more);

    let state = store.advance_page();
    assert_eq!(state.current_page, 3);
}

// ============================================================================
// Notification Tests
// ============================================================================

#[test]
fn test_exactly_one_notification_per_mutation() {
    let store = PaginationStateStore::new(5);
    let count = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&count);
    let _sub = store.subscribe(move |_| {
        c.fetch_add(1, Ordering::SeqCst);
    });

    store.update_items(items("a", 5), false, MetadataPatch::new());
    store.update_filters(FilterPatch::new().author("x"));
    store.update_search(items("s", 2), "q", None);
    store.clear_search();
    store.set_loading(true);
    store.advance_page();
    store.reset();

    assert_eq!(count.load(Ordering::SeqCst), 7);
    assert_eq!(store.version(), 7);
}

#[test]
fn test_notifications_carry_full_state_in_call_order() {
    let store = PaginationStateStore::new(5);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);
    let _sub = store.subscribe(move |state| {
        s.lock().unwrap().push((state.mode, state.window_items.len()));
    });

    store.update_items(items("a", 5), false, MetadataPatch::new());
    store.update_search(items("s", 2), "q", None);
    store.clear_search();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            (PaginationMode::Server, 5),
            (PaginationMode::Client, 2),
            (PaginationMode::Server, 5),
        ]
    );
}

#[test]
fn test_unsubscribe_stops_delivery() {
    let store = PaginationStateStore::new(5);
    let count = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&count);
    let sub = store.subscribe(move |_| {
        c.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(store.subscriber_count(), 1);

    store.set_loading(true);
    sub.unsubscribe();
    store.set_loading(false);

    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(store.subscriber_count(), 0);
}

#[test]
fn test_listener_may_read_store() {
    let store = PaginationStateStore::new(5);
    let reader = store.clone();
    let pages = Arc::new(Mutex::new(Vec::new()));
    let p = Arc::clone(&pages);
    let _sub = store.subscribe(move |_| {
        p.lock().unwrap().push(reader.get_state().current_page);
    });

    store.update_items(items("a", 5), false, MetadataPatch::new());
    assert_eq!(*pages.lock().unwrap(), vec![1]);
}

#[test]
fn test_listener_may_mutate_store() {
    let store = PaginationStateStore::new(5);
    let writer = store.clone();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);
    let _sub = store.subscribe(move |state| {
        s.lock().unwrap().push((state.all_items.len(), state.is_loading_more));
        if !state.is_loading_more {
            writer.set_loading(true);
        }
    });

    store.update_items(items("a", 5), false, MetadataPatch::new());

    assert_eq!(*seen.lock().unwrap(), vec![(5, false), (5, true)]);
    assert_eq!(store.version(), 2);
}

#[test]
fn test_concurrent_mutations_delivered_in_order() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 25;

    let store = PaginationStateStore::new(5);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);
    let _sub = store.subscribe(move |state| {
        std::thread::yield_now();
        s.lock().unwrap().push(state.all_items.len());
    });

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let store = store.clone();
            std::thread::spawn(move || {
                for i in 0..PER_THREAD {
                    store.update_items(items(&format!("t{t}-{i}"), 1), false, MetadataPatch::new());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let total = THREADS * PER_THREAD;
    let expected: Vec<usize> = (1..=total).collect();
    assert_eq!(*seen.lock().unwrap(), expected);
    assert_eq!(store.version(), total as u64);
}

// ============================================================================
// Validation Tests
// ============================================================================

#[test]
fn test_validate_reports_violations() {
    let store = PaginationStateStore::new(5);
    store.update_items(items("a", 5), false, MetadataPatch::new());
    store.go_to_page(0);
    store.set_items_per_page(0);

    let report = store.validate();
    assert!(!report.is_valid());
    assert!(report.violations.contains(&Violation::ZeroItemsPerPage));
    // set_items_per_page returns to page 1
    assert!(!report
        .violations
        .iter()
        .any(|v| matches!(v, Violation::PageBelowOne { .. })));
}

#[test]
fn test_validate_and_recover_repairs_page() {
    let store = PaginationStateStore::new(5);
    store.update_items(items("a", 5), false, MetadataPatch::new());
    store.go_to_page(0);
    assert!(store
        .validate()
        .violations
        .contains(&Violation::PageBelowOne { current_page: 0 }));

    let before = store.version();
    assert!(!store.validate_and_recover());
    assert_eq!(store.version(), before + 1);

    let state = store.get_state();
    assert_eq!(state.current_page, 1);
    assert_eq!(state.window_items.len(), 5);
    assert!(store.validate().is_valid());
}

#[test]
fn test_validate_and_recover_valid_state_is_silent() {
    let store = PaginationStateStore::new(5);
    store.update_items(items("a", 3), false, MetadataPatch::new());
    let before = store.version();

    assert!(store.validate_and_recover());
    assert_eq!(store.version(), before);
}

#[test]
fn test_validate_and_recover_fixes_restored_garbage() {
    let store = PaginationStateStore::new(5);
    let mut bad = PaginationState::new(0);
    bad.current_page = 0;
    bad.search.active = true;
    bad.search.results = items("s", 3);
    bad.mode = PaginationMode::Server;
    store.restore(bad);

    assert!(!store.validate_and_recover());
    let state = store.get_state();
    assert_eq!(state.items_per_page, 5);
    assert_eq!(state.mode, PaginationMode::Client);
    assert_invariants(&state);
    assert!(store.validate().is_valid());
}

#[test]
fn test_invariants_hold_after_mutation_sequence() {
    let store = PaginationStateStore::new(3);
    let ops: Vec<Box<dyn Fn(&PaginationStateStore)>> = vec![
        Box::new(|s| {
            s.update_items(items("a", 7), false, MetadataPatch::new());
        }),
        Box::new(|s| {
            s.go_to_page(0);
        }),
        Box::new(|s| {
            s.update_search(items("a", 2), "q", None);
        }),
        Box::new(|s| {
            s.set_items_per_page(0);
        }),
        Box::new(|s| {
            s.advance_page();
        }),
        Box::new(|s| {
            s.update_filters(FilterPatch::new().tag("none"));
        }),
        Box::new(|s| {
            s.clear_search();
        }),
        Box::new(|s| {
            s.update_items(items("b", 4), false, MetadataPatch::new());
        }),
    ];

    for op in &ops {
        op(&store);
        store.validate_and_recover();
        let state = store.get_state();
        assert!(state.validate().is_valid(), "{:?}", state.validate());
        assert_invariants(&state);
    }
}

// ============================================================================
// Debug / Reset Tests
// ============================================================================

#[test]
fn test_debug_info() {
    let store = PaginationStateStore::new(5);
    let _sub = store.subscribe(|_| {});
    store.update_items(items("a", 2), false, MetadataPatch::new());

    let info = store.get_debug_info();
    assert_eq!(info.version, 1);
    assert_eq!(info.subscribers, 1);
    assert!(info.validation.is_valid());
    assert_eq!(info.state.all_items.len(), 2);

    let json = serde_json::to_value(&info).unwrap();
    assert_eq!(json["state"]["mode"], "server");
}

#[test]
fn test_reset_restores_defaults() {
    let store = PaginationStateStore::new(7);
    store.update_items(items("a", 7), false, MetadataPatch::new());
    store.update_search(items("s", 2), "q", None);
    store.set_items_per_page(3);

    let state = store.reset();
    assert!(state.all_items.is_empty());
    assert_eq!(state.items_per_page, 7);
    assert_eq!(state.mode, PaginationMode::Server);
    assert!(!state.search.active);
}

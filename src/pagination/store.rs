//! Pagination state store
//!
//! Owns the canonical [`PaginationState`]. Every public mutation takes the
//! state lock once, applies exactly one change and queues its snapshot
//! while still holding the lock. Listeners run after the lock is released,
//! exactly once per mutation and in the order the mutations were applied,
//! even when clones of the store are mutated from several threads.

use super::types::{
    DebugInfo, FeedFilters, FilterPatch, MetadataPatch, PaginationMode, PaginationState,
    SearchState, ValidationReport,
};
use crate::types::{lock, FeedItem};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, warn};

type Listener = Arc<dyn Fn(&PaginationState) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(u64, Listener)>,
}

/// Snapshots waiting for delivery, in mutation order
#[derive(Default)]
struct Outbox {
    queue: VecDeque<(&'static str, u64, PaginationState)>,
    /// A caller is currently delivering the queue
    draining: bool,
}

/// Clears the draining flag if a listener panics mid-delivery
struct DrainGuard<'a> {
    outbox: &'a Mutex<Outbox>,
    armed: bool,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            lock(self.outbox).draining = false;
        }
    }
}

/// Handle returned by [`PaginationStateStore::subscribe`]
#[must_use = "dropping the handle keeps the listener registered; call `unsubscribe` to remove it"]
pub struct Subscription {
    id: u64,
    listeners: Weak<Mutex<Listeners>>,
}

impl Subscription {
    /// Stop receiving notifications
    pub fn unsubscribe(self) {
        if let Some(listeners) = self.listeners.upgrade() {
            lock(&listeners).entries.retain(|(id, _)| *id != self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// Store for the feed's pagination state
pub struct PaginationStateStore {
    state: Arc<Mutex<PaginationState>>,
    listeners: Arc<Mutex<Listeners>>,
    outbox: Arc<Mutex<Outbox>>,
    version: Arc<AtomicU64>,
    default_items_per_page: usize,
}

impl PaginationStateStore {
    /// Create a store with an empty state
    pub fn new(items_per_page: usize) -> Self {
        let items_per_page = items_per_page.max(1);
        Self {
            state: Arc::new(Mutex::new(PaginationState::new(items_per_page))),
            listeners: Arc::new(Mutex::new(Listeners::default())),
            outbox: Arc::new(Mutex::new(Outbox::default())),
            version: Arc::new(AtomicU64::new(0)),
            default_items_per_page: items_per_page,
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Snapshot of the current state
    pub fn get_state(&self) -> PaginationState {
        lock(&self.state).clone()
    }

    /// Current mode
    pub fn mode(&self) -> PaginationMode {
        lock(&self.state).mode
    }

    /// Number of state changes published so far
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Page size new and reset states start with
    pub fn default_items_per_page(&self) -> usize {
        self.default_items_per_page
    }

    /// Check every invariant without changing anything
    pub fn validate(&self) -> ValidationReport {
        lock(&self.state).validate()
    }

    /// State plus validation result
    pub fn get_debug_info(&self) -> DebugInfo {
        let state = self.get_state();
        let validation = state.validate();
        DebugInfo {
            state,
            validation,
            version: self.version(),
            subscribers: self.subscriber_count(),
        }
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    /// Register a listener that receives the full state after each mutation
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&PaginationState) + Send + Sync + 'static,
    {
        let mut listeners = lock(&self.listeners);
        listeners.next_id += 1;
        let id = listeners.next_id;
        listeners.entries.push((id, Arc::new(listener)));
        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    /// Number of registered listeners
    pub fn subscriber_count(&self) -> usize {
        lock(&self.listeners).entries.len()
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Append or replace the loaded items
    pub fn update_items(
        &self,
        new_items: Vec<FeedItem>,
        reset_pagination: bool,
        patch: MetadataPatch,
    ) -> PaginationState {
        self.mutate("update_items", |state| {
            let received = new_items.len();
            let had_items = !state.all_items.is_empty();

            let added = if reset_pagination {
                state.all_items = dedupe(new_items, &HashSet::new());
                state.current_page = 1;
                state.metadata.pages_loaded = usize::from(received > 0);
                state.all_items.len()
            } else {
                if received > 0 {
                    state.metadata.pages_loaded += 1;
                }
                let known: HashSet<String> =
                    state.all_items.iter().map(|i| i.id.clone()).collect();
                let fresh = dedupe(new_items, &known);
                let added = fresh.len();
                state.all_items.extend(fresh);
                if had_items && added > 0 && !state.search.active {
                    state.current_page += 1;
                }
                added
            };

            if let Some(total) = patch.total_server_items {
                state.metadata.total_server_items = Some(total);
            }
            let server_has_more = patch
                .has_more
                .or_else(|| {
                    state
                        .metadata
                        .total_server_items
                        .map(|t| (state.all_items.len() as u64) < t)
                })
                .unwrap_or(received >= state.items_per_page.max(1));
            state.metadata.server_exhausted = !server_has_more;
            if state.mode == PaginationMode::Server {
                state.has_more = server_has_more;
            }

            debug!(received, added, reset_pagination, "Items updated");
            state.recompute();
        })
    }

    /// Show a search result set; switches to client mode on page 1
    pub fn update_search(
        &self,
        results: Vec<FeedItem>,
        query: impl Into<String>,
        filters: Option<FeedFilters>,
    ) -> PaginationState {
        let query = query.into();
        self.mutate("update_search", |state| {
            state.mode = PaginationMode::Client;
            state.search = SearchState {
                active: true,
                query,
                results,
            };
            if let Some(filters) = filters {
                state.filters = filters;
            }
            state.current_page = 1;
            state.recompute();
        })
    }

    /// Leave search; restores server mode, default filters and page 1
    pub fn clear_search(&self) -> PaginationState {
        self.mutate("clear_search", |state| {
            state.mode = PaginationMode::Server;
            state.search = SearchState::default();
            state.filters = FeedFilters::default();
            state.current_page = 1;
            state.has_more = !state.metadata.server_exhausted;
            state.recompute();
        })
    }

    /// Merge filter fields; the mode is left alone
    pub fn update_filters(&self, patch: FilterPatch) -> PaginationState {
        self.mutate("update_filters", |state| {
            state.filters.merge(patch);
            state.current_page = 1;
            state.recompute();
        })
    }

    /// Reveal the next page of already loaded items
    pub fn advance_page(&self) -> PaginationState {
        self.mutate("advance_page", |state| {
            if state.has_hidden_items() {
                state.current_page += 1;
            }
            state.refresh_window();
        })
    }

    /// Jump to a page; out-of-range values are stored and caught by validation
    pub fn go_to_page(&self, page: usize) -> PaginationState {
        self.mutate("go_to_page", |state| {
            state.current_page = page;
            state.refresh_window();
        })
    }

    /// Change the page size and return to page 1
    pub fn set_items_per_page(&self, items_per_page: usize) -> PaginationState {
        self.mutate("set_items_per_page", |state| {
            state.items_per_page = items_per_page;
            state.current_page = 1;
            state.refresh_window();
        })
    }

    /// Flag a load-more as running or settled
    pub fn set_loading(&self, loading: bool) -> PaginationState {
        self.mutate("set_loading", |state| {
            state.is_loading_more = loading;
            state.fetch_in_progress = loading;
        })
    }

    /// Replace the whole state, e.g. with one produced by a recovery strategy
    pub fn restore(&self, new_state: PaginationState) -> PaginationState {
        self.mutate("restore", |state| {
            *state = new_state;
            state.recompute();
        })
    }

    /// Reinitialize to an empty state
    pub fn reset(&self) -> PaginationState {
        let items_per_page = self.default_items_per_page;
        self.mutate("reset", |state| {
            *state = PaginationState::new(items_per_page);
            state.recompute();
        })
    }

    /// Re-check every invariant and repair the state if needed
    ///
    /// Returns whether the state was valid before repair. A notification is
    /// sent only when something was repaired.
    pub fn validate_and_recover(&self) -> bool {
        {
            let mut state = lock(&self.state);
            let report = state.validate();
            if report.is_valid() {
                return true;
            }

            warn!(
                violations = ?report.violations,
                "Pagination state invalid, repairing"
            );
            if state.current_page < 1 {
                state.current_page = 1;
            }
            if state.items_per_page < 1 {
                state.items_per_page = self.default_items_per_page;
            }
            if state.search.active {
                state.mode = PaginationMode::Client;
            }
            state.recompute();
            self.enqueue("validate_and_recover", &state);
        }

        self.deliver();
        false
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn mutate<F>(&self, op: &'static str, f: F) -> PaginationState
    where
        F: FnOnce(&mut PaginationState),
    {
        let snapshot = {
            let mut state = lock(&self.state);
            f(&mut state);
            self.enqueue(op, &state)
        };
        self.deliver();
        snapshot
    }

    /// Number and queue a snapshot; the caller holds the state lock
    fn enqueue(&self, op: &'static str, state: &PaginationState) -> PaginationState {
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        let snapshot = state.clone();
        lock(&self.outbox)
            .queue
            .push_back((op, version, snapshot.clone()));
        snapshot
    }

    /// Deliver queued snapshots unless another caller already is
    ///
    /// A mutation made from inside a listener is queued and delivered by the
    /// outer caller once the current snapshot has reached every listener.
    fn deliver(&self) {
        {
            let mut outbox = lock(&self.outbox);
            if outbox.draining {
                return;
            }
            outbox.draining = true;
        }
        let mut guard = DrainGuard {
            outbox: &self.outbox,
            armed: true,
        };

        loop {
            let (op, version, snapshot) = {
                let mut outbox = lock(&self.outbox);
                match outbox.queue.pop_front() {
                    Some(next) => next,
                    None => {
                        // Cleared under the same lock as the emptiness check
                        outbox.draining = false;
                        guard.armed = false;
                        return;
                    }
                }
            };
            self.publish(op, version, &snapshot);
        }
    }

    fn publish(&self, op: &'static str, version: u64, snapshot: &PaginationState) {
        let listeners: Vec<Listener> = lock(&self.listeners)
            .entries
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();

        debug!(
            op,
            version,
            mode = %snapshot.mode,
            page = snapshot.current_page,
            window = snapshot.window_items.len(),
            listeners = listeners.len(),
            "Pagination state changed"
        );

        for listener in listeners {
            listener(snapshot);
        }
    }
}

impl Default for PaginationStateStore {
    fn default() -> Self {
        Self::new(PaginationState::default().items_per_page)
    }
}

impl Clone for PaginationStateStore {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            listeners: Arc::clone(&self.listeners),
            outbox: Arc::clone(&self.outbox),
            version: Arc::clone(&self.version),
            default_items_per_page: self.default_items_per_page,
        }
    }
}

impl std::fmt::Debug for PaginationStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaginationStateStore")
            .field("version", &self.version())
            .field("subscribers", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}

/// Drop items whose id is already known or repeated within the batch
fn dedupe(items: Vec<FeedItem>, known: &HashSet<String>) -> Vec<FeedItem> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| !known.contains(&item.id) && seen.insert(item.id.clone()))
        .collect()
}

//! Load-more coordination
//!
//! Turns a "load more" intent into at most one in-flight fetch. The state
//! machine is the duplicate-request guard; failures flow through the
//! classifier, the recovery table and the retry scheduler, and the verdict
//! is executed here so callers only ever see a [`LoadMoreResult`].

use super::machine::{LoadMoreState, LoadMoreStateMachine};
use crate::config::FeedConfig;
use crate::network::{NetworkRequestOptimizer, RequestOptions, RequestPriority};
use crate::pagination::{
    FeedFilters, MetadataPatch, PaginationMode, PaginationState, PaginationStateStore,
    ValidationReport, Violation,
};
use crate::recovery::{
    ErrorClassifier, ErrorKind, ErrorReporter, FetchError, LoadMoreError, RaceSubtype,
    RecoveryAction, RecoveryContext, RecoveryEngine, RecoveryResult, RetryScheduler,
    StateSubtype,
};
use crate::types::{lock, FeedItem};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Optimizer specialised to pages of feed items
pub type FeedOptimizer = NetworkRequestOptimizer<Vec<FeedItem>>;

// ============================================================================
// Fetch Collaborator
// ============================================================================

/// Parameters of a single page fetch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageRequest {
    /// 1-based page number
    pub page: usize,
    /// Page size
    pub per_page: usize,
    /// Items already loaded
    pub offset: usize,
    /// Search query, if any
    pub query: Option<String>,
    /// Active filters, for fetchers that filter server-side
    pub filters: FeedFilters,
    /// Deadline for the fetch
    pub timeout: Duration,
}

impl PageRequest {
    /// Request for the server page after the ones `state` already holds
    ///
    /// The page number follows the count of merged server pages, not the
    /// visible-window cursor, which filter and search changes rewind.
    pub fn next_page(state: &PaginationState, timeout: Duration) -> Self {
        Self {
            page: state.metadata.pages_loaded + 1,
            per_page: state.items_per_page.max(1),
            offset: state.all_items.len(),
            query: state.search.active.then(|| state.search.query.clone()),
            filters: state.filters.clone(),
            timeout,
        }
    }

    /// Request for the first page
    pub fn first_page(state: &PaginationState, timeout: Duration) -> Self {
        Self {
            page: 1,
            offset: 0,
            ..Self::next_page(state, timeout)
        }
    }

    /// Key the response is cached under
    pub fn cache_key(&self) -> String {
        match &self.query {
            Some(query) => format!("feed:q={query}:page={}:per={}", self.page, self.per_page),
            None => format!("feed:page={}:per={}", self.page, self.per_page),
        }
    }

    /// Invalidation tags for the cached response
    pub fn cache_tags(&self) -> Vec<String> {
        vec!["feed".to_string(), format!("page:{}", self.page)]
    }
}

/// Fetches one page of items; failures are classified by the coordinator
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(&self, request: &PageRequest) -> Result<Vec<FeedItem>, FetchError>;
}

// ============================================================================
// Results
// ============================================================================

/// How a load-more is served
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadStrategy {
    /// Fetch the next page from the network
    ServerFetch,
    /// Reveal more of the already loaded set
    ClientPaginate,
}

impl LoadStrategy {
    /// Machine state while this strategy runs
    pub fn loading_state(self) -> LoadMoreState {
        match self {
            Self::ServerFetch => LoadMoreState::LoadingServer,
            Self::ClientPaginate => LoadMoreState::LoadingClient,
        }
    }
}

impl fmt::Display for LoadStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ServerFetch => "server-fetch",
            Self::ClientPaginate => "client-paginate",
        })
    }
}

/// Outcome of a load-more or refresh
#[derive(Debug, Clone, Serialize)]
pub struct LoadMoreResult {
    /// Items were loaded (possibly from cache)
    pub success: bool,
    /// Strategy used; `None` when the call was rejected
    pub strategy: Option<LoadStrategy>,
    /// New items made visible or loaded
    pub items_added: usize,
    /// Status or failure message for optional display
    pub message: Option<String>,
    /// Last recovery verdict, if any failure occurred
    pub recovery: Option<RecoveryAction>,
    /// Unrecovered error
    pub error: Option<LoadMoreError>,
    /// Fetch attempts made
    pub attempts: u32,
}

impl LoadMoreResult {
    fn loaded(strategy: LoadStrategy, items_added: usize, attempts: u32) -> Self {
        Self {
            success: true,
            strategy: Some(strategy),
            items_added,
            message: None,
            recovery: None,
            error: None,
            attempts,
        }
    }

    fn rejected(error: LoadMoreError) -> Self {
        Self {
            success: false,
            strategy: None,
            items_added: 0,
            message: Some(error.message.clone()),
            recovery: None,
            error: Some(error),
            attempts: 0,
        }
    }

    fn failed(strategy: LoadStrategy, error: LoadMoreError, recovery: &RecoveryResult, attempts: u32) -> Self {
        Self {
            success: false,
            strategy: Some(strategy),
            items_added: 0,
            message: recovery.surface_to_user.then(|| recovery.message.clone()),
            recovery: Some(recovery.action),
            error: Some(error),
            attempts,
        }
    }

    /// Nothing was loaded, but no error is left for the caller
    pub fn is_settled_without_error(&self) -> bool {
        self.error.is_none()
    }
}

// ============================================================================
// Coordinator
// ============================================================================

/// Orchestrates the store, the state machine and the fetch collaborator
#[derive(Clone)]
pub struct LoadMoreCoordinator {
    store: PaginationStateStore,
    machine: Arc<Mutex<LoadMoreStateMachine>>,
    fetcher: Arc<dyn PageFetcher>,
    optimizer: Option<FeedOptimizer>,
    engine: RecoveryEngine,
    scheduler: RetryScheduler,
    classifier: ErrorClassifier,
    reporter: ErrorReporter,
    default_timeout: Duration,
    cancel: Arc<Notify>,
    cancel_epoch: Arc<AtomicU64>,
}

impl LoadMoreCoordinator {
    /// Create a coordinator with default settings
    pub fn new(store: PaginationStateStore, fetcher: Arc<dyn PageFetcher>) -> Self {
        Self::from_config(&FeedConfig::default(), store, fetcher)
    }

    /// Create a coordinator from configuration
    pub fn from_config(
        config: &FeedConfig,
        store: PaginationStateStore,
        fetcher: Arc<dyn PageFetcher>,
    ) -> Self {
        Self {
            store,
            machine: Arc::new(Mutex::new(LoadMoreStateMachine::new())),
            fetcher,
            optimizer: None,
            engine: RecoveryEngine::new(config.recovery.clone()),
            scheduler: RetryScheduler::new(config.retry.clone()),
            classifier: ErrorClassifier::new(),
            reporter: ErrorReporter::new(config.reporter.clone()),
            default_timeout: config.optimizer.default_timeout(),
            cancel: Arc::new(Notify::new()),
            cancel_epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Route fetches through `optimizer` (batching, caching, fallback)
    #[must_use]
    pub fn with_optimizer(mut self, optimizer: FeedOptimizer) -> Self {
        self.default_timeout = optimizer.config().default_timeout();
        self.optimizer = Some(optimizer);
        self
    }

    /// Report into a shared reporter
    #[must_use]
    pub fn with_reporter(mut self, reporter: ErrorReporter) -> Self {
        self.reporter = reporter;
        self
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// The state store
    pub fn store(&self) -> &PaginationStateStore {
        &self.store
    }

    /// The error reporter
    pub fn reporter(&self) -> &ErrorReporter {
        &self.reporter
    }

    /// The optimizer, when one is attached
    pub fn optimizer(&self) -> Option<&FeedOptimizer> {
        self.optimizer.as_ref()
    }

    /// Current machine state
    pub fn state(&self) -> LoadMoreState {
        lock(&self.machine).state()
    }

    /// Whether a load is in flight
    pub fn is_loading(&self) -> bool {
        lock(&self.machine).is_loading()
    }

    /// Whether a new load would be admitted
    pub fn can_load_more(&self) -> bool {
        lock(&self.machine).can_load_more()
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Strategy implied by the pagination mode
    pub fn determine_strategy(&self) -> LoadStrategy {
        match self.store.mode() {
            PaginationMode::Server => LoadStrategy::ServerFetch,
            PaginationMode::Client => LoadStrategy::ClientPaginate,
        }
    }

    /// Check the store's invariants, repairing the state if any fail
    ///
    /// Returns the report taken before repair.
    pub fn validate_state(&self) -> ValidationReport {
        let report = self.store.validate();
        if !report.is_valid() {
            let error = LoadMoreError::state(
                state_subtype(&report),
                format!("Invalid pagination state: {} violation(s)", report.violations.len()),
            )
            .with_context("violations", report.violations.iter().map(ToString::to_string).collect::<Vec<_>>());
            self.reporter.report_error(&error);
            self.store.validate_and_recover();
        }
        report
    }

    /// Load the next page, or reveal more of the loaded set
    ///
    /// A call made while another load is in flight is rejected immediately
    /// with an "already in progress" failure and never reaches the network.
    pub async fn handle_load_more(&self) -> LoadMoreResult {
        let strategy = self.determine_strategy();
        if let Err(rejection) = self.admit(strategy.loading_state()) {
            return rejection;
        }

        self.validate_state();
        let epoch = self.cancel_epoch.load(Ordering::SeqCst);

        let result = match strategy {
            LoadStrategy::ClientPaginate => self.paginate_client(),
            LoadStrategy::ServerFetch => self.fetch_server(epoch).await,
        };

        self.settle(&result);
        result
    }

    /// Reload the first page, replacing the loaded items
    ///
    /// Failures go through the same recovery verdicts as a load-more; a
    /// fallback serves the cached first page in place of the loaded items.
    pub async fn refresh(&self) -> LoadMoreResult {
        if let Err(rejection) = self.admit(LoadMoreState::LoadingServer) {
            return rejection;
        }

        self.validate_state();
        let epoch = self.cancel_epoch.load(Ordering::SeqCst);
        let snapshot = self.store.get_state();
        let request = PageRequest::first_page(&snapshot, self.request_timeout(&snapshot));

        let result = self.fetch_with_recovery(request, epoch, true).await;
        self.settle(&result);
        result
    }

    /// Abort the in-flight fetch or backoff, if any
    ///
    /// The load settles as a silent `RACE.OPERATION_CANCELLED` abort.
    /// Returns whether a load was in flight.
    pub fn cancel(&self) -> bool {
        let loading = self.is_loading();
        self.cancel_epoch.fetch_add(1, Ordering::SeqCst);
        self.cancel.notify_waiters();
        if loading {
            info!("Load more cancelled");
        }
        loading
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Atomically check the guard and enter the loading state
    fn admit(&self, target: LoadMoreState) -> Result<(), LoadMoreResult> {
        let refused = {
            let mut machine = lock(&self.machine);
            if !machine.can_load_more() {
                Some(LoadMoreError::race(
                    RaceSubtype::ConcurrentRequest,
                    "Load more already in progress",
                ))
            } else {
                machine.transition(target).err().map(|e| {
                    LoadMoreError::race(RaceSubtype::StateTransitionConflict, e.to_string())
                })
            }
        };

        match refused {
            Some(error) => {
                debug!(code = %error.kind, "Load more rejected");
                self.reporter.report_error(&error);
                Err(LoadMoreResult::rejected(error))
            }
            None => Ok(()),
        }
    }

    /// Move the machine to its terminal state for `result`
    fn settle(&self, result: &LoadMoreResult) {
        let terminal = if result.is_settled_without_error() {
            LoadMoreState::Complete
        } else {
            LoadMoreState::Error
        };
        if let Err(e) = lock(&self.machine).transition(terminal) {
            warn!(error = %e, "Could not settle load-more state machine");
        }
    }

    fn paginate_client(&self) -> LoadMoreResult {
        let before = self.store.get_state().window_items.len();
        let state = self.store.advance_page();
        let added = state.window_items.len().saturating_sub(before);
        debug!(added, page = state.current_page, "Client page revealed");
        LoadMoreResult::loaded(LoadStrategy::ClientPaginate, added, 0)
    }

    async fn fetch_server(&self, epoch: u64) -> LoadMoreResult {
        let snapshot = self.store.get_state();
        if !snapshot.has_more {
            debug!("No more items on the server");
            return LoadMoreResult::loaded(LoadStrategy::ServerFetch, 0, 0);
        }

        let request = PageRequest::next_page(&snapshot, self.request_timeout(&snapshot));
        self.fetch_with_recovery(request, epoch, false).await
    }

    /// Fetch `request`, executing recovery verdicts until the load settles
    ///
    /// With `replace`, a fetched page replaces the loaded items and every
    /// cached feed page instead of being appended.
    async fn fetch_with_recovery(
        &self,
        mut request: PageRequest,
        epoch: u64,
        replace: bool,
    ) -> LoadMoreResult {
        self.store.set_loading(true);

        let mut retried: Vec<(u64, LoadMoreError, RecoveryResult)> = Vec::new();
        let mut attempt = 1;
        let result = loop {
            let started = Instant::now();
            let raw = match self.fetch_once(&request, epoch).await {
                Ok(items) => {
                    if let Some(optimizer) = &self.optimizer {
                        optimizer.record_response_time(started.elapsed());
                        if replace {
                            optimizer.invalidate_cache(&["feed"]);
                        }
                        optimizer.cache_response(request.cache_key(), items.clone(), request.cache_tags());
                    }
                    let added = self.merge_items(items, replace);
                    info!(page = request.page, added, attempt, replace, "Page loaded");
                    break LoadMoreResult::loaded(LoadStrategy::ServerFetch, added, attempt);
                }
                Err(raw) => raw,
            };

            let error = self.classifier.classify(&raw, attempt);
            let error_id = self.reporter.report_error(&error);
            let recovery = self.engine.recover(
                &error,
                &RecoveryContext {
                    attempt,
                    state: &self.store.get_state(),
                    current_timeout: request.timeout,
                },
            );

            match recovery.action {
                RecoveryAction::Retry { delay } if self.scheduler.is_retryable(&error, attempt) => {
                    let wait = delay.max(self.scheduler.delay(attempt));
                    warn!(
                        "{} on page {}, attempt {}/{}, retrying in {:?}",
                        error.kind,
                        request.page,
                        attempt,
                        self.scheduler.max_attempts(),
                        wait
                    );
                    if let Some(timeout) = recovery.adjusted_timeout {
                        request.timeout = timeout;
                    }
                    retried.push((error_id, error, recovery));
                    // A cancel during backoff surfaces on the next attempt
                    let _ = self.unless_cancelled(epoch, tokio::time::sleep(wait)).await;
                    attempt += 1;
                }
                _ => break self.execute_verdict(&request, error, error_id, &recovery, attempt, replace),
            }
        };

        self.store.set_loading(false);
        for (id, error, recovery) in &retried {
            self.reporter.report_recovery(*id, error, recovery, result.success);
        }
        result
    }

    /// Carry out a non-retry verdict (or a retry the scheduler refused)
    fn execute_verdict(
        &self,
        request: &PageRequest,
        error: LoadMoreError,
        error_id: u64,
        recovery: &RecoveryResult,
        attempts: u32,
        replace: bool,
    ) -> LoadMoreResult {
        let strategy = LoadStrategy::ServerFetch;
        match recovery.action {
            RecoveryAction::Reset => {
                if let Some(state) = recovery.new_state.clone() {
                    self.store.restore(state);
                }
                self.reporter.report_recovery(error_id, &error, recovery, true);
                LoadMoreResult {
                    success: false,
                    strategy: Some(strategy),
                    items_added: 0,
                    message: Some(recovery.message.clone()),
                    recovery: Some(recovery.action),
                    error: None,
                    attempts,
                }
            }
            RecoveryAction::Fallback => {
                let cached = self
                    .optimizer
                    .as_ref()
                    .and_then(|o| o.get_cached_response(&request.cache_key()));
                match cached {
                    Some(items) => {
                        let added = self.merge_items(items, replace);
                        info!(page = request.page, added, "Served cached page after failure");
                        self.reporter.report_recovery(error_id, &error, recovery, true);
                        LoadMoreResult {
                            success: true,
                            strategy: Some(strategy),
                            items_added: added,
                            message: Some(recovery.message.clone()),
                            recovery: Some(recovery.action),
                            error: None,
                            attempts,
                        }
                    }
                    None => {
                        warn!(page = request.page, "No cached page to fall back to");
                        self.reporter.report_recovery(error_id, &error, recovery, false);
                        LoadMoreResult::failed(strategy, error, recovery, attempts)
                    }
                }
            }
            RecoveryAction::Retry { .. } => {
                warn!(code = %error.kind, attempts, "Retries exhausted");
                self.reporter.report_recovery(error_id, &error, recovery, false);
                let mut result = LoadMoreResult::failed(strategy, error, recovery, attempts);
                result.message = Some(format!("Could not load more after {attempts} attempt(s)"));
                result
            }
            RecoveryAction::Abort => {
                self.reporter.report_recovery(error_id, &error, recovery, false);
                LoadMoreResult::failed(strategy, error, recovery, attempts)
            }
        }
    }

    /// Append fetched items, or replace them all; returns how many were new
    fn merge_items(&self, items: Vec<FeedItem>, replace: bool) -> usize {
        if replace {
            return self
                .store
                .update_items(items, true, MetadataPatch::new())
                .all_items
                .len();
        }
        let before = self.store.get_state().all_items.len();
        let state = self.store.update_items(items, false, MetadataPatch::new());
        state.all_items.len().saturating_sub(before)
    }

    /// Timeout for the next request, adapted to the network when possible
    fn request_timeout(&self, state: &PaginationState) -> Duration {
        let Some(optimizer) = &self.optimizer else {
            return self.default_timeout;
        };
        let key = PageRequest::next_page(state, self.default_timeout).cache_key();
        optimizer
            .adapt_request_to_network(RequestOptions::new(key).priority(RequestPriority::High))
            .and_then(|o| o.timeout)
            .unwrap_or(self.default_timeout)
    }

    /// One fetch attempt, bounded by the request timeout and cancellation
    async fn fetch_once(&self, request: &PageRequest, epoch: u64) -> Result<Vec<FeedItem>, FetchError> {
        let fetch = tokio::time::timeout(request.timeout, self.dispatch(request));
        match self.unless_cancelled(epoch, fetch).await {
            Some(Ok(result)) => result,
            Some(Err(_)) => Err(FetchError::new(format!(
                "Request timed out after {:?}",
                request.timeout
            ))),
            None => Err(FetchError::new("Load more cancelled").context(
                "code",
                ErrorKind::RaceCondition(RaceSubtype::OperationCancelled).code(),
            )),
        }
    }

    async fn dispatch(&self, request: &PageRequest) -> Result<Vec<FeedItem>, FetchError> {
        match &self.optimizer {
            Some(optimizer) => {
                let fetcher = Arc::clone(&self.fetcher);
                let request = request.clone();
                optimizer
                    .batch_request(move || async move { fetcher.fetch_page(&request).await })
                    .await
            }
            None => self.fetcher.fetch_page(request).await,
        }
    }

    /// Run `fut` unless the load started at `epoch` is cancelled first
    async fn unless_cancelled<F: Future>(&self, epoch: u64, fut: F) -> Option<F::Output> {
        let cancelled = self.cancel.notified();
        tokio::pin!(cancelled);
        cancelled.as_mut().enable();
        if self.cancel_epoch.load(Ordering::SeqCst) != epoch {
            return None;
        }

        tokio::select! {
            output = fut => Some(output),
            () = &mut cancelled => None,
        }
    }
}

impl fmt::Debug for LoadMoreCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadMoreCoordinator")
            .field("state", &self.state())
            .field("store", &self.store)
            .field("optimizer", &self.optimizer.is_some())
            .finish_non_exhaustive()
    }
}

/// State subtype that best describes a failed validation
fn state_subtype(report: &ValidationReport) -> StateSubtype {
    let mut subtype = StateSubtype::InconsistentData;
    for violation in &report.violations {
        match violation {
            Violation::PageBelowOne { .. } | Violation::ZeroItemsPerPage => {
                return StateSubtype::InvalidPaginationState;
            }
            Violation::SearchOutsideClientMode => subtype = StateSubtype::SearchStateInvalid,
            _ => {}
        }
    }
    subtype
}

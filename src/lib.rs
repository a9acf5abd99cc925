// Allow common clippy pedantic lints that aren't critical for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::ref_option)]
#![allow(clippy::unused_self)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::unnecessary_wraps)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::match_wildcard_for_single_variants)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::unused_async)]

//! # feedkit
//!
//! Data-access core for paginated content feeds: pagination state with two
//! retrieval modes, a guarded load-more cycle, error classification with
//! table-driven recovery, and a request optimizer.
//!
//! ## Features
//!
//! - **Pagination State**: server-paged and client-windowed modes, search and
//!   filters, invariant checking with repair, exactly-once change notifications
//! - **Load-More Guard**: a finite state machine that never lets two loads run
//! - **Recovery**: network, state and race-condition errors each map to a
//!   retry, reset, fallback or abort verdict
//! - **Backoff**: exponential delays with jitter and bounded attempts
//! - **Request Optimizer**: batching, TTL + LRU caching with tag invalidation,
//!   throttled prefetching, RTT-adaptive timeouts
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use feedkit::{LoadMoreCoordinator, NetworkRequestOptimizer, PaginationStateStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = PaginationStateStore::new(15);
//!     let _sub = store.subscribe(|state| println!("{} visible", state.window_items.len()));
//!
//!     let coordinator = LoadMoreCoordinator::new(store, Arc::new(MyApiFetcher::new()))
//!         .with_optimizer(NetworkRequestOptimizer::default());
//!
//!     let result = coordinator.handle_load_more().await;
//!     if let Some(message) = result.message {
//!         println!("{message}");
//!     }
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      LoadMoreCoordinator                        │
//! │  handle_load_more()   refresh()   cancel()   validate_state()   │
//! └─────────────────────────────────────────────────────────────────┘
//!                                │
//! ┌──────────────┬───────────────┴──┬──────────────────┬────────────┐
//! │  Pagination  │    Load More     │     Recovery     │  Network   │
//! ├──────────────┼──────────────────┼──────────────────┼────────────┤
//! │ State Store  │ State Machine    │ Classifier       │ Batching   │
//! │ Search       │ PageFetcher      │ Strategy Table   │ TTL/LRU    │
//! │ Filters      │                  │ Retry Backoff    │ Prefetch   │
//! │ Validation   │                  │ Reporter         │ RTT Adapt  │
//! └──────────────┴──────────────────┴──────────────────┴────────────┘
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

// ============================================================================
// Module declarations
// ============================================================================

/// Error types
pub mod error;

/// Common types and type aliases
pub mod types;

/// Configuration loading
pub mod config;

/// Pagination state and store
pub mod pagination;

/// Load-more state machine and coordinator
pub mod load_more;

/// Error taxonomy, recovery, retry and reporting
pub mod recovery;

/// Request batching, caching and prefetching
pub mod network;

// ============================================================================
// Re-exports
// ============================================================================

pub use error::{Error, Result};
pub use types::*;

// Re-export commonly used types
pub use config::{load_config, load_config_from_str, FeedConfig};
pub use load_more::{
    LoadMoreCoordinator, LoadMoreResult, LoadMoreState, LoadMoreStateMachine, LoadStrategy,
    PageFetcher, PageRequest,
};
pub use network::NetworkRequestOptimizer;
pub use pagination::{PaginationMode, PaginationState, PaginationStateStore};
pub use recovery::{ErrorKind, ErrorReporter, FetchError, LoadMoreError, RetryScheduler};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");

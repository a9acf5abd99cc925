//! Pagination module
//!
//! Canonical feed state: loaded items, the filtered view, the visible
//! window, page cursor, search and filter state, and the pagination mode.
//!
//! # Overview
//!
//! The pagination module provides:
//! - `PaginationState` - Plain state with an invariant checker
//! - `PaginationStateStore` - Named mutations with exactly-once change notifications
//! - `Subscription` - Handle for removing a change listener

mod store;
mod types;

pub use store::{PaginationStateStore, Subscription};
pub use types::{
    DebugInfo, FeedFilters, FilterPatch, MetadataPatch, PaginationMetadata, PaginationMode,
    PaginationState, SearchState, SortOrder, ValidationReport, Violation,
};

#[cfg(test)]
mod tests;

//! Pagination state types
//!
//! `PaginationState` is plain data. The derived views (`display_items`,
//! `window_items`) and the consistency counters are recomputed by
//! [`PaginationState::recompute`], which every store mutation calls.

use crate::types::FeedItem;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Mode
// ============================================================================

/// Where the next page comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaginationMode {
    /// Fetch more from the network on demand
    #[default]
    Server,
    /// Re-window an already loaded result set
    Client,
}

impl fmt::Display for PaginationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server => f.write_str("server"),
            Self::Client => f.write_str("client"),
        }
    }
}

// ============================================================================
// Filters
// ============================================================================

/// Ordering applied to the display view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    /// Most recent first (the feed's natural order)
    #[default]
    Newest,
    /// Oldest first
    Oldest,
    /// Alphabetical by title
    Title,
}

/// Active filters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedFilters {
    /// Only items in this category
    #[serde(default)]
    pub category: Option<String>,
    /// Only items by this author
    #[serde(default)]
    pub author: Option<String>,
    /// Only items carrying this tag
    #[serde(default)]
    pub tag: Option<String>,
    /// Display ordering
    #[serde(default)]
    pub sort: SortOrder,
}

impl FeedFilters {
    /// Whether any item-excluding filter is set
    pub fn is_filtering(&self) -> bool {
        self.category.is_some() || self.author.is_some() || self.tag.is_some()
    }

    /// Whether these are the default filters
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    /// Check if an item passes every filter
    pub fn matches(&self, item: &FeedItem) -> bool {
        let eq = |want: &Option<String>, have: &Option<String>| match want {
            Some(w) => have.as_deref().is_some_and(|h| h.eq_ignore_ascii_case(w)),
            None => true,
        };

        eq(&self.category, &item.category)
            && eq(&self.author, &item.author)
            && self.tag.as_deref().map_or(true, |t| item.has_tag(t))
    }

    /// Filter and sort a source set
    pub fn apply(&self, items: &[FeedItem]) -> Vec<FeedItem> {
        let mut out: Vec<FeedItem> = items.iter().filter(|i| self.matches(i)).cloned().collect();
        match self.sort {
            SortOrder::Newest => {}
            SortOrder::Oldest => out.reverse(),
            SortOrder::Title => out.sort_by(|a, b| a.title.cmp(&b.title)),
        }
        out
    }

    /// Merge a patch; only fields the patch sets are overwritten
    pub fn merge(&mut self, patch: FilterPatch) {
        if let Some(category) = patch.category {
            self.category = category;
        }
        if let Some(author) = patch.author {
            self.author = author;
        }
        if let Some(tag) = patch.tag {
            self.tag = tag;
        }
        if let Some(sort) = patch.sort {
            self.sort = sort;
        }
    }
}

/// Partial filter update
///
/// The outer `Option` means "leave untouched"; `Some(None)` clears a filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterPatch {
    #[serde(default)]
    pub category: Option<Option<String>>,
    #[serde(default)]
    pub author: Option<Option<String>>,
    #[serde(default)]
    pub tag: Option<Option<String>>,
    #[serde(default)]
    pub sort: Option<SortOrder>,
}

impl FilterPatch {
    /// Create an empty patch
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the category filter
    #[must_use]
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(Some(category.into()));
        self
    }

    /// Set the author filter
    #[must_use]
    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(Some(author.into()));
        self
    }

    /// Set the tag filter
    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(Some(tag.into()));
        self
    }

    /// Set the sort order
    #[must_use]
    pub fn sort(mut self, sort: SortOrder) -> Self {
        self.sort = Some(sort);
        self
    }

    /// Clear the category filter
    #[must_use]
    pub fn clear_category(mut self) -> Self {
        self.category = Some(None);
        self
    }
}

// ============================================================================
// Search
// ============================================================================

/// Search sub-state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchState {
    /// Whether a search result set is being shown
    pub active: bool,
    /// The query that produced `results`
    pub query: String,
    /// Server-provided search results
    pub results: Vec<FeedItem>,
}

// ============================================================================
// Metadata
// ============================================================================

/// Counters used for consistency checks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaginationMetadata {
    /// Total items the server reports, when known
    pub total_server_items: Option<u64>,
    /// Items in `all_items`
    pub loaded_count: usize,
    /// Items in `display_items`
    pub filtered_count: usize,
    /// The server reported that no further pages exist
    pub server_exhausted: bool,
    /// Server pages merged into `all_items`; the next fetch asks for the one after
    #[serde(default)]
    pub pages_loaded: usize,
    /// Last mutation time
    pub last_updated: Option<DateTime<Utc>>,
}

/// Partial metadata update accompanying `update_items`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataPatch {
    /// Total items on the server
    #[serde(default)]
    pub total_server_items: Option<u64>,
    /// Explicit has-more flag; derived from the total when absent
    #[serde(default)]
    pub has_more: Option<bool>,
}

impl MetadataPatch {
    /// Create an empty patch
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the server total
    #[must_use]
    pub fn total(mut self, total: u64) -> Self {
        self.total_server_items = Some(total);
        self
    }

    /// Set the has-more flag
    #[must_use]
    pub fn has_more(mut self, has_more: bool) -> Self {
        self.has_more = Some(has_more);
        self
    }
}

// ============================================================================
// Pagination State
// ============================================================================

/// Canonical pagination state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaginationState {
    /// Every loaded item, most recent first
    pub all_items: Vec<FeedItem>,
    /// Filtered (or search-scoped) view
    pub display_items: Vec<FeedItem>,
    /// Visible prefix of `display_items`
    pub window_items: Vec<FeedItem>,
    /// 1-based page cursor
    pub current_page: usize,
    /// Page size
    pub items_per_page: usize,
    /// Whether another load-more can produce items
    pub has_more: bool,
    /// A load-more is running
    pub is_loading_more: bool,
    /// A network fetch is running
    pub fetch_in_progress: bool,
    /// Pagination mode
    pub mode: PaginationMode,
    /// Search sub-state
    pub search: SearchState,
    /// Active filters
    pub filters: FeedFilters,
    /// Consistency counters
    pub metadata: PaginationMetadata,
}

impl Default for PaginationState {
    fn default() -> Self {
        Self::new(15)
    }
}

impl PaginationState {
    /// Create an empty state with the given page size
    pub fn new(items_per_page: usize) -> Self {
        Self {
            all_items: Vec::new(),
            display_items: Vec::new(),
            window_items: Vec::new(),
            current_page: 1,
            items_per_page,
            has_more: true,
            is_loading_more: false,
            fetch_in_progress: false,
            mode: PaginationMode::Server,
            search: SearchState::default(),
            filters: FeedFilters::default(),
            metadata: PaginationMetadata::default(),
        }
    }

    /// Items the display view is derived from
    pub fn source_items(&self) -> &[FeedItem] {
        if self.search.active {
            &self.search.results
        } else {
            &self.all_items
        }
    }

    /// Number of items the window should hold for the current page
    pub fn window_len(&self) -> usize {
        self.current_page
            .saturating_mul(self.items_per_page)
            .min(self.display_items.len())
    }

    /// Whether the client-side window can still grow
    pub fn has_hidden_items(&self) -> bool {
        self.window_items.len() < self.display_items.len()
    }

    /// Rebuild `display_items`, `window_items` and the counters
    pub fn recompute(&mut self) {
        self.display_items = self.filters.apply(self.source_items());
        self.refresh_window();
    }

    /// Rebuild only `window_items` and the counters
    pub fn refresh_window(&mut self) {
        let len = self.window_len();
        self.window_items = self.display_items[..len].to_vec();
        if self.mode == PaginationMode::Client {
            self.has_more = self.has_hidden_items();
        }
        self.metadata.loaded_count = self.all_items.len();
        self.metadata.filtered_count = self.display_items.len();
        self.metadata.last_updated = Some(Utc::now());
    }

    /// Check every invariant
    pub fn validate(&self) -> ValidationReport {
        let mut violations = Vec::new();

        if self.current_page < 1 {
            violations.push(Violation::PageBelowOne {
                current_page: self.current_page,
            });
        }
        if self.items_per_page < 1 {
            violations.push(Violation::ZeroItemsPerPage);
        }
        if self.window_items.len() > self.display_items.len() {
            violations.push(Violation::WindowExceedsDisplay {
                window: self.window_items.len(),
                display: self.display_items.len(),
            });
        }
        if self.display_items.len() > self.source_items().len() {
            violations.push(Violation::DisplayExceedsSource {
                display: self.display_items.len(),
                source: self.source_items().len(),
            });
        }
        if self.search.active && self.mode != PaginationMode::Client {
            violations.push(Violation::SearchOutsideClientMode);
        }
        if self.metadata.loaded_count != self.all_items.len() {
            violations.push(Violation::LoadedCountMismatch {
                recorded: self.metadata.loaded_count,
                actual: self.all_items.len(),
            });
        }
        if self.metadata.filtered_count != self.display_items.len() {
            violations.push(Violation::FilteredCountMismatch {
                recorded: self.metadata.filtered_count,
                actual: self.display_items.len(),
            });
        }

        ValidationReport { violations }
    }
}

// ============================================================================
// Validation
// ============================================================================

/// A single violated invariant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "violation", rename_all = "snake_case")]
pub enum Violation {
    PageBelowOne { current_page: usize },
    ZeroItemsPerPage,
    WindowExceedsDisplay { window: usize, display: usize },
    DisplayExceedsSource { display: usize, source: usize },
    SearchOutsideClientMode,
    LoadedCountMismatch { recorded: usize, actual: usize },
    FilteredCountMismatch { recorded: usize, actual: usize },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PageBelowOne { current_page } => {
                write!(f, "current_page {current_page} is below 1")
            }
            Self::ZeroItemsPerPage => f.write_str("items_per_page is 0"),
            Self::WindowExceedsDisplay { window, display } => {
                write!(f, "window ({window}) exceeds display ({display})")
            }
            Self::DisplayExceedsSource { display, source } => {
                write!(f, "display ({display}) exceeds source ({source})")
            }
            Self::SearchOutsideClientMode => f.write_str("search active outside client mode"),
            Self::LoadedCountMismatch { recorded, actual } => {
                write!(f, "loaded_count {recorded} != {actual}")
            }
            Self::FilteredCountMismatch { recorded, actual } => {
                write!(f, "filtered_count {recorded} != {actual}")
            }
        }
    }
}

/// Result of an invariant check
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Every invariant that does not hold
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    /// Whether every invariant holds
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Snapshot returned by `get_debug_info`
#[derive(Debug, Clone, Serialize)]
pub struct DebugInfo {
    /// Current state
    pub state: PaginationState,
    /// Invariant check of `state`
    pub validation: ValidationReport,
    /// Notifications delivered so far
    pub version: u64,
    /// Live subscribers
    pub subscribers: usize,
}

//! Common types used throughout feedkit
//!
//! This module contains shared type definitions, type aliases,
//! and the content item that flows through every feed component.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

// ============================================================================
// Type Aliases
// ============================================================================

/// JSON value type (re-exported from serde_json)
pub type JsonValue = serde_json::Value;

/// Generic key-value map with string keys and JSON values
pub type ValueMap = HashMap<String, JsonValue>;

// ============================================================================
// Feed Item
// ============================================================================

/// A single piece of content in the feed (a post, a track, an article)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    /// Stable identifier, used for de-duplication across pages
    pub id: String,

    /// Display title
    #[serde(default)]
    pub title: String,

    /// Author or uploader
    #[serde(default)]
    pub author: Option<String>,

    /// Category (genre, section, board)
    #[serde(default)]
    pub category: Option<String>,

    /// Free-form tags
    #[serde(default)]
    pub tags: Vec<String>,

    /// Publication time
    pub created_at: DateTime<Utc>,

    /// Anything else the remote store returns
    #[serde(default)]
    pub extra: ValueMap,
}

impl FeedItem {
    /// Create an item with an id, title and creation time
    pub fn new(id: impl Into<String>, title: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            author: None,
            category: None,
            tags: Vec::new(),
            created_at,
            extra: HashMap::new(),
        }
    }

    /// Set the author
    #[must_use]
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    /// Set the category
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Add a tag
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Check whether the item carries a tag (case-insensitive)
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}

// ============================================================================
// Utilities
// ============================================================================

/// Lock a mutex, recovering the data if a previous holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

//! Load-more handling
//!
//! # Overview
//!
//! - `LoadMoreStateMachine` - Finite states of one load-more cycle; the
//!   duplicate-request guard
//! - `LoadMoreCoordinator` - Turns a load-more intent into one well-ordered
//!   fetch and executes recovery verdicts
//! - `PageFetcher` - The injected fetch collaborator

mod coordinator;
mod machine;

pub use coordinator::{
    FeedOptimizer, LoadMoreCoordinator, LoadMoreResult, LoadStrategy, PageFetcher, PageRequest,
};
pub use machine::{LoadMoreState, LoadMoreStateMachine, Transition};

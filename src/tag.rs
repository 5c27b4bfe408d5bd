//! Dependency tags.
//!
//! A tag classifies a dependency edge. Tags are opaque to the engine; their
//! identity is the allocation behind the `Arc`, so a consumer that wants two
//! edges to carry the same kind of dependency must clone one `TagRef` rather
//! than construct a second value.

use std::fmt;
use std::sync::Arc;

/// Marker trait for dependency tag values.
pub trait DependencyTag: fmt::Debug + Send + Sync + 'static {}

/// Shared handle to a dependency tag.
pub type TagRef = Arc<dyn DependencyTag>;

/// Tag identity comparison.
pub fn tag_eq(a: &TagRef, b: &TagRef) -> bool {
    Arc::ptr_eq(a, b)
}

/// Convenience tag for callers that only need a labelled kind.
#[derive(Debug)]
pub struct SimpleTag(pub &'static str);

impl DependencyTag for SimpleTag {}

impl SimpleTag {
    pub fn new(label: &'static str) -> TagRef {
        Arc::new(SimpleTag(label))
    }
}

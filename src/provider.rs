//! Variation providers: typed values attached to a specific variant,
//! write-once per `(variant, key)` pair.

use std::any::Any;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

/// Typed handle identifying one provider slot. Two keys created separately
/// are distinct even when `T` matches.
pub struct ProviderKey<T> {
    id: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for ProviderKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ProviderKey<T> {}

static NEXT_PROVIDER_ID: AtomicU64 = AtomicU64::new(0);

impl<T: Any + Send + Sync> ProviderKey<T> {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            id: NEXT_PROVIDER_ID.fetch_add(1, Ordering::Relaxed),
            _marker: PhantomData,
        }
    }

    pub(crate) fn raw(self) -> u64 {
        self.id
    }
}

/// Erased provider cell stored in the graph.
pub(crate) type ProviderValue = Box<dyn Any + Send + Sync>;

pub(crate) fn downcast<T: Any>(value: &ProviderValue) -> Option<&T> {
    value.downcast_ref::<T>()
}

//! Weak handles to values owned elsewhere.

use std::any::{Any, TypeId};
use std::sync::{Arc, Weak};

/// A lookup token for a value whose lifetime the cache does not control.
///
/// The handle never keeps its target alive. Every read goes through
/// [`WeakHandle::upgrade`], which doubles as the liveness check.
#[derive(Clone)]
pub struct WeakHandle {
    inner: Weak<dyn Any + Send + Sync>,
    type_id: TypeId,
    type_name: &'static str,
}

impl WeakHandle {
    pub fn new<T: Any + Send + Sync>(value: &Arc<T>) -> Self {
        let weak: Weak<T> = Arc::downgrade(value);
        Self {
            inner: weak,
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Whether the target is still alive. Only a hint: the owner may drop
    /// it right after this returns.
    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }

    /// Whether the handle was created for values of type `T`.
    pub fn holds<T: Any>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Upgrade to a strong reference of the stored type, if still alive.
    pub fn upgrade_any(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.inner.upgrade()
    }

    /// Upgrade and downcast. `None` if the value is gone or of another type.
    pub fn upgrade<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.upgrade_any()?.downcast::<T>().ok()
    }
}

impl std::fmt::Debug for WeakHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakHandle")
            .field("type_name", &self.type_name)
            .field("alive", &self.is_alive())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_does_not_keep_value_alive() {
        let value = Arc::new(String::from("tile"));
        let handle = WeakHandle::new(&value);

        assert!(handle.is_alive());
        assert_eq!(handle.upgrade::<String>().as_deref(), Some(&"tile".to_string()));

        drop(value);
        assert!(!handle.is_alive());
        assert!(handle.upgrade::<String>().is_none());
    }

    #[test]
    fn test_type_mismatch() {
        let value = Arc::new(42u64);
        let handle = WeakHandle::new(&value);

        assert!(handle.holds::<u64>());
        assert!(!handle.holds::<u32>());
        assert!(handle.upgrade::<u32>().is_none());
        assert_eq!(handle.upgrade::<u64>().map(|v| *v), Some(42));
    }
}

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use docdb_types::{Metadata, ObjectKey};

use crate::options::HookResult;

/// Handle returned by [`ListenerRegistry::register`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Ordered set of listeners.
///
/// Writers take a [`snapshot`](Self::snapshot) when they start, so a listener
/// added or removed while a write is in flight only affects later writes.
pub struct ListenerRegistry<L: ?Sized> {
    next_id: AtomicU64,
    entries: RwLock<Vec<(ListenerId, Arc<L>)>>,
}

impl<L: ?Sized> ListenerRegistry<L> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Add a listener after every existing one.
    pub fn register(&self, listener: Arc<L>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    /// Remove a listener. Returns `false` if it was not registered.
    pub fn unregister(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|(entry, _)| *entry != id);
        entries.len() != before
    }

    /// Listeners in registration order, as of now.
    pub fn snapshot(&self) -> Vec<Arc<L>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl<L: ?Sized> Default for ListenerRegistry<L> {
    fn default() -> Self {
        Self::new()
    }
}

/// A document about to be, or just, written.
#[derive(Clone, Copy, Debug)]
pub struct PutEvent<'a> {
    pub key: &'a ObjectKey,
    pub body: &'a [u8],
    pub metadata: &'a Metadata,
}

/// Observer of writes on a [`DataDb`](crate::DataDb).
///
/// `will_*` callbacks run before the write and may veto it by returning an
/// error. `did_*` callbacks run after it committed.
pub trait DataListener: Send + Sync {
    fn will_put(&self, _event: &PutEvent<'_>) -> HookResult {
        Ok(())
    }

    fn did_put(&self, _event: &PutEvent<'_>) -> HookResult {
        Ok(())
    }

    fn will_delete(&self, _key: &ObjectKey) -> HookResult {
        Ok(())
    }

    fn did_delete(&self, _key: &ObjectKey) -> HookResult {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Named: Send + Sync {
        fn name(&self) -> &str;
    }

    struct Tag(&'static str);

    impl Named for Tag {
        fn name(&self) -> &str {
            self.0
        }
    }

    fn names(registry: &ListenerRegistry<dyn Named>) -> Vec<String> {
        registry
            .snapshot()
            .iter()
            .map(|l| l.name().to_string())
            .collect()
    }

    #[test]
    fn snapshot_keeps_registration_order() {
        let registry: ListenerRegistry<dyn Named> = ListenerRegistry::new();
        registry.register(Arc::new(Tag("a")));
        registry.register(Arc::new(Tag("b")));
        registry.register(Arc::new(Tag("c")));
        assert_eq!(names(&registry), ["a", "b", "c"]);
    }

    #[test]
    fn unregister_removes_only_target() {
        let registry: ListenerRegistry<dyn Named> = ListenerRegistry::new();
        let a = registry.register(Arc::new(Tag("a")));
        registry.register(Arc::new(Tag("b")));

        assert!(registry.unregister(a));
        assert!(!registry.unregister(a));
        assert_eq!(names(&registry), ["b"]);
    }

    #[test]
    fn snapshot_is_detached_from_later_changes() {
        let registry: ListenerRegistry<dyn Named> = ListenerRegistry::new();
        registry.register(Arc::new(Tag("a")));
        let snapshot = registry.snapshot();
        registry.register(Arc::new(Tag("b")));
        registry.clear();

        assert_eq!(snapshot.len(), 1);
        assert!(registry.is_empty());
    }
}

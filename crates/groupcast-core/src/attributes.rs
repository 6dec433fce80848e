//! Per-session attribute scratch space.

use std::any::Any;
use std::sync::Arc;

use dashmap::DashMap;

/// Boxed attribute value. Values are arbitrary; readers downcast to the
/// type they expect.
pub type AttrValue = Arc<dyn Any + Send + Sync>;

/// Thread-safe key/value scratch space scoped to one session.
///
/// Any thread may read or write at any time; concurrent writes to the
/// same key resolve last-write-wins, never a torn value. No iteration or
/// ordering guarantees.
#[derive(Default)]
pub struct AttributeStore {
    map: DashMap<String, AttrValue>,
}

impl AttributeStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an attribute, replacing any previous value under the key.
    pub fn set<T: Any + Send + Sync>(&self, name: impl Into<String>, value: T) {
        let _ = self.map.insert(name.into(), Arc::new(value));
    }

    /// Read an attribute, downcast to the expected type. Returns `None`
    /// when the key is absent or holds a different type.
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        let value = Arc::clone(self.map.get(name)?.value());
        value.downcast::<T>().ok()
    }

    /// Remove an attribute, returning the removed value if present.
    pub fn remove(&self, name: &str) -> Option<AttrValue> {
        self.map.remove(name).map(|(_, v)| v)
    }

    /// Whether the key is present.
    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    /// Number of attributes currently stored.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// True when no attributes are stored.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl std::fmt::Debug for AttributeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttributeStore")
            .field("len", &self.map.len())
            .finish()
    }
}

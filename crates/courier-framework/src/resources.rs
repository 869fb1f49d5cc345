//! Shared resources injected into handlers.
//!
//! Applications provide long-lived objects (a message service, a database
//! pool, the bot settings) once at startup. Handlers receive them through the
//! [`Dep`](crate::extractor::Dep) extractor, keyed by type.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Type alias for the heterogeneous values stored in [`Resources`].
///
/// The inner `dyn Any` is always an `Arc<T>` for the key type `T`, which lets
/// unsized types such as `dyn MessageService` be stored and handed out.
type ResourceArc = Arc<dyn Any + Send + Sync>;

/// A type-keyed map of shared resources.
#[derive(Clone, Default)]
pub struct Resources {
    entries: HashMap<TypeId, (ResourceArc, &'static str)>,
}

impl Resources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provides `value`, replacing any previous resource of the same type.
    pub fn insert<T: Send + Sync + 'static>(&mut self, value: T) -> &mut Self {
        self.insert_arc(Arc::new(value))
    }

    /// Provides an already shared value, typically a trait object:
    ///
    /// ```rust,ignore
    /// resources.insert_arc::<dyn MessageService>(Arc::new(ConsoleSender));
    /// ```
    pub fn insert_arc<T: ?Sized + Send + Sync + 'static>(&mut self, value: Arc<T>) -> &mut Self {
        self.entries
            .insert(TypeId::of::<T>(), (Arc::new(value), type_name::<T>()));
        self
    }

    pub fn get<T: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.entries
            .get(&TypeId::of::<T>())
            .and_then(|(value, _)| value.downcast_ref::<Arc<T>>())
            .cloned()
    }

    pub fn contains<T: ?Sized + 'static>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set()
            .entries(self.entries.values().map(|(_, name)| name))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Greeter: Send + Sync {
        fn greet(&self) -> String;
    }

    struct English;

    impl Greeter for English {
        fn greet(&self) -> String {
            "hello".into()
        }
    }

    #[test]
    fn sized_and_unsized_resources() {
        let mut resources = Resources::new();
        resources
            .insert(42u32)
            .insert_arc::<dyn Greeter>(Arc::new(English));

        assert_eq!(*resources.get::<u32>().unwrap(), 42);
        assert_eq!(resources.get::<dyn Greeter>().unwrap().greet(), "hello");
        assert!(resources.get::<String>().is_none());
        assert!(resources.contains::<dyn Greeter>());
        assert_eq!(resources.len(), 2);
    }

    #[test]
    fn insert_replaces_same_type() {
        let mut resources = Resources::new();
        resources.insert(String::from("a")).insert(String::from("b"));

        assert_eq!(resources.get::<String>().unwrap().as_str(), "b");
        assert_eq!(resources.len(), 1);
    }
}

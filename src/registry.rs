//! Queue name to handler mapping shared by every poll loop.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use crate::errors::FanoutError;
use crate::receiver::functions::MessageHandler;

/// Handlers keyed by queue name, as passed to `listen`.
///
/// Iteration is in name order, so queue resolution during `listen` is
/// deterministic.
#[derive(Clone, Default)]
pub struct Listeners {
    entries: BTreeMap<String, Arc<dyn MessageHandler>>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a handler for a queue, replacing any earlier one.
    ///
    /// # Arguments
    ///
    /// * `queue_name` - Name of the queue, as known to the queue source
    /// * `handler` - Handler run on every message received from that queue
    ///
    /// # Returns
    ///
    /// Returns the builder, so calls can be chained.
    pub fn on(mut self, queue_name: impl Into<String>, handler: impl MessageHandler + 'static) -> Self {
        self.insert(queue_name, Arc::new(handler));
        self
    }

    pub fn insert(&mut self, queue_name: impl Into<String>, handler: Arc<dyn MessageHandler>) {
        self.entries.insert(queue_name.into(), handler);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl IntoIterator for Listeners {
    type Item = (String, Arc<dyn MessageHandler>);
    type IntoIter = std::collections::btree_map::IntoIter<String, Arc<dyn MessageHandler>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}

/// Registry of handlers, read by every poll cycle and written on `listen`.
///
/// Registration only ever merges: a name registered again gets the new
/// handler, and there is no way to remove one.
#[derive(Default)]
pub struct ListenerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn MessageHandler>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges `listeners` into the registry, new entries winning on name
    /// collision.
    pub fn register(&self, listeners: Listeners) {
        let mut handlers = self.handlers.write().unwrap_or_else(|p| p.into_inner());
        handlers.extend(listeners);
    }

    /// Looks up the handler registered for `queue_name`.
    pub fn resolve(&self, queue_name: &str) -> Result<Arc<dyn MessageHandler>, FanoutError> {
        self.handlers
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(queue_name)
            .cloned()
            .ok_or_else(|| FanoutError::HandlerNotFound(queue_name.to_string()))
    }

    /// Snapshot of the current mapping.
    pub fn dump(&self) -> HashMap<String, Arc<dyn MessageHandler>> {
        self.handlers.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Registered queue names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .handlers
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("queues", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::HandlerError;
    use async_trait::async_trait;
    use serde_json::Value;

    struct Tagged(&'static str);

    #[async_trait]
    impl MessageHandler for Tagged {
        async fn handle(&self, _payload: Value) -> Result<(), HandlerError> {
            Err(HandlerError::new(self.0))
        }
    }

    async fn tag_of(registry: &ListenerRegistry, name: &str) -> String {
        let handler = registry.resolve(name).unwrap();
        handler.handle(Value::Null).await.unwrap_err().to_string()
    }

    #[tokio::test]
    async fn register_merges_and_new_entries_win() {
        let registry = ListenerRegistry::new();
        registry.register(Listeners::new().on("a", Tagged("a1")).on("b", Tagged("b1")));
        registry.register(Listeners::new().on("b", Tagged("b2")).on("c", Tagged("c1")));

        assert_eq!(registry.names(), vec!["a", "b", "c"]);
        assert_eq!(tag_of(&registry, "a").await, "a1");
        assert_eq!(tag_of(&registry, "b").await, "b2");
        assert_eq!(registry.dump().len(), 3);
    }

    #[test]
    fn resolve_is_case_sensitive() {
        let registry = ListenerRegistry::new();
        registry.register(Listeners::new().on("Orders", Tagged("x")));

        assert!(registry.resolve("Orders").is_ok());
        assert!(matches!(
            registry.resolve("orders"),
            Err(FanoutError::HandlerNotFound(name)) if name == "orders"
        ));
    }
}

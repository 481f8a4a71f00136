//! Ordered shutdown handlers.
//!
//! # Responsibilities
//! - Keep a concurrent registry of named, prioritized shutdown handlers
//! - Snapshot and sort the registry when a signal arrives
//! - Run every handler in ascending order, one after another
//!
//! # Design Decisions
//! - Identity is the handler name: registering a name twice replaces the first
//! - Equal orders are sorted by name so a dispatch is repeatable
//! - Each handler runs isolated; a panic is logged and the next handler runs

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt};

use crate::lifecycle::signals::Signal;

/// Sets readiness to false.
pub const ORDER_READINESS_FALSE: i32 = 0;
/// Stops all running actions.
pub const ORDER_STOP_ACTIONS: i32 = 10;
/// Application specific handlers.
pub const ORDER_STOP_CUSTOM: i32 = 20;
/// Shuts down the dedicated probes HTTP server.
pub const ORDER_STOP_PROBES_HTTP: i32 = 80;
/// Shuts down the extension HTTP server.
pub const ORDER_STOP_EXTENSION_HTTP: i32 = 90;
/// Last resort: exits the process on interrupt/terminate if nothing else did.
pub const ORDER_TERMINATION: i32 = 100;

type Action = Arc<dyn Fn(Signal) -> BoxFuture<'static, ()> + Send + Sync>;

/// A named callback run when the process receives a shutdown signal.
#[derive(Clone)]
pub struct ShutdownHandler {
    name: String,
    order: i32,
    action: Action,
}

impl ShutdownHandler {
    /// Create a handler from an async callback.
    pub fn new<F, Fut>(name: impl Into<String>, order: i32, action: F) -> Self
    where
        F: Fn(Signal) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            name: name.into(),
            order,
            action: Arc::new(move |signal| action(signal).boxed()),
        }
    }

    /// Create a handler from a synchronous callback.
    pub fn blocking<F>(name: impl Into<String>, order: i32, action: F) -> Self
    where
        F: Fn(Signal) + Send + Sync + 'static,
    {
        let action = Arc::new(action);
        Self::new(name, order, move |signal| {
            let action = Arc::clone(&action);
            async move { action(signal) }
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn order(&self) -> i32 {
        self.order
    }

    /// Run the callback, containing any panic it raises.
    async fn invoke(&self, signal: Signal) {
        let started = std::panic::catch_unwind(AssertUnwindSafe(|| (self.action)(signal)));
        let outcome = match started {
            Ok(future) => AssertUnwindSafe(future).catch_unwind().await,
            Err(panic) => Err(panic),
        };

        if let Err(panic) = outcome {
            tracing::error!(
                handler = %self.name,
                order = self.order,
                panic = %panic_message(panic.as_ref()),
                "Shutdown handler panicked"
            );
        }
    }
}

impl fmt::Debug for ShutdownHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownHandler")
            .field("name", &self.name)
            .field("order", &self.order)
            .finish_non_exhaustive()
    }
}

/// Registry of shutdown handlers.
///
/// Cloning is cheap and every clone shares the same handlers, so the registry
/// can be handed to any component that needs to take part in shutdown.
#[derive(Clone, Default)]
pub struct ShutdownRegistry {
    handlers: Arc<DashMap<String, ShutdownHandler>>,
}

impl ShutdownRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any handler with the same name.
    pub fn add(&self, handler: ShutdownHandler) {
        tracing::trace!(handler = %handler.name, order = handler.order, "Shutdown handler registered");
        self.handlers.insert(handler.name.clone(), handler);
    }

    /// Remove handlers by name. Unknown names are ignored.
    pub fn remove_by_name<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for name in names {
            self.handlers.remove(name.as_ref());
        }
    }

    /// Remove every handler.
    pub fn clear(&self) {
        self.handlers.clear();
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Copy of the current handlers in dispatch order.
    pub fn snapshot(&self) -> Vec<ShutdownHandler> {
        let mut handlers: Vec<ShutdownHandler> = self
            .handlers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        handlers.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.name.cmp(&b.name)));
        handlers
    }

    /// Run all handlers for `signal` in ascending order.
    ///
    /// The registry is only locked while the snapshot is taken, so handlers
    /// may add or remove handlers. Those changes apply to the next dispatch.
    pub async fn dispatch(&self, signal: Signal) {
        let handlers = self.snapshot();
        tracing::info!(signal = signal.name(), handlers = handlers.len(), "Received signal");

        for handler in &handlers {
            tracing::debug!(
                signal = signal.name(),
                handler = %handler.name,
                order = handler.order,
                "Calling shutdown handler"
            );
            handler.invoke(signal).await;
        }
    }
}

impl fmt::Debug for ShutdownRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.snapshot()).finish()
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    const TEST_SIGNAL: Signal = Signal::new(10, "SIGUSR1", false);

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> ShutdownHandler) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&calls);
        let make = move |name: &str| {
            let sink = Arc::clone(&sink);
            let label = name.to_string();
            ShutdownHandler::blocking(name, 0, move |_| sink.lock().unwrap().push(label.clone()))
        };
        (calls, make)
    }

    fn with_order(handler: ShutdownHandler, order: i32) -> ShutdownHandler {
        ShutdownHandler { order, ..handler }
    }

    #[tokio::test]
    async fn dispatch_runs_handlers_in_ascending_order() {
        let registry = ShutdownRegistry::new();
        let (calls, make) = recorder();

        registry.add(with_order(make("Handler1"), 30));
        registry.add(with_order(make("Handler2"), 10));
        registry.add(with_order(make("Handler3"), ORDER_TERMINATION));
        registry.add(with_order(make("Handler0"), ORDER_READINESS_FALSE));

        registry.dispatch(TEST_SIGNAL).await;

        assert_eq!(
            *calls.lock().unwrap(),
            vec!["Handler0", "Handler2", "Handler1", "Handler3"]
        );
    }

    #[tokio::test]
    async fn equal_orders_are_dispatched_in_a_stable_order() {
        let registry = ShutdownRegistry::new();
        let (calls, make) = recorder();

        for name in ["delta", "alpha", "charlie", "bravo"] {
            registry.add(with_order(make(name), ORDER_STOP_CUSTOM));
        }

        registry.dispatch(TEST_SIGNAL).await;
        registry.dispatch(TEST_SIGNAL).await;

        let expected = ["alpha", "bravo", "charlie", "delta"];
        let calls = calls.lock().unwrap();
        assert_eq!(calls[..4], expected);
        assert_eq!(calls[4..], expected);
    }

    #[tokio::test]
    async fn removed_handlers_are_not_called() {
        let registry = ShutdownRegistry::new();
        let (calls, make) = recorder();

        registry.add(with_order(make("Handler1"), 30));
        registry.add(with_order(make("Handler2"), 10));
        registry.remove_by_name(["Handler1", "DoesNotExist"]);

        registry.dispatch(TEST_SIGNAL).await;

        assert_eq!(*calls.lock().unwrap(), vec!["Handler2"]);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn registering_a_name_twice_replaces_the_handler() {
        let registry = ShutdownRegistry::new();
        let (calls, _) = recorder();

        let first = Arc::clone(&calls);
        registry.add(ShutdownHandler::blocking("Handler", 10, move |_| {
            first.lock().unwrap().push("first".into())
        }));
        let second = Arc::clone(&calls);
        registry.add(ShutdownHandler::blocking("Handler", 50, move |_| {
            second.lock().unwrap().push("second".into())
        }));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.snapshot()[0].order(), 50);

        registry.dispatch(TEST_SIGNAL).await;
        assert_eq!(*calls.lock().unwrap(), vec!["second"]);
    }

    #[tokio::test]
    async fn dispatch_on_empty_registry_is_a_noop() {
        let registry = ShutdownRegistry::new();
        registry.dispatch(TEST_SIGNAL).await;
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn clear_removes_everything() {
        let registry = ShutdownRegistry::new();
        let (_, make) = recorder();
        registry.add(make("a"));
        registry.add(make("b"));

        registry.clear();

        assert!(registry.is_empty());
        assert!(!registry.contains("a"));
    }

    #[tokio::test]
    async fn panicking_handler_does_not_stop_later_handlers() {
        let registry = ShutdownRegistry::new();
        let (calls, make) = recorder();

        registry.add(ShutdownHandler::blocking("Broken", 10, |_| panic!("boom")));
        registry.add(ShutdownHandler::new("BrokenAsync", 20, |_| async {
            panic!("async boom");
        }));
        registry.add(with_order(make("Termination"), ORDER_TERMINATION));

        registry.dispatch(TEST_SIGNAL).await;

        assert_eq!(*calls.lock().unwrap(), vec!["Termination"]);
    }

    #[tokio::test]
    async fn handler_can_register_handlers_during_dispatch() {
        let registry = ShutdownRegistry::new();
        let (calls, make) = recorder();

        let inner_registry = registry.clone();
        let late = make("Late");
        registry.add(ShutdownHandler::blocking("Registrar", 10, move |_| {
            inner_registry.add(late.clone());
            inner_registry.remove_by_name(["Registrar"]);
        }));

        registry.dispatch(TEST_SIGNAL).await;
        assert!(calls.lock().unwrap().is_empty());
        assert!(registry.contains("Late"));
        assert!(!registry.contains("Registrar"));

        registry.dispatch(TEST_SIGNAL).await;
        assert_eq!(*calls.lock().unwrap(), vec!["Late"]);
    }

    #[tokio::test]
    async fn async_handlers_complete_before_the_next_one_starts() {
        let registry = ShutdownRegistry::new();
        let calls = Arc::new(Mutex::new(Vec::new()));

        let slow = Arc::clone(&calls);
        registry.add(ShutdownHandler::new("Slow", 10, move |_| {
            let slow = Arc::clone(&slow);
            async move {
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                slow.lock().unwrap().push("slow");
            }
        }));
        let fast = Arc::clone(&calls);
        registry.add(ShutdownHandler::blocking("Fast", 20, move |_| {
            fast.lock().unwrap().push("fast")
        }));

        registry.dispatch(TEST_SIGNAL).await;

        assert_eq!(*calls.lock().unwrap(), vec!["slow", "fast"]);
    }

    #[tokio::test]
    async fn handlers_receive_the_dispatched_signal() {
        let registry = ShutdownRegistry::new();
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        registry.add(ShutdownHandler::blocking("Observer", 10, move |signal| {
            *sink.lock().unwrap() = Some(signal)
        }));

        registry.dispatch(TEST_SIGNAL).await;

        assert_eq!(*seen.lock().unwrap(), Some(TEST_SIGNAL));
    }
}

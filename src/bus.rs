//! Publish/subscribe fan-out for application-wide errors.
//!
//! The facade publishes every terminal error classified as global; host
//! applications subscribe to drive banners or notifiers. Fan-out is
//! synchronous and follows subscription order.

use crate::error::ApiError;
use std::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

/// Handle returned by [`ErrorBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription(Uuid);

type Handler = Box<dyn Fn(&ApiError) + Send + Sync>;

/// Ordered list of global-error subscribers.
pub struct ErrorBus {
    subscribers: Mutex<Vec<(Subscription, Handler)>>,
}

impl ErrorBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Register a handler; it is invoked for every published error.
    pub fn subscribe(&self, handler: impl Fn(&ApiError) + Send + Sync + 'static) -> Subscription {
        let subscription = Subscription(Uuid::new_v4());
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push((subscription.clone(), Box::new(handler)));
        }
        subscription
    }

    /// Remove a handler. Unsubscribing twice is a no-op.
    pub fn unsubscribe(&self, subscription: &Subscription) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.retain(|(id, _)| id != subscription);
        }
    }

    /// Synchronously deliver `error` to every subscriber in subscription
    /// order.
    pub fn publish(&self, error: &ApiError) {
        let Ok(subscribers) = self.subscribers.lock() else {
            return;
        };
        if subscribers.is_empty() {
            warn!(code = %error.code, "global error published with no subscribers");
            return;
        }
        for (_, handler) in subscribers.iter() {
            handler(error);
        }
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map_or(0, |s| s.len())
    }
}

impl Default for ErrorBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_fan_out_in_subscription_order() {
        let bus = ErrorBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            bus.subscribe(move |_| order.lock().expect("lock poisoned").push(label));
        }

        bus.publish(&ApiError::network("down"));
        assert_eq!(
            *order.lock().expect("lock poisoned"),
            vec!["first", "second", "third"]
        );
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let bus = ErrorBus::new();
        let count = Arc::new(Mutex::new(0u32));

        let counter = Arc::clone(&count);
        let subscription = bus.subscribe(move |_| *counter.lock().expect("lock poisoned") += 1);
        assert_eq!(bus.subscriber_count(), 1);

        bus.unsubscribe(&subscription);
        bus.unsubscribe(&subscription);
        assert_eq!(bus.subscriber_count(), 0);

        bus.publish(&ApiError::network("down"));
        assert_eq!(*count.lock().expect("lock poisoned"), 0);
    }

    #[test]
    fn test_publish_with_no_subscribers_is_safe() {
        let bus = ErrorBus::new();
        bus.publish(&ApiError::timeout());
    }
}

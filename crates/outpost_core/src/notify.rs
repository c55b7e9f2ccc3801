//! Typed publish/subscribe registries.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Identifies one subscription for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

struct Registry<T: ?Sized> {
    next_id: u64,
    handlers: Vec<(u64, Handler<T>)>,
    /// Nesting depth of in-flight publishes.
    publishing: usize,
    deferred_removals: Vec<u64>,
}

/// A set of handlers for one event type.
///
/// `publish` runs every handler subscribed when it started, synchronously
/// and in subscription order, on the calling thread. No lock is held while
/// handlers run, so a handler may publish, subscribe or unsubscribe.
/// Removals made while any publish is in flight take effect once the
/// outermost publish returns; handlers added during a publish first run on
/// the next one.
pub struct CallbackSet<T: ?Sized> {
    registry: Mutex<Registry<T>>,
}

impl<T: ?Sized> CallbackSet<T> {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(Registry {
                next_id: 1,
                handlers: Vec::new(),
                publishing: 0,
                deferred_removals: Vec::new(),
            }),
        }
    }

    /// Adds a handler.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionToken
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let mut registry = self.registry.lock();
        let id = registry.next_id;
        registry.next_id += 1;
        let handler: Handler<T> = Arc::new(handler);
        registry.handlers.push((id, handler));
        SubscriptionToken(id)
    }

    /// Removes a handler. Returns false if the token is not subscribed.
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        let mut registry = self.registry.lock();
        let present = registry.handlers.iter().any(|(id, _)| *id == token.0)
            && !registry.deferred_removals.contains(&token.0);
        if !present {
            return false;
        }
        if registry.publishing > 0 {
            registry.deferred_removals.push(token.0);
        } else {
            registry.handlers.retain(|(id, _)| *id != token.0);
        }
        true
    }

    /// Invokes every current handler with `event`.
    pub fn publish(&self, event: &T) {
        let handlers: Vec<Handler<T>> = {
            let mut registry = self.registry.lock();
            registry.publishing += 1;
            registry.handlers.iter().map(|(_, h)| Arc::clone(h)).collect()
        };
        let _guard = PublishGuard { set: self };

        for handler in handlers {
            handler(event);
        }
    }

    /// Returns the number of subscribed handlers, counting deferred removals
    /// as gone.
    #[must_use]
    pub fn len(&self) -> usize {
        let registry = self.registry.lock();
        registry.handlers.len() - registry.deferred_removals.len()
    }

    /// Returns true if nothing is subscribed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Ends a publish even if a handler panics.
struct PublishGuard<'a, T: ?Sized> {
    set: &'a CallbackSet<T>,
}

impl<T: ?Sized> Drop for PublishGuard<'_, T> {
    fn drop(&mut self) {
        let mut registry = self.set.registry.lock();
        registry.publishing -= 1;
        if registry.publishing == 0 && !registry.deferred_removals.is_empty() {
            let removed = std::mem::take(&mut registry.deferred_removals);
            registry.handlers.retain(|(id, _)| !removed.contains(id));
        }
    }
}

impl<T: ?Sized> Default for CallbackSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> fmt::Debug for CallbackSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackSet")
            .field("handlers", &self.len())
            .finish()
    }
}

/// Every lifecycle event the core and its collaborators exchange.
#[derive(Debug, Default)]
pub struct NotificationHub {
    maintenance_progress: CallbackSet<str>,
    maintenance_done: CallbackSet<bool>,
    settings_changed: CallbackSet<bool>,
    system_message_changed: CallbackSet<()>,
    network_ready: CallbackSet<i32>,
    app_did_become_active: CallbackSet<()>,
    app_will_resign_active: CallbackSet<()>,
}

impl NotificationHub {
    /// Creates a hub with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Human-readable progress of migrations and maintenance.
    pub fn maintenance_progress(&self) -> &CallbackSet<str> {
        &self.maintenance_progress
    }

    /// Completion of a maintenance pass; the payload is success.
    pub fn maintenance_done(&self) -> &CallbackSet<bool> {
        &self.maintenance_done
    }

    /// Preferences changed; the payload is true when the change came from
    /// the server.
    pub fn settings_changed(&self) -> &CallbackSet<bool> {
        &self.settings_changed
    }

    /// The system message was set or cleared.
    pub fn system_message_changed(&self) -> &CallbackSet<()> {
        &self.system_message_changed
    }

    /// Network reachability; the payload is the platform reachability code.
    pub fn network_ready(&self) -> &CallbackSet<i32> {
        &self.network_ready
    }

    /// The host app came to the foreground.
    pub fn app_did_become_active(&self) -> &CallbackSet<()> {
        &self.app_did_become_active
    }

    /// The host app is about to go to the background.
    pub fn app_will_resign_active(&self) -> &CallbackSet<()> {
        &self.app_will_resign_active
    }
}

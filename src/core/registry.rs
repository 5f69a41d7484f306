//! Session registry
//!
//! Keeps at most one live session per transport key, creates sessions on
//! demand and fans their events out to per-channel subscribers. A session
//! with no subscribers, either because the last one left or because it was
//! only ever acquired, is released and closes after its grace period unless
//! somebody subscribes again.

use crate::core::error::DockError;
use crate::core::module::{ModuleReading, ModuleType, SLOT_COUNT};
use crate::core::session::{DockEvent, Session, SessionConfig, SessionHandle};
use crate::core::state_machine::LinkStatus;
use crate::core::transport::SharedConnector;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Subscriber callback
pub type EventCallback = Arc<dyn Fn(&DockEvent) + Send + Sync>;

/// Event categories a subscriber wants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    /// Module readings
    pub updates: bool,
    /// Module attached
    pub found: bool,
    /// Module detached
    pub lost: bool,
    /// Dock identified, info text and session closed
    pub info: bool,
    /// Errors
    pub errors: bool,
    /// Link status changes
    pub status: bool,
}

impl Default for EventFilter {
    fn default() -> Self {
        Self::all()
    }
}

impl EventFilter {
    /// Every category
    pub const fn all() -> Self {
        Self {
            updates: true,
            found: true,
            lost: true,
            info: true,
            errors: true,
            status: true,
        }
    }

    /// Only module readings and link status
    pub const fn readings() -> Self {
        Self {
            updates: true,
            found: false,
            lost: false,
            info: false,
            errors: false,
            status: true,
        }
    }

    /// Module events only
    pub const fn modules() -> Self {
        Self {
            updates: true,
            found: true,
            lost: true,
            info: false,
            errors: false,
            status: false,
        }
    }

    /// Whether `event` passes the filter
    pub fn allows(&self, event: &DockEvent) -> bool {
        match event {
            DockEvent::Updated(_) => self.updates,
            DockEvent::Found(_) => self.found,
            DockEvent::Lost(_) => self.lost,
            DockEvent::Opened(_) | DockEvent::Info(_) | DockEvent::Closed => self.info,
            DockEvent::Error(_) => self.errors,
            DockEvent::Status(_) => self.status,
        }
    }
}

/// Subscription identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(Uuid);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

struct Subscription {
    id: SubscriptionId,
    key: String,
    channel: u8,
    filter: EventFilter,
    callback: EventCallback,
}

impl Subscription {
    fn matches(&self, key: &str, event: &DockEvent) -> bool {
        self.key == key
            && self.filter.allows(event)
            && event.channel().map_or(true, |channel| channel == self.channel)
    }
}

struct SessionEntry {
    handle: SessionHandle,
    generation: u64,
    /// Last link status delivered to subscribers
    delivered_status: Option<LinkStatus>,
}

#[derive(Default)]
struct RegistryState {
    sessions: HashMap<String, SessionEntry>,
    subscriptions: Vec<Subscription>,
    next_generation: u64,
}

struct RegistryInner {
    connector: SharedConnector,
    config: SessionConfig,
    state: Mutex<RegistryState>,
}

/// Registry of dock sessions keyed by transport key
#[derive(Clone)]
pub struct DockRegistry {
    inner: Arc<RegistryInner>,
}

impl DockRegistry {
    /// Create a registry resolving keys through `connector`
    pub fn new(connector: SharedConnector, config: SessionConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                connector,
                config,
                state: Mutex::new(RegistryState::default()),
            }),
        }
    }

    /// Session for `key`, created if there is no live one.
    ///
    /// The returned session may still be identifying.
    pub fn session(&self, key: &str) -> Result<SessionHandle, DockError> {
        let mut state = self.inner.state.lock();
        if let Some(entry) = state.sessions.get(key) {
            if !entry.handle.is_closed() {
                return Ok(entry.handle.clone());
            }
        }

        let transport = self
            .inner
            .connector
            .connect(key)
            .map_err(|e| DockError::unavailable(key, &e))?;

        let (handle, events) = Session::spawn(key, transport, self.inner.config.clone());
        state.next_generation += 1;
        let generation = state.next_generation;
        state.sessions.insert(
            key.to_string(),
            SessionEntry {
                handle: handle.clone(),
                generation,
                delivered_status: None,
            },
        );
        drop(state);

        info!(key, "session created");
        spawn_forwarder(Arc::downgrade(&self.inner), key.to_string(), generation, events);
        Ok(handle)
    }

    /// Wait for an identified session on `key`.
    ///
    /// Concurrent callers share one session; each resolves once, when it
    /// identifies or when it fails. Without a subscriber on `key` the session
    /// is released straight away, so it stays open only for the grace period
    /// unless somebody subscribes.
    pub async fn acquire(&self, key: &str) -> Result<SessionHandle, DockError> {
        let handle = self.session(key)?;
        handle.wait_ready().await?;

        {
            let state = self.inner.state.lock();
            if !state.subscriptions.iter().any(|s| s.key == key) {
                debug!(key, "acquired without subscribers, releasing");
                handle.release();
            }
        }
        Ok(handle)
    }

    /// Callback form of [`DockRegistry::acquire`]. Exactly one callback runs.
    pub fn acquire_with<R, E>(&self, key: &str, on_ready: R, on_error: E)
    where
        R: FnOnce(SessionHandle) + Send + 'static,
        E: FnOnce(DockError) + Send + 'static,
    {
        let registry = self.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            match registry.acquire(&key).await {
                Ok(handle) => on_ready(handle),
                Err(e) => on_error(e),
            }
        });
    }

    /// Register `callback` for events on `channel` of `key`.
    ///
    /// Creates the session if needed and cancels a pending release. If the
    /// dock is already identified the callback immediately receives a
    /// connected status.
    pub fn subscribe(
        &self,
        key: &str,
        channel: u8,
        filter: EventFilter,
        callback: EventCallback,
    ) -> Result<SubscriptionId, DockError> {
        if !(1..=SLOT_COUNT).contains(&usize::from(channel)) {
            return Err(DockError::InvalidChannel(u32::from(channel)));
        }

        let handle = self.session(key)?;
        let id = SubscriptionId(Uuid::new_v4());
        let delivered = {
            let mut state = self.inner.state.lock();
            state.subscriptions.push(Subscription {
                id,
                key: key.to_string(),
                channel,
                filter,
                callback: callback.clone(),
            });
            // Queued under the lock so it cannot overtake a racing release
            handle.retain();
            state
                .sessions
                .get(key)
                .filter(|entry| entry.handle.same_session(&handle))
                .and_then(|entry| entry.delivered_status)
        };
        debug!(key, channel, %id, "subscribed");

        // Only replay a status the forwarder has already fanned out, otherwise
        // this subscriber is in line for the real one
        let connected = DockEvent::Status(LinkStatus::Connected);
        if delivered == Some(LinkStatus::Connected) && filter.allows(&connected) {
            callback(&connected);
        }
        Ok(id)
    }

    /// Remove a subscription. Releases the session when it was the last one
    /// for its key. Returns false for an unknown id.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut state = self.inner.state.lock();
        let Some(position) = state.subscriptions.iter().position(|s| s.id == id) else {
            return false;
        };
        let subscription = state.subscriptions.remove(position);
        let key = subscription.key;
        let remaining = state.subscriptions.iter().filter(|s| s.key == key).count();
        if remaining == 0 {
            if let Some(entry) = state.sessions.get(&key) {
                entry.handle.release();
            }
        }
        drop(state);

        debug!(key = %key, %id, remaining, "unsubscribed");
        true
    }

    /// Start the grace period for `key` if nobody is subscribed to it
    pub fn release(&self, key: &str) {
        let state = self.inner.state.lock();
        if state.subscriptions.iter().any(|s| s.key == key) {
            return;
        }
        if let Some(entry) = state.sessions.get(key) {
            entry.handle.release();
        }
    }

    /// Deliver `event` to every matching subscriber of `key`
    pub fn dispatch(&self, key: &str, event: &DockEvent) {
        self.inner.dispatch(key, event);
    }

    /// Deliver a module update
    pub fn dispatch_update(&self, key: &str, reading: ModuleReading) {
        self.dispatch(key, &DockEvent::Updated(reading));
    }

    /// Deliver a module attach
    pub fn dispatch_found(&self, key: &str, reading: ModuleReading) {
        self.dispatch(key, &DockEvent::Found(reading));
    }

    /// Deliver a module detach
    pub fn dispatch_lost(&self, key: &str, reading: ModuleReading) {
        self.dispatch(key, &DockEvent::Lost(reading));
    }

    /// First module of `module_type` on the session for `key`
    pub fn first_of_type(&self, key: &str, module_type: &ModuleType) -> Option<ModuleReading> {
        self.handle(key)?.first_of_type(module_type)
    }

    /// Live session for `key`, without creating one
    pub fn handle(&self, key: &str) -> Option<SessionHandle> {
        self.inner
            .state
            .lock()
            .sessions
            .get(key)
            .map(|entry| entry.handle.clone())
            .filter(|handle| !handle.is_closed())
    }

    /// Number of subscriptions on `key`
    pub fn subscriber_count(&self, key: &str) -> usize {
        self.inner
            .state
            .lock()
            .subscriptions
            .iter()
            .filter(|s| s.key == key)
            .count()
    }

    /// Keys with a registered session
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.state.lock().sessions.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Drop every subscription and shut down every session
    pub fn shutdown(&self) {
        let handles: Vec<SessionHandle> = {
            let mut state = self.inner.state.lock();
            state.subscriptions.clear();
            state.sessions.values().map(|entry| entry.handle.clone()).collect()
        };
        for handle in handles {
            handle.shutdown();
        }
    }
}

impl RegistryInner {
    fn dispatch(&self, key: &str, event: &DockEvent) {
        let callbacks = Self::matching(&self.state.lock(), key, event);
        Self::deliver(callbacks, event);
    }

    /// Dispatch an event coming from the session of `generation`
    fn forward(&self, key: &str, generation: u64, event: &DockEvent) {
        let callbacks = {
            let mut state = self.state.lock();
            if let DockEvent::Status(status) = event {
                if let Some(entry) = state.sessions.get_mut(key).filter(|e| e.generation == generation) {
                    entry.delivered_status = Some(*status);
                }
            }
            Self::matching(&state, key, event)
        };
        Self::deliver(callbacks, event);
    }

    fn matching(state: &RegistryState, key: &str, event: &DockEvent) -> Vec<EventCallback> {
        state
            .subscriptions
            .iter()
            .filter(|s| s.matches(key, event))
            .map(|s| s.callback.clone())
            .collect()
    }

    // Callbacks run outside the lock so they may call back into the registry
    fn deliver(callbacks: Vec<EventCallback>, event: &DockEvent) {
        for callback in callbacks {
            callback(event);
        }
    }

    fn session_ended(&self, key: &str, generation: u64) {
        let mut state = self.state.lock();
        if state.sessions.get(key).is_some_and(|entry| entry.generation == generation) {
            state.sessions.remove(key);
            let orphaned = state.subscriptions.iter().filter(|s| s.key == key).count();
            if orphaned > 0 {
                warn!(key, orphaned, "session ended with subscribers attached");
            }
        }
    }
}

fn spawn_forwarder(
    registry: Weak<RegistryInner>,
    key: String,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<DockEvent>,
) {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let Some(inner) = registry.upgrade() else {
                return;
            };
            inner.forward(&key, generation, &event);
        }
        if let Some(inner) = registry.upgrade() {
            inner.session_ended(&key, generation);
            debug!(key = %key, "session removed from registry");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::module::ModuleFields;
    use crate::core::transport::{LineTransport, SimulatedDock, TransportError};

    fn silent_registry() -> DockRegistry {
        let connector = |_key: &str| -> Result<Box<dyn LineTransport>, TransportError> {
            let (dock, _harness) = SimulatedDock::new();
            Ok(Box::new(dock))
        };
        DockRegistry::new(Arc::new(connector), SessionConfig::default())
    }

    fn reading(channel: u8) -> ModuleReading {
        ModuleReading {
            channel,
            module_type: ModuleType::Dial,
            fields: ModuleFields::Position { position: 7 },
        }
    }

    fn recorder() -> (EventCallback, Arc<Mutex<Vec<DockEvent>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (Arc::new(move |event: &DockEvent| sink.lock().push(event.clone())), seen)
    }

    #[test]
    fn filter_categories() {
        let filter = EventFilter::readings();
        assert!(filter.allows(&DockEvent::Updated(reading(1))));
        assert!(filter.allows(&DockEvent::Status(LinkStatus::Reconnecting)));
        assert!(!filter.allows(&DockEvent::Info("hi".into())));
        assert!(EventFilter::default().allows(&DockEvent::Closed));
    }

    #[tokio::test]
    async fn dispatch_matches_key_and_channel() {
        let registry = silent_registry();
        let (one, seen_one) = recorder();
        let (two, seen_two) = recorder();
        registry.subscribe("a", 1, EventFilter::all(), one).unwrap();
        registry.subscribe("a", 2, EventFilter::all(), two).unwrap();

        registry.dispatch_update("a", reading(1));
        registry.dispatch_update("b", reading(1));
        registry.dispatch_lost("a", reading(2));
        registry.dispatch("a", &DockEvent::Info("hello".into()));

        assert_eq!(
            *seen_one.lock(),
            vec![DockEvent::Updated(reading(1)), DockEvent::Info("hello".into())]
        );
        assert_eq!(
            *seen_two.lock(),
            vec![DockEvent::Lost(reading(2)), DockEvent::Info("hello".into())]
        );
        registry.shutdown();
    }

    #[tokio::test]
    async fn dispatch_without_subscribers_is_a_no_op() {
        let registry = silent_registry();
        registry.dispatch_found("nobody", reading(3));
        assert_eq!(registry.subscriber_count("nobody"), 0);
        assert!(registry.keys().is_empty());
    }

    #[tokio::test]
    async fn subscribe_validates_channel() {
        let registry = silent_registry();
        let (callback, _) = recorder();
        assert_eq!(
            registry.subscribe("a", 0, EventFilter::all(), callback.clone()),
            Err(DockError::InvalidChannel(0))
        );
        assert_eq!(
            registry.subscribe("a", 9, EventFilter::all(), callback),
            Err(DockError::InvalidChannel(9))
        );
    }

    #[tokio::test]
    async fn unsubscribe_unknown_id() {
        let registry = silent_registry();
        let (callback, _) = recorder();
        let id = registry.subscribe("a", 1, EventFilter::all(), callback).unwrap();
        assert_eq!(registry.subscriber_count("a"), 1);
        assert!(registry.unsubscribe(id));
        assert!(!registry.unsubscribe(id));
        assert_eq!(registry.subscriber_count("a"), 0);
        registry.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn connected_status_reaches_a_new_subscriber_once() {
        use crate::core::transport::DockProfile;

        let connector = |_key: &str| -> Result<Box<dyn LineTransport>, TransportError> {
            let (dock, _harness) = SimulatedDock::with_profile(DockProfile::default());
            Ok(Box::new(dock))
        };
        let registry = DockRegistry::new(Arc::new(connector), SessionConfig::default());

        // Ready is visible on the handle before the forwarder has fanned out
        // the matching status event
        let handle = registry.session("a").unwrap();
        handle.wait_ready().await.unwrap();
        let (early, seen_early) = recorder();
        registry.subscribe("a", 1, EventFilter::readings(), early).unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let (late, seen_late) = recorder();
        registry.subscribe("a", 2, EventFilter::readings(), late).unwrap();

        let connected = DockEvent::Status(LinkStatus::Connected);
        assert_eq!(seen_early.lock().iter().filter(|e| **e == connected).count(), 1);
        assert_eq!(*seen_late.lock(), vec![connected]);
        registry.shutdown();
    }

    #[tokio::test]
    async fn one_session_per_key() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let connects = Arc::new(AtomicUsize::new(0));
        let counter = connects.clone();
        let connector = move |_key: &str| -> Result<Box<dyn LineTransport>, TransportError> {
            counter.fetch_add(1, Ordering::SeqCst);
            let (dock, _harness) = SimulatedDock::new();
            Ok(Box::new(dock))
        };
        let registry = DockRegistry::new(Arc::new(connector), SessionConfig::default());

        let first = registry.session("a").unwrap();
        let _second = registry.session("a").unwrap();
        registry.session("b").unwrap();
        assert_eq!(connects.load(Ordering::SeqCst), 2);
        assert_eq!(first.key(), "a");
        assert_eq!(registry.keys(), vec!["a".to_string(), "b".to_string()]);
        registry.shutdown();
    }
}

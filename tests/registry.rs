//! Registry behaviour with simulated docks

use flotilla_core::core::registry::EventCallback;
use flotilla_core::core::transport::{DockHarness, DockProfile, SimulatedDock};
use flotilla_core::{
    DockError, DockEvent, DockRegistry, EventFilter, LineTransport, LinkStatus, ModuleFields, ModuleReading,
    ModuleType, SessionConfig, SharedConnector, TransportError,
};
use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::sync::oneshot;
use tokio::time::{sleep, timeout, Instant};

const KEY: &str = "/dev/ttyACM0";

/// Hands out a fresh simulated dock on every connect and keeps the harnesses
#[derive(Clone, Default)]
struct DockFactory {
    harnesses: Arc<Mutex<Vec<DockHarness>>>,
}

impl DockFactory {
    fn registry(&self, profile: DockProfile) -> DockRegistry {
        let harnesses = self.harnesses.clone();
        let connector: SharedConnector = Arc::new(move |_key: &str| -> Result<Box<dyn LineTransport>, TransportError> {
            let (dock, harness) = SimulatedDock::with_profile(profile.clone());
            harness.set_supports_stop(true);
            harnesses.lock().push(harness);
            Ok(Box::new(dock))
        });
        DockRegistry::new(connector, SessionConfig::default())
    }

    fn connects(&self) -> usize {
        self.harnesses.lock().len()
    }

    fn with<R>(&self, index: usize, f: impl FnOnce(&DockHarness) -> R) -> R {
        f(&self.harnesses.lock()[index])
    }
}

fn collector() -> (EventCallback, UnboundedReceiver<DockEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback: EventCallback = Arc::new(move |event: &DockEvent| {
        let _ = tx.send(event.clone());
    });
    (callback, rx)
}

async fn next_event(events: &mut UnboundedReceiver<DockEvent>) -> DockEvent {
    timeout(Duration::from_secs(60), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

fn dial(channel: u8, position: i32) -> ModuleReading {
    ModuleReading {
        channel,
        module_type: ModuleType::Dial,
        fields: ModuleFields::Position { position },
    }
}

#[tokio::test(start_paused = true)]
async fn last_unsubscribe_closes_after_grace() {
    let factory = DockFactory::default();
    let registry = factory.registry(DockProfile::default());

    let (callback, _events) = collector();
    let id = registry.subscribe(KEY, 1, EventFilter::all(), callback).unwrap();
    let handle = registry.acquire(KEY).await.unwrap();
    assert_eq!(registry.subscriber_count(KEY), 1);

    let released = Instant::now();
    assert!(registry.unsubscribe(id));
    assert!(!registry.unsubscribe(id));

    sleep(Duration::from_millis(2900)).await;
    assert!(factory.with(0, DockHarness::is_open));

    handle.closed().await;
    assert!(released.elapsed() >= Duration::from_secs(3));
    factory.with(0, |harness| {
        assert!(!harness.is_open());
        assert_eq!(harness.writes().last().map(String::as_str), Some("stop\r"));
    });

    sleep(Duration::from_millis(10)).await;
    assert!(registry.keys().is_empty());
}

#[tokio::test(start_paused = true)]
async fn resubscribe_within_grace_keeps_the_session() {
    let factory = DockFactory::default();
    let registry = factory.registry(DockProfile::default());

    let (callback, _events) = collector();
    let id = registry.subscribe(KEY, 1, EventFilter::all(), callback).unwrap();
    let first = registry.acquire(KEY).await.unwrap();
    registry.unsubscribe(id);

    sleep(Duration::from_secs(1)).await;
    let (callback, mut events) = collector();
    registry.subscribe(KEY, 4, EventFilter::all(), callback).unwrap();
    // Already identified: the new subscriber hears about it straight away
    assert_eq!(next_event(&mut events).await, DockEvent::Status(LinkStatus::Connected));

    sleep(Duration::from_secs(10)).await;
    assert!(first.is_ready());
    assert_eq!(factory.connects(), 1);
    factory.with(0, |harness| {
        assert!(harness.is_open());
        assert!(!harness.writes().iter().any(|w| w == "stop\r"));
    });
}

#[tokio::test(start_paused = true)]
async fn acquire_without_subscribers_closes_after_grace() {
    let factory = DockFactory::default();
    let registry = factory.registry(DockProfile::default());

    let handle = registry.acquire(KEY).await.unwrap();
    let acquired = Instant::now();
    assert_eq!(registry.subscriber_count(KEY), 0);

    sleep(Duration::from_millis(2900)).await;
    assert!(factory.with(0, DockHarness::is_open));

    handle.closed().await;
    assert!(acquired.elapsed() >= Duration::from_secs(3));
    factory.with(0, |harness| {
        assert!(!harness.is_open());
        assert_eq!(harness.writes().last().map(String::as_str), Some("stop\r"));
    });

    sleep(Duration::from_millis(10)).await;
    assert!(registry.keys().is_empty());
}

#[tokio::test(start_paused = true)]
async fn subscribing_after_acquire_keeps_the_session() {
    let factory = DockFactory::default();
    let registry = factory.registry(DockProfile::default());

    let handle = registry.acquire(KEY).await.unwrap();
    sleep(Duration::from_secs(2)).await;
    let (callback, _events) = collector();
    registry.subscribe(KEY, 3, EventFilter::all(), callback).unwrap();

    sleep(Duration::from_secs(10)).await;
    assert!(handle.is_ready());
    assert!(factory.with(0, DockHarness::is_open));
}

#[tokio::test(start_paused = true)]
async fn leave_and_rejoin_in_one_step_keeps_the_session() {
    let factory = DockFactory::default();
    let registry = factory.registry(DockProfile::default());

    let (callback, _events) = collector();
    let id = registry.subscribe(KEY, 1, EventFilter::all(), callback).unwrap();
    let handle = registry.acquire(KEY).await.unwrap();

    // Release and retain reach the session in the order they were issued
    registry.unsubscribe(id);
    let (callback, _events) = collector();
    registry.subscribe(KEY, 1, EventFilter::all(), callback).unwrap();

    sleep(Duration::from_secs(10)).await;
    assert!(!handle.is_closed());
    assert_eq!(factory.connects(), 1);
}

#[tokio::test]
async fn concurrent_acquires_share_one_session() {
    let factory = DockFactory::default();
    let registry = factory.registry(DockProfile::default());

    let waiters = (0..5).map(|_| registry.acquire(KEY));
    let handles = join_all(waiters).await;

    assert_eq!(handles.len(), 5);
    for handle in handles {
        assert!(handle.unwrap().is_ready());
    }
    assert_eq!(factory.connects(), 1);
    assert_eq!(registry.keys(), vec![KEY.to_string()]);
    assert_eq!(factory.with(0, DockHarness::open_count), 1);
}

#[tokio::test]
async fn unresolvable_key_is_unavailable() {
    let connector: SharedConnector = Arc::new(|key: &str| -> Result<Box<dyn LineTransport>, TransportError> {
        Err(TransportError::PortNotFound(key.to_string()))
    });
    let registry = DockRegistry::new(connector, SessionConfig::default());

    let err = registry.acquire(KEY).await.unwrap_err();
    assert!(matches!(err, DockError::TransportUnavailable { ref key, .. } if key == KEY));

    let (callback, _events) = collector();
    assert!(registry.subscribe(KEY, 1, EventFilter::all(), callback).is_err());
    assert!(registry.keys().is_empty());
}

#[tokio::test]
async fn failed_open_rejects_every_waiter() {
    let (dock, harness) = SimulatedDock::new();
    harness.fail_next_opens(1);
    let slot = Arc::new(Mutex::new(Some(dock)));
    let connector: SharedConnector = Arc::new(move |key: &str| -> Result<Box<dyn LineTransport>, TransportError> {
        match slot.lock().take() {
            Some(dock) => Ok(Box::new(dock)),
            None => Err(TransportError::PortNotFound(key.to_string())),
        }
    });
    let registry = DockRegistry::new(connector, SessionConfig::default());

    let (first, second) = tokio::join!(registry.acquire(KEY), registry.acquire(KEY));
    assert!(matches!(first, Err(DockError::TransportUnavailable { .. })));
    assert!(matches!(second, Err(DockError::TransportUnavailable { .. })));
}

#[tokio::test]
async fn subscribers_only_see_their_channel() {
    let factory = DockFactory::default();
    let profile = DockProfile::default()
        .with_module(1, "dial", &["4"])
        .with_module(2, "dial", &["6"]);
    let registry = factory.registry(profile);

    let (all_cb, mut first) = collector();
    let (readings_cb, mut second) = collector();
    registry.subscribe(KEY, 1, EventFilter::all(), all_cb).unwrap();
    registry.subscribe(KEY, 2, EventFilter::readings(), readings_cb).unwrap();
    assert_eq!(registry.subscriber_count(KEY), 2);

    assert!(matches!(next_event(&mut first).await, DockEvent::Opened(_)));
    assert_eq!(next_event(&mut first).await, DockEvent::Status(LinkStatus::Connected));
    assert_eq!(next_event(&mut first).await, DockEvent::Found(dial(1, 4)));
    assert_eq!(next_event(&mut second).await, DockEvent::Status(LinkStatus::Connected));

    factory.with(0, |harness| {
        harness.send_line("u 1/dial 9");
        harness.send_line("u 2/dial 8");
    });

    assert_eq!(next_event(&mut first).await, DockEvent::Updated(dial(1, 9)));
    assert_eq!(next_event(&mut second).await, DockEvent::Updated(dial(2, 8)));
    assert!(first.try_recv().is_err());
    assert!(second.try_recv().is_err());

    assert_eq!(
        registry.first_of_type(KEY, &ModuleType::Dial).map(|r| r.channel),
        Some(1)
    );
}

#[tokio::test]
async fn invalid_channel_subscription_is_rejected() {
    let factory = DockFactory::default();
    let registry = factory.registry(DockProfile::default());

    let (callback, _events) = collector();
    assert_eq!(
        registry.subscribe(KEY, 9, EventFilter::all(), callback).unwrap_err(),
        DockError::InvalidChannel(9)
    );
    assert_eq!(factory.connects(), 0);
}

#[tokio::test]
async fn acquire_with_runs_one_callback() {
    let factory = DockFactory::default();
    let registry = factory.registry(DockProfile::default());

    let (ready_tx, ready_rx) = oneshot::channel();
    registry.acquire_with(
        KEY,
        move |handle| {
            let _ = ready_tx.send(handle.identity());
        },
        |err| panic!("unexpected error: {err}"),
    );
    let identity = timeout(Duration::from_secs(60), ready_rx).await.unwrap().unwrap();
    assert_eq!(identity.name.as_deref(), Some("Workbench"));

    let connector: SharedConnector = Arc::new(|key: &str| -> Result<Box<dyn LineTransport>, TransportError> {
        Err(TransportError::PermissionDenied(key.to_string()))
    });
    let failing = DockRegistry::new(connector, SessionConfig::default());
    let (err_tx, err_rx) = oneshot::channel();
    failing.acquire_with(KEY, |_| panic!("unexpected session"), move |err| {
        let _ = err_tx.send(err);
    });
    let err = timeout(Duration::from_secs(60), err_rx).await.unwrap().unwrap();
    assert!(matches!(err, DockError::TransportUnavailable { .. }));
}

#[tokio::test(start_paused = true)]
async fn closed_session_is_recreated_on_next_subscribe() {
    let factory = DockFactory::default();
    let registry = factory.registry(DockProfile::default());

    let (callback, _events) = collector();
    let id = registry.subscribe(KEY, 1, EventFilter::all(), callback).unwrap();
    let first = registry.acquire(KEY).await.unwrap();
    registry.unsubscribe(id);
    first.closed().await;
    sleep(Duration::from_millis(10)).await;

    let (callback, mut events) = collector();
    registry.subscribe(KEY, 1, EventFilter::all(), callback).unwrap();
    assert!(matches!(next_event(&mut events).await, DockEvent::Opened(_)));
    assert_eq!(factory.connects(), 2);
}

#[tokio::test]
async fn shutdown_closes_every_session() {
    let factory = DockFactory::default();
    let registry = factory.registry(DockProfile::default());

    let first = registry.acquire("/dev/ttyACM0").await.unwrap();
    let second = registry.acquire("/dev/ttyACM1").await.unwrap();
    assert_eq!(registry.keys(), vec!["/dev/ttyACM0".to_string(), "/dev/ttyACM1".to_string()]);

    registry.shutdown();
    first.closed().await;
    second.closed().await;
    assert!(!factory.with(0, DockHarness::is_open));
    assert!(!factory.with(1, DockHarness::is_open));
}

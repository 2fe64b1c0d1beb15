//! LISTEN/NOTIFY fan-out.
//!
//! Each channel has at most one listening connection, owned by one background
//! task. The task decodes every notification once and pushes a copy into each
//! subscriber's bounded queue. Subscribers are read from an atomically swapped
//! snapshot, so delivery never waits on subscribe or unsubscribe.
//!
//! Per channel the listener moves through
//! `Inactive -> Listening -> Inactive` (idle teardown),
//! `Listening -> Degraded -> Listening` (reconnect) and
//! `Listening -> Closed` (shutdown).

mod listener;
mod queue;

pub use listener::{ChannelListener, ListenerConnector, PgListenerConnector, RawNotification};
pub use queue::SubscriberQueue;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use futures::Stream;
use pgmcp_core::{IdlePolicy, NotificationSettings, PayloadFormat};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::error::NotifyError;

/// Listener state of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenerState {
    Inactive,
    Listening,
    Degraded,
    Closed,
}

/// One received notification, as delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    pub channel: String,
    pub payload: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decoded_payload: Option<Value>,
    /// Set when the channel expects JSON and the payload did not parse.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decode_error: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub source_pid: u32,
}

impl NotificationEvent {
    fn decode(raw: RawNotification, format: PayloadFormat) -> Self {
        let (decoded_payload, decode_error) = match format {
            PayloadFormat::Text => (None, None),
            PayloadFormat::Json => match serde_json::from_str::<Value>(&raw.payload) {
                Ok(v) => (Some(v), None),
                Err(e) => (None, Some(e.to_string())),
            },
        };
        Self {
            channel: raw.channel,
            payload: raw.payload,
            decoded_payload,
            decode_error,
            timestamp: Utc::now(),
            source_pid: raw.process_id,
        }
    }
}

type Queue = SubscriberQueue<NotificationEvent>;

struct ChannelShared {
    name: String,
    format: PayloadFormat,
    policy: IdlePolicy,
    subscribers: parking_lot::Mutex<Vec<(u64, Arc<Queue>)>>,
    snapshot: ArcSwap<Vec<Arc<Queue>>>,
    state: parking_lot::Mutex<ListenerState>,
    /// Wakes the listener task to re-check whether it should stop.
    wake: Notify,
    closing: AtomicBool,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl ChannelShared {
    fn new(name: &str, format: PayloadFormat, policy: IdlePolicy) -> Self {
        Self {
            name: name.to_string(),
            format,
            policy,
            subscribers: parking_lot::Mutex::new(Vec::new()),
            snapshot: ArcSwap::from_pointee(Vec::new()),
            state: parking_lot::Mutex::new(ListenerState::Inactive),
            wake: Notify::new(),
            closing: AtomicBool::new(false),
            task: parking_lot::Mutex::new(None),
        }
    }

    fn state(&self) -> ListenerState {
        *self.state.lock()
    }

    fn set_state(&self, next: ListenerState) {
        let mut state = self.state.lock();
        if *state != next {
            tracing::info!(channel = %self.name, from = ?*state, to = ?next, "listener state changed");
            *state = next;
        }
    }

    /// Add a subscriber. Returns the listener state observed under the same lock.
    fn attach(&self, id: u64, queue: Arc<Queue>) -> ListenerState {
        let mut subs = self.subscribers.lock();
        subs.push((id, queue));
        self.snapshot
            .store(Arc::new(subs.iter().map(|(_, q)| Arc::clone(q)).collect()));
        self.state()
    }

    fn detach(&self, id: u64) {
        let remaining = {
            let mut subs = self.subscribers.lock();
            subs.retain(|(sid, _)| *sid != id);
            self.snapshot
                .store(Arc::new(subs.iter().map(|(_, q)| Arc::clone(q)).collect()));
            subs.len()
        };
        tracing::debug!(channel = %self.name, remaining, "subscriber detached");
        if remaining == 0 && self.policy == IdlePolicy::Close {
            self.wake.notify_one();
        }
    }

    /// Called by the listener task: stop if closing, or idle under the close policy.
    ///
    /// The idle check and the transition to `Inactive` happen under the subscriber
    /// lock, so a concurrent [`attach`](Self::attach) either is seen here or sees `Inactive`.
    fn should_stop(&self) -> bool {
        if self.closing.load(Ordering::Acquire) {
            self.set_state(ListenerState::Closed);
            return true;
        }
        let subs = self.subscribers.lock();
        if subs.is_empty() && self.policy == IdlePolicy::Close {
            self.set_state(ListenerState::Inactive);
            return true;
        }
        false
    }

    fn deliver(&self, event: NotificationEvent) {
        let queues = self.snapshot.load();
        if queues.is_empty() {
            tracing::debug!(channel = %self.name, "no subscribers, notification discarded");
            return;
        }
        for queue in queues.iter() {
            queue.push(event.clone());
        }
    }
}

/// Owns every channel's listener and its subscribers.
pub struct NotificationHub {
    connector: Arc<dyn ListenerConnector>,
    settings: NotificationSettings,
    formats: HashMap<String, PayloadFormat>,
    channels: tokio::sync::Mutex<HashMap<String, Arc<ChannelShared>>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl NotificationHub {
    /// `formats` lists the configured channels and how their payloads decode.
    pub fn new(
        connector: Arc<dyn ListenerConnector>,
        settings: NotificationSettings,
        formats: HashMap<String, PayloadFormat>,
    ) -> Self {
        Self {
            connector,
            settings,
            formats,
            channels: tokio::sync::Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Decoding format of a configured channel, or `None` if the channel is not exposed.
    pub fn format(&self, channel: &str) -> Option<PayloadFormat> {
        self.formats.get(channel).copied()
    }

    /// Subscribe to `channel`, opening its listener if none is running.
    pub async fn subscribe(&self, channel: &str) -> Result<Subscription, NotifyError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(NotifyError::Closed);
        }
        let format = self.format(channel).unwrap_or_default();

        // held across connect so only one listener is ever opened per channel
        let mut channels = self.channels.lock().await;
        let shared = Arc::clone(
            channels
                .entry(channel.to_string())
                .or_insert_with(|| Arc::new(ChannelShared::new(channel, format, self.settings.on_idle))),
        );

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(SubscriberQueue::new(self.settings.queue_capacity));
        let state = shared.attach(id, Arc::clone(&queue));
        // detaches on drop, including when this future is cancelled mid-connect
        let subscription = Subscription {
            id,
            shared: Arc::clone(&shared),
            queue,
        };

        if state == ListenerState::Inactive {
            // reap a task that already decided to stop
            if let Some(old) = shared.task.lock().take() {
                old.abort();
            }
            match self.connector.connect(channel).await {
                Ok(listener) => {
                    shared.set_state(ListenerState::Listening);
                    tracing::info!(channel, "listener started");
                    let handle = tokio::spawn(run_listener(
                        Arc::clone(&shared),
                        Arc::clone(&self.connector),
                        listener,
                        self.backoff(),
                    ));
                    *shared.task.lock() = Some(handle);
                }
                Err(e) => {
                    drop(subscription);
                    if shared.subscribers.lock().is_empty() {
                        channels.remove(channel);
                    }
                    tracing::warn!(channel, error = %e, "failed to open listener");
                    return Err(e);
                }
            }
        }
        drop(channels);

        tracing::debug!(channel, subscriber = id, "subscribed");
        Ok(subscription)
    }

    /// Detach a subscription. Equivalent to dropping it.
    pub fn unsubscribe(&self, subscription: Subscription) {
        drop(subscription);
    }

    /// Listener state of `channel`; `Inactive` if never subscribed.
    pub async fn state(&self, channel: &str) -> ListenerState {
        if self.closed.load(Ordering::Acquire) {
            return ListenerState::Closed;
        }
        self.channels
            .lock()
            .await
            .get(channel)
            .map(|c| c.state())
            .unwrap_or(ListenerState::Inactive)
    }

    /// Stop every listener and end every subscription.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        let channels: Vec<Arc<ChannelShared>> =
            self.channels.lock().await.drain().map(|(_, c)| c).collect();

        for shared in channels {
            shared.closing.store(true, Ordering::Release);
            shared.wake.notify_one();
            let handle = shared.task.lock().take();
            if let Some(handle) = handle {
                let _ = handle.await;
            }
            shared.set_state(ListenerState::Closed);
            for (_, queue) in shared.subscribers.lock().iter() {
                queue.close();
            }
            tracing::info!(channel = %shared.name, "listener stopped");
        }
    }

    fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.settings.reconnect_initial_ms),
            Duration::from_millis(self.settings.reconnect_max_ms),
        )
    }
}

/// Exponential reconnect delay.
#[derive(Debug, Clone)]
struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            current: initial,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    fn reset(&mut self) {
        self.current = self.initial;
    }
}

async fn run_listener(
    shared: Arc<ChannelShared>,
    connector: Arc<dyn ListenerConnector>,
    mut listener: Box<dyn ChannelListener>,
    mut backoff: Backoff,
) {
    loop {
        tokio::select! {
            _ = shared.wake.notified() => {
                if shared.should_stop() {
                    break;
                }
            }
            received = listener.recv() => match received {
                Ok(raw) => shared.deliver(NotificationEvent::decode(raw, shared.format)),
                Err(e) => {
                    shared.set_state(ListenerState::Degraded);
                    match reconnect(&shared, connector.as_ref(), &mut backoff, &e).await {
                        Some(fresh) => {
                            listener = fresh;
                            backoff.reset();
                            shared.set_state(ListenerState::Listening);
                        }
                        None => break,
                    }
                }
            }
        }
    }
    tracing::info!(channel = %shared.name, "listener task exited");
}

/// Retry until connected, or `None` if asked to stop meanwhile.
async fn reconnect(
    shared: &ChannelShared,
    connector: &dyn ListenerConnector,
    backoff: &mut Backoff,
    cause: &NotifyError,
) -> Option<Box<dyn ChannelListener>> {
    tracing::warn!(channel = %shared.name, error = %cause, "listener lost, reconnecting");
    loop {
        let delay = backoff.next_delay();
        tokio::select! {
            _ = shared.wake.notified() => {
                if shared.should_stop() {
                    return None;
                }
            }
            _ = tokio::time::sleep(delay) => {}
        }
        match connector.connect(&shared.name).await {
            Ok(listener) => {
                tracing::info!(channel = %shared.name, "listener reconnected");
                return Some(listener);
            }
            Err(e) => {
                tracing::warn!(channel = %shared.name, error = %e, retry_in = ?backoff.current, "reconnect failed");
            }
        }
    }
}

/// A live subscription. Dropping it detaches the subscriber.
pub struct Subscription {
    id: u64,
    shared: Arc<ChannelShared>,
    queue: Arc<Queue>,
}

impl Subscription {
    pub fn channel(&self) -> &str {
        &self.shared.name
    }

    /// Next event, or `None` once the hub has shut down.
    pub async fn recv(&self) -> Option<NotificationEvent> {
        self.queue.recv().await
    }

    pub fn try_recv(&self) -> Option<NotificationEvent> {
        self.queue.try_recv()
    }

    /// Events lost to a full queue so far.
    pub fn dropped(&self) -> u64 {
        self.queue.dropped()
    }

    /// The subscription as a stream of events. Dropping the stream unsubscribes.
    pub fn into_stream(self) -> impl Stream<Item = NotificationEvent> + Send {
        async_stream::stream! {
            while let Some(event) = self.recv().await {
                yield event;
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.shared.detach(self.id);
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.shared.name)
            .field("id", &self.id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::StreamExt;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;

    type Feed = mpsc::UnboundedSender<Result<RawNotification, NotifyError>>;

    /// Connector whose listeners are fed from test-held senders.
    #[derive(Default)]
    struct FakeConnector {
        connects: AtomicUsize,
        fail_next: AtomicUsize,
        feeds: parking_lot::Mutex<Vec<Feed>>,
    }

    struct FakeListener {
        rx: mpsc::UnboundedReceiver<Result<RawNotification, NotifyError>>,
    }

    #[async_trait]
    impl ChannelListener for FakeListener {
        async fn recv(&mut self) -> Result<RawNotification, NotifyError> {
            match self.rx.recv().await {
                Some(item) => item,
                None => std::future::pending().await,
            }
        }
    }

    #[async_trait]
    impl ListenerConnector for FakeConnector {
        async fn connect(&self, channel: &str) -> Result<Box<dyn ChannelListener>, NotifyError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.fail_next.load(Ordering::SeqCst) > 0 {
                self.fail_next.fetch_sub(1, Ordering::SeqCst);
                return Err(NotifyError::Connect {
                    channel: channel.into(),
                    reason: "refused".into(),
                });
            }
            let (tx, rx) = mpsc::unbounded_channel();
            self.feeds.lock().push(tx);
            Ok(Box::new(FakeListener { rx }))
        }
    }

    impl FakeConnector {
        fn send(&self, payload: &str) {
            let feeds = self.feeds.lock();
            let feed = feeds.last().unwrap();
            feed.send(Ok(RawNotification {
                channel: "orders".into(),
                payload: payload.into(),
                process_id: 42,
            }))
            .unwrap();
        }

        fn fail(&self) {
            let feeds = self.feeds.lock();
            feeds
                .last()
                .unwrap()
                .send(Err(NotifyError::Receive {
                    channel: "orders".into(),
                    reason: "reset".into(),
                }))
                .unwrap();
        }
    }

    fn hub(connector: Arc<FakeConnector>, settings: NotificationSettings) -> NotificationHub {
        let formats = HashMap::from([
            ("orders".to_string(), PayloadFormat::Json),
            ("audit".to_string(), PayloadFormat::Text),
        ]);
        NotificationHub::new(connector, settings, formats)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_one_listener_per_channel() {
        let connector = Arc::new(FakeConnector::default());
        let hub = hub(Arc::clone(&connector), NotificationSettings::default());

        let a = hub.subscribe("orders").await.unwrap();
        let b = hub.subscribe("orders").await.unwrap();
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
        assert_eq!(hub.state("orders").await, ListenerState::Listening);

        connector.send(r#"{"id": 1}"#);
        let ea = a.recv().await.unwrap();
        let eb = b.recv().await.unwrap();
        assert_eq!(ea.decoded_payload, Some(serde_json::json!({"id": 1})));
        assert_eq!(ea, eb);
        assert_eq!(ea.source_pid, 42);
    }

    #[tokio::test]
    async fn test_decode_failure_is_annotated() {
        let connector = Arc::new(FakeConnector::default());
        let hub = hub(Arc::clone(&connector), NotificationSettings::default());
        let sub = hub.subscribe("orders").await.unwrap();

        connector.send("not json");
        let event = sub.recv().await.unwrap();
        assert_eq!(event.payload, "not json");
        assert!(event.decoded_payload.is_none());
        assert!(event.decode_error.is_some());
    }

    #[tokio::test]
    async fn test_last_unsubscribe_tears_down() {
        let connector = Arc::new(FakeConnector::default());
        let hub = hub(Arc::clone(&connector), NotificationSettings::default());

        let sub = hub.subscribe("orders").await.unwrap();
        hub.unsubscribe(sub);
        settle().await;
        assert_eq!(hub.state("orders").await, ListenerState::Inactive);

        let _again = hub.subscribe("orders").await.unwrap();
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
        assert_eq!(hub.state("orders").await, ListenerState::Listening);
    }

    #[tokio::test]
    async fn test_keep_warm_keeps_listener() {
        let connector = Arc::new(FakeConnector::default());
        let settings = NotificationSettings {
            on_idle: IdlePolicy::KeepWarm,
            ..Default::default()
        };
        let hub = hub(Arc::clone(&connector), settings);

        drop(hub.subscribe("orders").await.unwrap());
        settle().await;
        assert_eq!(hub.state("orders").await, ListenerState::Listening);

        // zero subscribers: the event is discarded without error
        connector.send("{}");
        settle().await;

        let sub = hub.subscribe("orders").await.unwrap();
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_full_queue_drops_oldest() {
        let connector = Arc::new(FakeConnector::default());
        let settings = NotificationSettings {
            queue_capacity: 2,
            ..Default::default()
        };
        let hub = hub(Arc::clone(&connector), settings);
        let sub = hub.subscribe("orders").await.unwrap();

        for i in 0..4 {
            connector.send(&i.to_string());
        }
        settle().await;

        assert_eq!(sub.dropped(), 2);
        assert_eq!(sub.recv().await.unwrap().payload, "2");
        assert_eq!(sub.recv().await.unwrap().payload, "3");
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_failure() {
        let connector = Arc::new(FakeConnector::default());
        let hub = hub(Arc::clone(&connector), NotificationSettings::default());
        let sub = hub.subscribe("orders").await.unwrap();

        connector.fail_next.store(1, Ordering::SeqCst);
        connector.fail();
        settle().await;
        assert_eq!(hub.state("orders").await, ListenerState::Degraded);

        tokio::time::advance(Duration::from_millis(100)).await;
        settle().await;
        tokio::time::advance(Duration::from_millis(200)).await;
        settle().await;
        assert_eq!(hub.state("orders").await, ListenerState::Listening);
        assert_eq!(connector.connects.load(Ordering::SeqCst), 3);

        connector.send("\"after\"");
        assert_eq!(sub.recv().await.unwrap().payload, "\"after\"");
    }

    #[tokio::test]
    async fn test_shutdown_ends_streams() {
        let connector = Arc::new(FakeConnector::default());
        let hub = hub(Arc::clone(&connector), NotificationSettings::default());
        let stream = hub.subscribe("audit").await.unwrap().into_stream();

        hub.shutdown().await;
        assert_eq!(hub.state("audit").await, ListenerState::Closed);
        let events: Vec<_> = stream.collect().await;
        assert!(events.is_empty());
        assert!(matches!(
            hub.subscribe("audit").await,
            Err(NotifyError::Closed)
        ));
    }

    /// Connector whose first connect never completes.
    struct StalledConnector {
        inner: FakeConnector,
        stalled: AtomicBool,
    }

    #[async_trait]
    impl ListenerConnector for StalledConnector {
        async fn connect(&self, channel: &str) -> Result<Box<dyn ChannelListener>, NotifyError> {
            if !self.stalled.swap(true, Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(10)).await;
            }
            self.inner.connect(channel).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_subscribe_does_not_pin_listener() {
        let connector = Arc::new(StalledConnector {
            inner: FakeConnector::default(),
            stalled: AtomicBool::new(false),
        });
        let hub = NotificationHub::new(
            connector.clone(),
            NotificationSettings::default(),
            HashMap::from([("orders".to_string(), PayloadFormat::Json)]),
        );

        let cancelled = tokio::time::timeout(Duration::from_secs(1), hub.subscribe("orders")).await;
        assert!(cancelled.is_err());

        let sub = hub.subscribe("orders").await.unwrap();
        assert_eq!(hub.state("orders").await, ListenerState::Listening);
        drop(sub);
        settle().await;

        assert_eq!(hub.state("orders").await, ListenerState::Inactive);
        assert_eq!(connector.inner.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connect_failure_leaves_no_subscriber() {
        let connector = Arc::new(FakeConnector::default());
        connector.fail_next.store(1, Ordering::SeqCst);
        let hub = hub(Arc::clone(&connector), NotificationSettings::default());

        assert!(matches!(
            hub.subscribe("orders").await,
            Err(NotifyError::Connect { .. })
        ));
        assert_eq!(hub.state("orders").await, ListenerState::Inactive);
    }

    #[test]
    fn test_backoff_doubles_to_cap() {
        let mut b = Backoff::new(Duration::from_millis(100), Duration::from_millis(300));
        assert_eq!(b.next_delay(), Duration::from_millis(100));
        assert_eq!(b.next_delay(), Duration::from_millis(200));
        assert_eq!(b.next_delay(), Duration::from_millis(300));
        assert_eq!(b.next_delay(), Duration::from_millis(300));
        b.reset();
        assert_eq!(b.next_delay(), Duration::from_millis(100));
    }
}

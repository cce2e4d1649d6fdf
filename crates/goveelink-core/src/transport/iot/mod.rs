// ── Cloud pub/sub client ──
//
// Owns the tracked subscription set for one broker session. Every
// subscribe, unsubscribe, publish and resubscribe holds the set's lock for
// the whole remote call, so a reconnect replay never races a caller and a
// failed call never mutates the set.

mod payload;

use std::sync::Arc;

use goveelink_api::{ConnectionEvent, PubSubConnection};
use indexmap::IndexSet;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{BusEvent, EventBus, IotMessage, Topic};
use crate::connection::{ConnectionState, ConnectionTracker};
use crate::error::CoreError;

pub use payload::IotPayloadProcessor;

/// Cloud broker client bound to the event bus.
///
/// Cheaply cloneable; clones share the connection and subscription set.
pub struct IotClient<C: PubSubConnection> {
    inner: Arc<IotClientInner<C>>,
}

impl<C: PubSubConnection> Clone for IotClient<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct IotClientInner<C> {
    connection: C,
    subscriptions: Mutex<IndexSet<String>>,
    bus: EventBus,
}

impl<C: PubSubConnection> IotClient<C> {
    pub const INPUTS: &'static [Topic] = &[Topic::IotSubscribe, Topic::IotUnsubscribe, Topic::IotPublish];
    pub const OUTPUTS: &'static [Topic] = &[
        Topic::IotSubscribed,
        Topic::IotUnsubscribed,
        Topic::IotReceived,
        Topic::IotConnection,
        Topic::IotError,
    ];

    pub fn new(connection: C, bus: EventBus) -> Self {
        Self {
            inner: Arc::new(IotClientInner {
                connection,
                subscriptions: Mutex::new(IndexSet::new()),
                bus,
            }),
        }
    }

    /// Topics currently tracked, in first-subscribed order.
    pub async fn subscriptions(&self) -> Vec<String> {
        self.inner.subscriptions.lock().await.iter().cloned().collect()
    }

    // ── Operations ───────────────────────────────────────────────────

    /// Subscribe and start tracking `topic`. Returns `false` when nothing
    /// was sent: the topic is empty or already tracked.
    pub async fn subscribe(&self, topic: &str) -> Result<bool, CoreError> {
        if topic.is_empty() {
            return Ok(false);
        }
        let mut subscriptions = self.inner.subscriptions.lock().await;
        if subscriptions.contains(topic) {
            debug!(topic, "already subscribed");
            return Ok(false);
        }
        self.inner.connection.subscribe(topic).await?;
        subscriptions.insert(topic.to_owned());
        drop(subscriptions);

        info!(topic, "subscribed");
        self.inner.bus.publish(BusEvent::IotSubscribed(topic.to_owned()));
        Ok(true)
    }

    /// Unsubscribe from a tracked topic. An empty or untracked topic is
    /// not sent upstream and returns `false`.
    pub async fn unsubscribe(&self, topic: &str) -> Result<bool, CoreError> {
        let mut subscriptions = self.inner.subscriptions.lock().await;
        if topic.is_empty() || !subscriptions.contains(topic) {
            debug!(topic, "unsubscribe for untracked topic ignored");
            return Ok(false);
        }
        self.inner.connection.unsubscribe(topic).await?;
        subscriptions.shift_remove(topic);
        drop(subscriptions);

        info!(topic, "unsubscribed");
        self.inner.bus.publish(BusEvent::IotUnsubscribed(topic.to_owned()));
        Ok(true)
    }

    pub async fn publish(&self, topic: &str, payload: &str) -> Result<(), CoreError> {
        let _guard = self.inner.subscriptions.lock().await;
        self.inner
            .connection
            .publish(topic, payload.as_bytes().to_vec())
            .await?;
        debug!(topic, bytes = payload.len(), "published");
        Ok(())
    }

    /// Reissue every tracked subscription. Failures are reported and the
    /// topic stays tracked for the next reconnect.
    pub async fn resubscribe(&self) {
        let subscriptions = self.inner.subscriptions.lock().await;
        info!(topics = subscriptions.len(), "resubscribing");
        for topic in subscriptions.iter() {
            if let Err(e) = self.inner.connection.subscribe(topic).await {
                warn!(topic = %topic, error = %e, "resubscribe failed");
                self.inner
                    .bus
                    .publish(BusEvent::IotError(format!("resubscribe {topic}: {e}")));
            }
        }
    }

    // ── Event loop ───────────────────────────────────────────────────

    /// Drive the client from broker events and bus requests until
    /// cancelled. Subscribes to the bus before returning the future.
    pub fn run(
        self,
        mut events: mpsc::Receiver<ConnectionEvent>,
        cancel: CancellationToken,
    ) -> impl Future<Output = ()> + Send {
        let mut inbox = self.inner.bus.subscribe(Self::INPUTS);
        async move {
            let mut session = ConnectionTracker::new();
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        self.close(&mut session).await;
                        break;
                    }
                    event = events.recv() => {
                        let Some(event) = event else {
                            self.on_connection_event(&mut session, ConnectionEvent::Close).await;
                            break;
                        };
                        self.on_connection_event(&mut session, event).await;
                    }
                    event = inbox.recv() => {
                        let Some(event) = event else { break };
                        self.on_bus_event(event).await;
                    }
                }
            }
            debug!("cloud client stopped");
        }
    }

    async fn on_connection_event(&self, session: &mut ConnectionTracker<()>, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connect | ConnectionEvent::Reconnect => {
                if self.transition(session, ConnectionState::Connected) {
                    self.resubscribe().await;
                }
            }
            ConnectionEvent::Offline => {
                self.transition(session, ConnectionState::Offline);
            }
            ConnectionEvent::Close => {
                self.transition(session, ConnectionState::Closed);
            }
            ConnectionEvent::Error(message) => {
                warn!(error = %message, "broker error");
                self.inner.bus.publish(BusEvent::IotError(message));
            }
            ConnectionEvent::Message { topic, payload } => match String::from_utf8(payload) {
                Ok(payload) => {
                    debug!(topic = %topic, bytes = payload.len(), "message received");
                    self.inner
                        .bus
                        .publish(BusEvent::IotReceived(IotMessage { topic, payload }));
                }
                Err(e) => warn!(topic = %topic, error = %e, "non-UTF-8 message dropped"),
            },
        }
    }

    /// Disconnect an open session and publish its `Closed` edge.
    async fn close(&self, session: &mut ConnectionTracker<()>) {
        if !session.is_connected(&()) {
            return;
        }
        if let Err(e) = self.inner.connection.disconnect().await {
            warn!(error = %e, "broker disconnect failed");
        }
        self.transition(session, ConnectionState::Closed);
    }

    fn transition(&self, session: &mut ConnectionTracker<()>, state: ConnectionState) -> bool {
        let changed = session.transition((), state);
        if changed {
            info!(state = %state, "cloud connection");
            self.inner.bus.publish(BusEvent::IotConnection(state));
        }
        changed
    }

    async fn on_bus_event(&self, event: BusEvent) {
        let result = match &event {
            BusEvent::IotSubscribe(topic) => self.subscribe(topic).await.map(drop),
            BusEvent::IotUnsubscribe(topic) => self.unsubscribe(topic).await.map(drop),
            BusEvent::IotPublish(message) => self.publish(&message.topic, &message.payload).await,
            _ => Ok(()),
        };
        if let Err(e) = result {
            warn!(topic = %event.topic(), error = %e, "cloud request failed");
            self.inner.bus.publish(BusEvent::IotError(e.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use goveelink_api::Error as ApiError;
    use pretty_assertions::assert_eq;

    use super::*;

    #[derive(Default)]
    struct FakeState {
        calls: StdMutex<Vec<(&'static str, String)>>,
        fail: AtomicBool,
    }

    #[derive(Clone, Default)]
    struct FakeConnection(Arc<FakeState>);

    impl std::ops::Deref for FakeConnection {
        type Target = FakeState;

        fn deref(&self) -> &FakeState {
            &self.0
        }
    }

    impl FakeState {
        fn record(&self, op: &'static str, topic: &str) -> Result<(), ApiError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(ApiError::MqttConnection("broker refused".into()));
            }
            self.calls.lock().unwrap().push((op, topic.to_owned()));
            Ok(())
        }
    }

    impl PubSubConnection for FakeConnection {
        async fn subscribe(&self, topic: &str) -> Result<(), ApiError> {
            self.record("subscribe", topic)
        }

        async fn unsubscribe(&self, topic: &str) -> Result<(), ApiError> {
            self.record("unsubscribe", topic)
        }

        async fn publish(&self, topic: &str, _payload: Vec<u8>) -> Result<(), ApiError> {
            self.record("publish", topic)
        }

        async fn disconnect(&self) -> Result<(), ApiError> {
            self.record("disconnect", "")
        }
    }

    fn client() -> (IotClient<FakeConnection>, FakeConnection, EventBus) {
        let fake = FakeConnection::default();
        let bus = EventBus::new();
        (IotClient::new(fake.clone(), bus.clone()), fake, bus)
    }

    fn calls(fake: &FakeState) -> Vec<(&'static str, String)> {
        fake.calls.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn duplicate_subscribe_is_sent_once() {
        let (client, fake, _bus) = client();

        assert!(client.subscribe("GA/account").await.unwrap());
        assert!(!client.subscribe("GA/account").await.unwrap());

        assert_eq!(calls(&fake), vec![("subscribe", "GA/account".to_owned())]);
        assert_eq!(client.subscriptions().await, vec!["GA/account"]);
    }

    #[tokio::test]
    async fn failed_subscribe_leaves_set_unchanged() {
        let (client, fake, _bus) = client();
        fake.fail.store(true, Ordering::SeqCst);

        assert!(client.subscribe("GA/account").await.is_err());
        assert!(client.subscriptions().await.is_empty());
    }

    #[tokio::test]
    async fn untracked_unsubscribe_is_not_sent() {
        let (client, fake, _bus) = client();

        assert!(!client.unsubscribe("GA/other").await.unwrap());
        assert!(!client.unsubscribe("").await.unwrap());
        assert!(calls(&fake).is_empty());

        client.subscribe("GA/one").await.unwrap();
        assert!(client.unsubscribe("GA/one").await.unwrap());
        assert!(client.subscriptions().await.is_empty());
    }

    #[tokio::test]
    async fn reconnect_replays_every_tracked_topic() {
        let (client, fake, bus) = client();
        let mut rx = bus.subscribe(&[Topic::IotConnection]);
        for topic in ["a", "b", "c"] {
            client.subscribe(topic).await.unwrap();
        }
        fake.calls.lock().unwrap().clear();

        let (tx, events) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(client.clone().run(events, cancel.clone()));

        tx.send(ConnectionEvent::Connect).await.unwrap();
        tx.send(ConnectionEvent::Offline).await.unwrap();
        tx.send(ConnectionEvent::Reconnect).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let replayed: Vec<String> = calls(&fake).into_iter().map(|(_, t)| t).collect();
        assert_eq!(replayed, vec!["a", "b", "c", "a", "b", "c"]);

        let states: Vec<BusEvent> = rx.drain();
        assert_eq!(states.len(), 3);
        assert!(matches!(states[0], BusEvent::IotConnection(ConnectionState::Connected)));
        assert!(matches!(states[1], BusEvent::IotConnection(ConnectionState::Offline)));

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn repeated_connect_is_one_edge() {
        let (client, _fake, bus) = client();
        let mut rx = bus.subscribe(&[Topic::IotConnection]);
        let (tx, events) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(client.run(events, cancel.clone()));

        tx.send(ConnectionEvent::Connect).await.unwrap();
        tx.send(ConnectionEvent::Reconnect).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(rx.drain().len(), 1);
        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn cancel_disconnects_and_closes_session() {
        let (client, fake, bus) = client();
        let mut rx = bus.subscribe(&[Topic::IotConnection]);
        let (tx, events) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(client.run(events, cancel.clone()));

        tx.send(ConnectionEvent::Connect).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(calls(&fake), vec![("disconnect", String::new())]);
        let states = rx.drain();
        assert_eq!(states.len(), 2);
        assert!(matches!(states[1], BusEvent::IotConnection(ConnectionState::Closed)));
    }

    #[tokio::test]
    async fn bus_requests_are_served_and_failures_reported() {
        let (client, fake, bus) = client();
        let mut rx = bus.subscribe(&[Topic::IotSubscribed, Topic::IotError, Topic::IotReceived]);
        let (tx, events) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(client.run(events, cancel.clone()));

        bus.publish(BusEvent::IotSubscribe("GA/account".into()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        fake.fail.store(true, Ordering::SeqCst);
        bus.publish(BusEvent::IotPublish(IotMessage {
            topic: "GD/device".into(),
            payload: "{}".into(),
        }));
        tx.send(ConnectionEvent::Message {
            topic: "GA/account".into(),
            payload: br#"{"device":"x"}"#.to_vec(),
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let events = rx.drain();
        assert!(matches!(&events[0], BusEvent::IotSubscribed(t) if t == "GA/account"));
        assert!(events.iter().any(|e| matches!(e, BusEvent::IotError(_))));
        assert!(events.iter().any(|e| matches!(e, BusEvent::IotReceived(m) if m.topic == "GA/account")));

        cancel.cancel();
        task.await.unwrap();
    }
}

//! AWS IoT MQTT connection with automatic reconnection.
//!
//! Wraps a `rumqttc` client and drives its event loop on a background task,
//! translating broker traffic into [`ConnectionEvent`]s on an mpsc channel.
//! Connection failures are retried with exponential backoff until the
//! [`CancellationToken`] fires.
//!
//! ```rust,ignore
//! use goveelink_api::iot::{IotConfig, MqttConnection};
//! use tokio_util::sync::CancellationToken;
//!
//! let cancel = CancellationToken::new();
//! let (conn, mut events) = MqttConnection::connect(&config, cancel.clone())?;
//! conn.subscribe("GA/account-topic").await?;
//!
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! ```

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rumqttc::{
    AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, TlsConfiguration, Transport,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Error;

// ── Channel capacities ───────────────────────────────────────────────

const EVENT_CHANNEL_CAPACITY: usize = 256;
const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// Default Govee AWS IoT endpoint.
pub const DEFAULT_IOT_HOST: &str = "aqm3wd1qlc3dy-ats.iot.us-east-1.amazonaws.com";

// ── PubSubConnection ─────────────────────────────────────────────────

/// The broker operations the cloud client needs.
///
/// Implemented by [`MqttConnection`]; tests substitute an in-memory fake.
pub trait PubSubConnection: Send + Sync + 'static {
    fn subscribe(&self, topic: &str) -> impl Future<Output = Result<(), Error>> + Send;

    fn unsubscribe(&self, topic: &str) -> impl Future<Output = Result<(), Error>> + Send;

    fn publish(&self, topic: &str, payload: Vec<u8>) -> impl Future<Output = Result<(), Error>> + Send;

    /// End the session cleanly.
    fn disconnect(&self) -> impl Future<Output = Result<(), Error>> + Send;
}

// ── ConnectionEvent ──────────────────────────────────────────────────

/// Lifecycle and traffic events produced by the MQTT event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// First successful CONNACK.
    Connect,
    /// CONNACK after a previous session dropped.
    Reconnect,
    /// The session dropped and a reconnect is pending.
    Offline,
    /// The session ended cleanly (disconnect or shutdown).
    Close,
    /// The event loop reported an error.
    Error(String),
    /// An inbound PUBLISH.
    Message { topic: String, payload: Vec<u8> },
}

// ── RetryPolicy ──────────────────────────────────────────────────────

/// Pacing for broker reconnects: doubling delays from `base`, capped at
/// `ceiling`, optionally giving up after `limit` consecutive failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub ceiling: Duration,
    pub limit: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            ceiling: Duration::from_secs(60),
            limit: None,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `failures` (zero-based).
    pub fn delay(&self, failures: u32) -> Duration {
        let factor = 1_u32.checked_shl(failures).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.ceiling)
    }

    pub fn exhausted(&self, failures: u32) -> bool {
        self.limit.is_some_and(|limit| failures >= limit)
    }
}

// ── IotConfig ────────────────────────────────────────────────────────

/// Everything needed to open the mutual-TLS session with the broker.
#[derive(Debug, Clone)]
pub struct IotConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    /// Amazon root CA (PEM).
    pub ca_cert: PathBuf,
    /// Device certificate (PEM).
    pub client_cert: PathBuf,
    /// Device private key (PEM).
    pub client_key: PathBuf,
    pub keep_alive: Duration,
    pub retry: RetryPolicy,
}

// ── MqttConnection ───────────────────────────────────────────────────

/// Handle to a live broker session.
///
/// Requests are queued on the `rumqttc` request channel; the background
/// event loop performs the network I/O.
#[derive(Clone)]
pub struct MqttConnection {
    client: AsyncClient,
}

impl MqttConnection {
    /// Load TLS material, build the client, and spawn the event loop.
    ///
    /// Returns immediately; the first `Connect` event arrives on the
    /// returned receiver once the broker acknowledges the session.
    pub fn connect(
        config: &IotConfig,
        cancel: CancellationToken,
    ) -> Result<(Self, mpsc::Receiver<ConnectionEvent>), Error> {
        let ca = read_pem(&config.ca_cert)?;
        let cert = read_pem(&config.client_cert)?;
        let key = read_pem(&config.client_key)?;

        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(config.keep_alive);
        options.set_clean_session(true);
        options.set_transport(Transport::Tls(TlsConfiguration::Simple {
            ca,
            alpn: None,
            client_auth: Some((cert, key)),
        }));

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        tracing::info!(host = %config.host, port = config.port, "starting MQTT event loop");
        let retry = config.retry;
        tokio::spawn(async move {
            mqtt_loop(eventloop, event_tx, retry, cancel).await;
        });

        Ok((Self { client }, event_rx))
    }
}

impl PubSubConnection for MqttConnection {
    async fn subscribe(&self, topic: &str) -> Result<(), Error> {
        self.client.subscribe(topic, QoS::AtMostOnce).await?;
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), Error> {
        self.client.unsubscribe(topic).await?;
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), Error> {
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await?;
        Ok(())
    }

    /// Queue a DISCONNECT; the event loop then reports `Close`.
    async fn disconnect(&self) -> Result<(), Error> {
        self.client.disconnect().await?;
        Ok(())
    }
}

fn read_pem(path: &Path) -> Result<Vec<u8>, Error> {
    std::fs::read(path)
        .map_err(|e| Error::Tls(format!("failed to read {}: {e}", path.display())))
}

// ── Background event loop ────────────────────────────────────────────

/// Main loop: poll → translate → on error, backoff → poll again.
///
/// `rumqttc` reconnects on the next `poll()` after an error, so the loop
/// only has to pace retries and track whether the session is up. A flushed
/// DISCONNECT ends the loop.
async fn mqtt_loop(
    mut eventloop: EventLoop,
    event_tx: mpsc::Sender<ConnectionEvent>,
    retry: RetryPolicy,
    cancel: CancellationToken,
) {
    let mut failures: u32 = 0;
    let mut session = SessionTracker::default();

    loop {
        let polled = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            polled = eventloop.poll() => polled,
        };

        let failed = polled.is_err();
        let closing = matches!(polled, Ok(Event::Outgoing(Outgoing::Disconnect)));
        let events = match polled {
            Ok(event) => session.on_event(&event),
            Err(e) => {
                tracing::warn!(error = %e, failures, "broker connection error");
                let mut events = vec![ConnectionEvent::Error(e.to_string())];
                events.extend(session.on_error());
                events
            }
        };
        if session.online {
            failures = 0;
        }

        for event in events {
            if event_tx.send(event).await.is_err() {
                return;
            }
        }
        if closing {
            break;
        }
        if !failed {
            continue;
        }

        if retry.exhausted(failures) {
            tracing::error!(failures, "giving up on the broker");
            break;
        }
        let delay = retry.delay(failures);
        tracing::info!(
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "reconnecting to broker"
        );
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
        failures = failures.saturating_add(1);
    }

    if session.online {
        let _ = event_tx.send(ConnectionEvent::Close).await;
    }
    tracing::debug!("broker loop exiting");
}

// ── Session tracking ─────────────────────────────────────────────────

/// Turns raw `rumqttc` events into lifecycle events.
#[derive(Debug, Default)]
struct SessionTracker {
    online: bool,
    ever_connected: bool,
}

impl SessionTracker {
    fn on_event(&mut self, event: &Event) -> Vec<ConnectionEvent> {
        match event {
            Event::Incoming(Packet::ConnAck(_)) => {
                self.online = true;
                let lifecycle = if self.ever_connected {
                    ConnectionEvent::Reconnect
                } else {
                    ConnectionEvent::Connect
                };
                self.ever_connected = true;
                vec![lifecycle]
            }
            Event::Incoming(Packet::Publish(publish)) => vec![ConnectionEvent::Message {
                topic: publish.topic.clone(),
                payload: publish.payload.to_vec(),
            }],
            Event::Incoming(Packet::Disconnect) | Event::Outgoing(Outgoing::Disconnect) => {
                if std::mem::take(&mut self.online) {
                    vec![ConnectionEvent::Close]
                } else {
                    Vec::new()
                }
            }
            _ => Vec::new(),
        }
    }

    fn on_error(&mut self) -> Option<ConnectionEvent> {
        std::mem::take(&mut self.online).then_some(ConnectionEvent::Offline)
    }
}

// ── Tests ────────────────────────────────────────────────────────────

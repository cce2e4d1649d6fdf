// ── Bridge facade ──
//
// Owns the bus, the device store, and every background task. `start`
// builds each component (so its bus subscription exists before anything is
// published), spawns it under one cancellation token, and kicks off
// authentication. `shutdown` cancels and joins everything, including a poll
// timer that is mid-wait. The radio and broker loops run under a second
// token that outlives the components, so their clean disconnects still
// reach the wire.

use std::sync::Arc;

use goveelink_api::{BtleCentral, MqttConnection, RestClient};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{BusEvent, BusReceiver, EventBus, Topic};
use crate::config::BridgeConfig;
use crate::error::CoreError;
use crate::model::DeviceCatalog;
use crate::registry::DeviceRegistry;
use crate::store::DeviceStore;
use crate::stream::DeviceStream;
use crate::transition::{DeviceChange, DeviceTransition};
use crate::transport::ble::{BleClient, BlePayloadProcessor};
use crate::transport::iot::{IotClient, IotPayloadProcessor};
use crate::transport::rest::{RestAuthenticator, RestDeviceProcessor, TokenStore};

/// Entry point for consumers.
///
/// Cheaply cloneable via `Arc<BridgeInner>`.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

struct BridgeInner {
    config: BridgeConfig,
    bus: EventBus,
    store: Arc<DeviceStore>,
    tokens: Arc<dyn TokenStore>,
    cancel: CancellationToken,
    transport_cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Bridge {
    /// Create a bridge. Nothing runs until [`start()`](Self::start).
    pub fn new(config: BridgeConfig, tokens: Arc<dyn TokenStore>) -> Self {
        Self {
            inner: Arc::new(BridgeInner {
                config,
                bus: EventBus::new(),
                store: Arc::new(DeviceStore::new()),
                tokens,
                cancel: CancellationToken::new(),
                transport_cancel: CancellationToken::new(),
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn store(&self) -> &Arc<DeviceStore> {
        &self.inner.store
    }

    /// Reactive view of every known device.
    pub fn devices(&self) -> DeviceStream {
        self.inner.store.subscribe()
    }

    /// Receive bus events for `topics`.
    pub fn events(&self, topics: &'static [Topic]) -> BusReceiver {
        self.inner.bus.subscribe(topics)
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Spawn every enabled component and request authentication.
    ///
    /// Only a malformed API base URL is fatal. A broker or adapter that
    /// cannot be opened leaves that transport off and is logged.
    pub async fn start(&self) -> Result<(), CoreError> {
        let config = &self.inner.config;
        let bus = &self.inner.bus;
        let cancel = &self.inner.cancel;
        let mut handles = self.inner.task_handles.lock().await;

        let registry = DeviceRegistry::new(
            DeviceCatalog::standard(),
            Arc::clone(&self.inner.store),
            bus.clone(),
            config.poll_interval,
        );
        handles.push(tokio::spawn(registry.run(cancel.clone())));
        handles.push(tokio::spawn(IotPayloadProcessor::new(bus.clone()).run(cancel.clone())));
        handles.push(tokio::spawn(BlePayloadProcessor::new(bus.clone()).run(cancel.clone())));

        if config.connections.api {
            let client = RestClient::new(
                &config.api_base_url,
                config.client_id.clone(),
                &config.transport,
            )?;
            let authenticator = RestAuthenticator::new(
                client,
                config.credentials.clone(),
                Arc::clone(&self.inner.tokens),
                bus.clone(),
            );
            let devices = RestDeviceProcessor::new(bus.clone(), config.ignored_devices.clone());
            handles.push(tokio::spawn(authenticator.run(cancel.clone())));
            handles.push(tokio::spawn(devices.run(cancel.clone())));
        }

        if let Some(iot) = config.iot.as_ref().filter(|_| config.iot_enabled()) {
            match MqttConnection::connect(iot, self.inner.transport_cancel.clone()) {
                Ok((connection, events)) => {
                    let client = IotClient::new(connection, bus.clone());
                    handles.push(tokio::spawn(client.run(events, cancel.clone())));
                    info!(host = %iot.host, "cloud transport started");
                }
                Err(e) => warn!(error = %e, "cloud transport unavailable"),
            }
        }

        if config.connections.ble {
            match BtleCentral::open(config.ble.clone(), self.inner.transport_cancel.clone()).await {
                Ok((central, events)) => {
                    let client = BleClient::new(central, bus.clone(), config.inspect_services);
                    handles.push(tokio::spawn(client.run(events, cancel.clone())));
                    info!("BLE transport started");
                }
                Err(e) => warn!(error = %e, "BLE transport unavailable"),
            }
        }

        debug!(tasks = handles.len(), "bridge started");
        drop(handles);

        if config.connections.api {
            bus.publish(BusEvent::RestAuthenticate {
                request_devices: true,
            });
        }
        Ok(())
    }

    /// Cancel every task and wait for them to finish.
    ///
    /// Components disconnect their open links on the way out; the
    /// transport loops stop only after that.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        self.inner.transport_cancel.cancel();
        debug!("bridge stopped");
    }

    // ── Requests ─────────────────────────────────────────────────────

    /// Ask the registry to apply `change` to a device.
    pub fn send(&self, device_id: impl Into<String>, change: DeviceChange) {
        self.inner
            .bus
            .publish(BusEvent::DeviceCommand(DeviceTransition::new(device_id, change)));
    }

    /// Request fresh state for one device, or every device when `None`.
    pub fn poll(&self, device_id: Option<String>) {
        self.inner.bus.publish(BusEvent::DevicePollRequest(device_id));
    }
}

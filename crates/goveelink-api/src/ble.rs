// Local BLE central
//
// `BleCentral` is the seam between the core BLE client and the radio: scan
// control, connect/disconnect, and frame writes keyed by MAC address. The
// btleplug-backed implementation forwards adapter and notification traffic
// as `AdapterEvent`s on an mpsc channel.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, ValueNotification, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use dashmap::DashMap;
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::Error;

type NotificationStream = Pin<Box<dyn Stream<Item = ValueNotification> + Send>>;

const EVENT_CHANNEL_CAPACITY: usize = 256;

// ── Govee GATT layout ────────────────────────────────────────────────

/// Primary control service.
pub const GOVEE_SERVICE_UUID: Uuid = Uuid::from_u128(0x0001_0203_0405_0607_0809_0a0b_0c0d_1910);
/// Characteristic that accepts 20-byte command frames.
pub const GOVEE_WRITE_UUID: Uuid = Uuid::from_u128(0x0001_0203_0405_0607_0809_0a0b_0c0d_2b11);
/// Characteristic that notifies 20-byte report frames.
pub const GOVEE_NOTIFY_UUID: Uuid = Uuid::from_u128(0x0001_0203_0405_0607_0809_0a0b_0c0d_2b10);

// ── Public types ─────────────────────────────────────────────────────

/// Radio-level events surfaced to the core BLE client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterEvent {
    /// The adapter is available and can scan.
    PoweredOn,
    /// The adapter went away.
    PoweredOff,
    /// A peripheral advertisement was seen.
    Discovered { address: String, name: Option<String> },
    /// A notification arrived on the report characteristic.
    Notification { address: String, value: Vec<u8> },
    /// A connected peripheral dropped.
    Disconnected { address: String },
}

/// GATT service description, used for connect-time introspection logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub uuid: String,
    pub characteristics: Vec<String>,
}

/// Adapter selection and timing.
#[derive(Debug, Clone)]
pub struct BleSettings {
    /// Adapter name or identifier substring. `None` picks the first adapter.
    pub adapter: Option<String>,
    pub connect_timeout: Duration,
}

impl Default for BleSettings {
    fn default() -> Self {
        Self {
            adapter: None,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Central-role operations, keyed by upper-case MAC address.
pub trait BleCentral: Send + Sync + 'static {
    fn start_scan(&self) -> impl Future<Output = Result<(), Error>> + Send;

    fn stop_scan(&self) -> impl Future<Output = Result<(), Error>> + Send;

    /// Connect, discover services, and subscribe to report notifications.
    fn connect(&self, address: &str) -> impl Future<Output = Result<(), Error>> + Send;

    fn disconnect(&self, address: &str) -> impl Future<Output = Result<(), Error>> + Send;

    fn services(&self, address: &str) -> impl Future<Output = Result<Vec<ServiceInfo>, Error>> + Send;

    fn write(&self, address: &str, frame: &[u8]) -> impl Future<Output = Result<(), Error>> + Send;
}

/// Canonical address form used as a map key everywhere.
pub fn normalize_address(address: &str) -> String {
    address.trim().to_ascii_uppercase()
}

// ── BtleCentral ──────────────────────────────────────────────────────

/// btleplug-backed central.
pub struct BtleCentral {
    adapter: Adapter,
    peripherals: Arc<DashMap<String, Peripheral>>,
    events: mpsc::Sender<AdapterEvent>,
    settings: BleSettings,
    cancel: CancellationToken,
}

impl BtleCentral {
    /// Acquire an adapter and start forwarding its events.
    ///
    /// `PoweredOn` is queued as the first event once the adapter is held.
    pub async fn open(
        settings: BleSettings,
        cancel: CancellationToken,
    ) -> Result<(Self, mpsc::Receiver<AdapterEvent>), Error> {
        let manager = Manager::new().await?;
        let adapter = select_adapter(&manager, settings.adapter.as_deref()).await?;
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let central_events = adapter.events().await?;
        let peripherals = Arc::new(DashMap::new());

        let _ = event_tx.send(AdapterEvent::PoweredOn).await;

        let task_adapter = adapter.clone();
        let task_peripherals = Arc::clone(&peripherals);
        let task_tx = event_tx.clone();
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            forward_central_events(central_events, task_adapter, task_peripherals, task_tx, task_cancel)
                .await;
        });

        Ok((
            Self {
                adapter,
                peripherals,
                events: event_tx,
                settings,
                cancel,
            },
            event_rx,
        ))
    }

    fn peripheral(&self, address: &str) -> Result<Peripheral, Error> {
        self.peripherals
            .get(&normalize_address(address))
            .map(|p| p.value().clone())
            .ok_or_else(|| Error::PeripheralNotFound(address.to_owned()))
    }
}

impl BleCentral for BtleCentral {
    async fn start_scan(&self) -> Result<(), Error> {
        self.adapter.start_scan(ScanFilter::default()).await?;
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), Error> {
        self.adapter.stop_scan().await?;
        Ok(())
    }

    async fn connect(&self, address: &str) -> Result<(), Error> {
        let peripheral = self.peripheral(address)?;
        let address = normalize_address(address);

        timeout(self.settings.connect_timeout, async {
            if !peripheral.is_connected().await? {
                peripheral.connect().await?;
            }
            peripheral.discover_services().await
        })
        .await
        .map_err(|_| Error::ConnectTimeout {
            address: address.clone(),
            timeout_secs: self.settings.connect_timeout.as_secs(),
        })??;

        let notify = find_characteristic(&peripheral, &address, GOVEE_NOTIFY_UUID)?;
        if !notify
            .properties
            .intersects(CharPropFlags::NOTIFY | CharPropFlags::INDICATE)
        {
            return Err(Error::CharacteristicNotFound {
                address,
                uuid: GOVEE_NOTIFY_UUID.to_string(),
            });
        }

        let stream = peripheral.notifications().await?;
        peripheral.subscribe(&notify).await?;

        let task_tx = self.events.clone();
        let task_cancel = self.cancel.clone();
        tokio::spawn(async move {
            forward_notifications(stream, address, task_tx, task_cancel).await;
        });
        Ok(())
    }

    async fn disconnect(&self, address: &str) -> Result<(), Error> {
        let peripheral = self.peripheral(address)?;
        peripheral.disconnect().await?;
        Ok(())
    }

    async fn services(&self, address: &str) -> Result<Vec<ServiceInfo>, Error> {
        let peripheral = self.peripheral(address)?;
        Ok(peripheral
            .services()
            .into_iter()
            .map(|service| ServiceInfo {
                uuid: service.uuid.to_string(),
                characteristics: service
                    .characteristics
                    .iter()
                    .map(|c| c.uuid.to_string())
                    .collect(),
            })
            .collect())
    }

    async fn write(&self, address: &str, frame: &[u8]) -> Result<(), Error> {
        let peripheral = self.peripheral(address)?;
        let characteristic = find_characteristic(&peripheral, address, GOVEE_WRITE_UUID)?;
        let write_type = if characteristic
            .properties
            .contains(CharPropFlags::WRITE_WITHOUT_RESPONSE)
        {
            WriteType::WithoutResponse
        } else {
            WriteType::WithResponse
        };
        peripheral.write(&characteristic, frame, write_type).await?;
        Ok(())
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

async fn select_adapter(manager: &Manager, requested: Option<&str>) -> Result<Adapter, Error> {
    let adapters = manager.adapters().await?;

    let Some(requested) = requested else {
        return adapters.into_iter().next().ok_or(Error::NoAdapter);
    };

    for adapter in adapters {
        let info = adapter.adapter_info().await?;
        if info.to_ascii_lowercase().contains(&requested.to_ascii_lowercase()) {
            tracing::debug!(adapter = %info, "selected BLE adapter");
            return Ok(adapter);
        }
    }
    Err(Error::NoAdapter)
}

fn find_characteristic(
    peripheral: &Peripheral,
    address: &str,
    uuid: Uuid,
) -> Result<Characteristic, Error> {
    peripheral
        .characteristics()
        .into_iter()
        .find(|c| c.uuid == uuid)
        .ok_or_else(|| Error::CharacteristicNotFound {
            address: address.to_owned(),
            uuid: uuid.to_string(),
        })
}

async fn address_of(adapter: &Adapter, id: &PeripheralId) -> Option<(Peripheral, String)> {
    match adapter.peripheral(id).await {
        Ok(peripheral) => {
            let address = normalize_address(&peripheral.address().to_string());
            Some((peripheral, address))
        }
        Err(e) => {
            tracing::debug!(error = %e, "peripheral vanished before lookup");
            None
        }
    }
}

async fn forward_central_events(
    mut central_events: Pin<Box<dyn Stream<Item = CentralEvent> + Send>>,
    adapter: Adapter,
    peripherals: Arc<DashMap<String, Peripheral>>,
    events: mpsc::Sender<AdapterEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = central_events.next() => event,
        };

        // BlueZ and CoreBluetooth report a cached peripheral once; later
        // advertisements arrive as updates.
        let forwarded = match event {
            Some(CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id)) => {
                let Some((peripheral, address)) = address_of(&adapter, &id).await else {
                    continue;
                };
                let name = peripheral
                    .properties()
                    .await
                    .ok()
                    .flatten()
                    .and_then(|p| p.local_name);
                peripherals.insert(address.clone(), peripheral);
                AdapterEvent::Discovered { address, name }
            }
            Some(CentralEvent::DeviceDisconnected(id)) => {
                let Some((_, address)) = address_of(&adapter, &id).await else {
                    continue;
                };
                AdapterEvent::Disconnected { address }
            }
            Some(_) => continue,
            None => {
                tracing::warn!("BLE adapter event stream ended");
                let _ = events.send(AdapterEvent::PoweredOff).await;
                break;
            }
        };

        if events.send(forwarded).await.is_err() {
            break;
        }
    }
    tracing::debug!("BLE adapter loop exiting");
}

async fn forward_notifications(
    mut stream: NotificationStream,
    address: String,
    events: mpsc::Sender<AdapterEvent>,
    cancel: CancellationToken,
) {
    loop {
        let notification = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            n = stream.next() => n,
        };
        let Some(notification) = notification else {
            break;
        };
        if notification.uuid != GOVEE_NOTIFY_UUID {
            continue;
        }
        let event = AdapterEvent::Notification {
            address: address.clone(),
            value: notification.value,
        };
        if events.send(event).await.is_err() {
            break;
        }
    }
    tracing::trace!(address = %address, "notification stream closed");
}

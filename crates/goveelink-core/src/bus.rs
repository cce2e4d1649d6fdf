// ── Event bus ──
//
// Typed publish/subscribe fabric shared by every component. Each event has
// exactly one `Topic`; components declare the topics they consume and
// produce as `INPUTS`/`OUTPUTS` constants, and subscribe with a topic
// filter. Backed by a tokio broadcast channel; payloads are cheap to clone.

use std::sync::Arc;

use goveelink_api::rest::AppDevice;
use serde::Serialize;
use strum::{Display, EnumIter, EnumString, IntoStaticStr};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use crate::codec::Frame;
use crate::connection::ConnectionState;
use crate::model::{DeviceConfig, DeviceTarget, GoveeDevice, RawDeviceState};
use crate::transition::DeviceTransition;
use crate::transport::rest::{ApiStatus, OAuthData};

pub(crate) const BUS_CAPACITY: usize = 1024;

// ── Topics ───────────────────────────────────────────────────────────

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, IntoStaticStr, Serialize,
)]
pub enum Topic {
    #[strum(serialize = "BLE.Subscribe")]
    BleSubscribe,
    #[strum(serialize = "BLE.CONNECTION")]
    BleConnection,
    #[strum(serialize = "BLE.PERIPHERAL.Discovered")]
    BlePeripheralDiscovered,
    #[strum(serialize = "BLE.PERIPHERAL.Connection")]
    BlePeripheralConnection,
    #[strum(serialize = "BLE.PERIPHERAL.Failure")]
    BlePeripheralFailure,
    #[strum(serialize = "BLE.PERIPHERAL.Receive")]
    BlePeripheralReceive,
    #[strum(serialize = "BLE.PERIPHERAL.Send")]
    BlePeripheralSend,

    #[strum(serialize = "IOT.Subscribe")]
    IotSubscribe,
    #[strum(serialize = "IOT.Subscribed")]
    IotSubscribed,
    #[strum(serialize = "IOT.Unsubscribe")]
    IotUnsubscribe,
    #[strum(serialize = "IOT.Unsubscribed")]
    IotUnsubscribed,
    #[strum(serialize = "IOT.Publish")]
    IotPublish,
    #[strum(serialize = "IOT.Received")]
    IotReceived,
    #[strum(serialize = "IOT.CONNECTION")]
    IotConnection,
    #[strum(serialize = "IOT.Error")]
    IotError,
    #[strum(serialize = "IOT.DEVICE.Send")]
    IotDeviceSend,

    #[strum(serialize = "REST.AUTHENTICATION.Authenticate")]
    RestAuthenticate,
    #[strum(serialize = "REST.AUTHENTICATION.Authenticated")]
    RestAuthenticated,
    #[strum(serialize = "REST.AUTHENTICATION.Failure")]
    RestAuthenticationFailure,
    #[strum(serialize = "REST.REQUEST.Devices")]
    RestRequestDevices,
    #[strum(serialize = "REST.RESPONSE.DeviceList")]
    RestDeviceList,
    #[strum(serialize = "REST.RESPONSE.Failure")]
    RestResponseFailure,

    #[strum(serialize = "DEVICE.RECEIVED.Settings")]
    DeviceSettingsReceived,
    #[strum(serialize = "DEVICE.RECEIVED.State")]
    DeviceStateReceived,
    #[strum(serialize = "DEVICE.Command")]
    DeviceCommand,
    #[strum(serialize = "DEVICE.REQUEST.Poll")]
    DevicePollRequest,
    #[strum(serialize = "DEVICE.REQUEST.State")]
    DeviceStateRequest,
    #[strum(serialize = "DEVICE.Discovered")]
    DeviceDiscovered,
    #[strum(serialize = "DEVICE.Updated")]
    DeviceUpdated,
}

// ── Payloads ─────────────────────────────────────────────────────────

/// Ask the BLE client to connect to `address` whenever it is seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BleSubscription {
    pub device_id: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeripheralInfo {
    pub address: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeripheralConnection {
    pub address: String,
    pub device_id: Option<String>,
    pub state: ConnectionState,
}

/// A connect, disconnect, or write against a peripheral failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeripheralFailure {
    pub address: String,
    pub device_id: Option<String>,
    pub operation: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeripheralPayload {
    pub address: String,
    pub device_id: String,
    pub frame: Vec<u8>,
}

/// Frames to write to a peripheral, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeripheralCommand {
    pub address: String,
    pub device_id: String,
    pub frames: Vec<Frame>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IotMessage {
    pub topic: String,
    pub payload: String,
}

/// Command frames for a cloud-routed device, before envelope wrapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IotCommand {
    pub device_id: String,
    pub topic: String,
    pub frames: Vec<Frame>,
}

// ── BusEvent ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum BusEvent {
    BleSubscribe(BleSubscription),
    BleConnection(ConnectionState),
    BlePeripheralDiscovered(PeripheralInfo),
    BlePeripheralConnection(PeripheralConnection),
    BlePeripheralFailure(PeripheralFailure),
    BlePeripheralReceive(PeripheralPayload),
    BlePeripheralSend(PeripheralCommand),

    IotSubscribe(String),
    IotSubscribed(String),
    IotUnsubscribe(String),
    IotUnsubscribed(String),
    IotPublish(IotMessage),
    IotReceived(IotMessage),
    IotConnection(ConnectionState),
    IotError(String),
    IotDeviceSend(IotCommand),

    RestAuthenticate { request_devices: bool },
    RestAuthenticated(OAuthData),
    RestAuthenticationFailure(ApiStatus),
    RestRequestDevices,
    RestDeviceList(Arc<Vec<AppDevice>>),
    /// A login-gated request failed after authentication succeeded.
    RestResponseFailure(ApiStatus),

    DeviceSettingsReceived(DeviceConfig),
    DeviceStateReceived(RawDeviceState),
    DeviceCommand(DeviceTransition),
    /// `None` polls every registered device.
    DevicePollRequest(Option<String>),
    DeviceStateRequest(DeviceTarget),
    DeviceDiscovered(Arc<GoveeDevice>),
    DeviceUpdated(Arc<GoveeDevice>),
}

impl BusEvent {
    pub fn topic(&self) -> Topic {
        match self {
            Self::BleSubscribe(_) => Topic::BleSubscribe,
            Self::BleConnection(_) => Topic::BleConnection,
            Self::BlePeripheralDiscovered(_) => Topic::BlePeripheralDiscovered,
            Self::BlePeripheralConnection(_) => Topic::BlePeripheralConnection,
            Self::BlePeripheralFailure(_) => Topic::BlePeripheralFailure,
            Self::BlePeripheralReceive(_) => Topic::BlePeripheralReceive,
            Self::BlePeripheralSend(_) => Topic::BlePeripheralSend,
            Self::IotSubscribe(_) => Topic::IotSubscribe,
            Self::IotSubscribed(_) => Topic::IotSubscribed,
            Self::IotUnsubscribe(_) => Topic::IotUnsubscribe,
            Self::IotUnsubscribed(_) => Topic::IotUnsubscribed,
            Self::IotPublish(_) => Topic::IotPublish,
            Self::IotReceived(_) => Topic::IotReceived,
            Self::IotConnection(_) => Topic::IotConnection,
            Self::IotError(_) => Topic::IotError,
            Self::IotDeviceSend(_) => Topic::IotDeviceSend,
            Self::RestAuthenticate { .. } => Topic::RestAuthenticate,
            Self::RestAuthenticated(_) => Topic::RestAuthenticated,
            Self::RestAuthenticationFailure(_) => Topic::RestAuthenticationFailure,
            Self::RestRequestDevices => Topic::RestRequestDevices,
            Self::RestDeviceList(_) => Topic::RestDeviceList,
            Self::RestResponseFailure(_) => Topic::RestResponseFailure,
            Self::DeviceSettingsReceived(_) => Topic::DeviceSettingsReceived,
            Self::DeviceStateReceived(_) => Topic::DeviceStateReceived,
            Self::DeviceCommand(_) => Topic::DeviceCommand,
            Self::DevicePollRequest(_) => Topic::DevicePollRequest,
            Self::DeviceStateRequest(_) => Topic::DeviceStateRequest,
            Self::DeviceDiscovered(_) => Topic::DeviceDiscovered,
            Self::DeviceUpdated(_) => Topic::DeviceUpdated,
        }
    }
}

// ── EventBus ─────────────────────────────────────────────────────────

/// Cloneable publish handle.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BusEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Publish to every current subscriber. Publishing with no subscribers
    /// is not an error.
    pub fn publish(&self, event: BusEvent) {
        tracing::trace!(topic = %event.topic(), "publish");
        let _ = self.tx.send(event);
    }

    /// Receive every event whose topic is in `topics`.
    pub fn subscribe(&self, topics: &'static [Topic]) -> BusReceiver {
        BusReceiver {
            rx: self.tx.subscribe(),
            topics,
            missed: 0,
        }
    }
}

/// Topic-filtered receiving end of the bus.
#[derive(Debug)]
pub struct BusReceiver {
    rx: broadcast::Receiver<BusEvent>,
    topics: &'static [Topic],
    missed: u64,
}

impl BusReceiver {
    /// Next matching event. `None` once every publisher is gone.
    ///
    /// A lagging receiver logs how many events it missed, adds them to
    /// [`take_missed`](Self::take_missed), and carries on.
    pub async fn recv(&mut self) -> Option<BusEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.topics.contains(&event.topic()) => return Some(event),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => self.lagged(skipped),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<BusEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if self.topics.contains(&event.topic()) => return Some(event),
                Ok(_) => {}
                Err(TryRecvError::Lagged(skipped)) => self.lagged(skipped),
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// Events dropped by lag since the last call, then reset to zero.
    pub fn take_missed(&mut self) -> u64 {
        std::mem::take(&mut self.missed)
    }

    fn lagged(&mut self, skipped: u64) {
        self.missed = self.missed.saturating_add(skipped);
        tracing::warn!(skipped, topics = ?self.topics, "event bus receiver lagged");
    }

    /// Drain every matching event currently queued.
    pub fn drain(&mut self) -> Vec<BusEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

// ── Device registry ──
//
// Sole owner of every `GoveeDevice`. Creates devices on first settings,
// feeds state updates through their fragments, routes commands to a live
// transport, and drives the global poll. Everyone else reads through the
// `DeviceStore`. Events lost to bus lag are recovered by refetching the
// device list and polling every device.

mod poll;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{BusEvent, BusReceiver, EventBus, PeripheralConnection, Topic};
use crate::connection::{ConnectionState, ConnectionTracker};
use crate::model::{DeviceCatalog, DeviceConfig, GoveeDevice, RawDeviceState};
use crate::store::DeviceStore;
use crate::transition::{DeviceTransition, Route};

pub use poll::{DEFAULT_POLL_INTERVAL, PollScheduler};

pub struct DeviceRegistry {
    devices: HashMap<String, GoveeDevice>,
    catalog: DeviceCatalog,
    store: Arc<DeviceStore>,
    bus: EventBus,
    inbox: BusReceiver,
    peripherals: ConnectionTracker<String>,
    iot: ConnectionState,
    scheduler: PollScheduler,
}

impl DeviceRegistry {
    pub const INPUTS: &'static [Topic] = &[
        Topic::DeviceSettingsReceived,
        Topic::DeviceStateReceived,
        Topic::DeviceCommand,
        Topic::DevicePollRequest,
        Topic::BlePeripheralConnection,
        Topic::IotConnection,
    ];
    pub const OUTPUTS: &'static [Topic] = &[
        Topic::DeviceDiscovered,
        Topic::DeviceUpdated,
        Topic::DeviceStateRequest,
        Topic::BlePeripheralSend,
        Topic::IotDeviceSend,
        Topic::RestRequestDevices,
    ];

    /// Subscribes immediately, so nothing published after construction is
    /// missed even if `run` starts later. The first poll fires one
    /// `poll_interval` after construction.
    pub fn new(
        catalog: DeviceCatalog,
        store: Arc<DeviceStore>,
        bus: EventBus,
        poll_interval: Duration,
    ) -> Self {
        Self {
            devices: HashMap::new(),
            catalog,
            store,
            inbox: bus.subscribe(Self::INPUTS),
            bus,
            peripherals: ConnectionTracker::new(),
            iot: ConnectionState::Closed,
            scheduler: PollScheduler::new(poll_interval),
        }
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn device(&self, device_id: &str) -> Option<&GoveeDevice> {
        self.devices.get(device_id)
    }

    /// Process events and poll ticks until cancelled or the bus closes.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            interval_secs = self.scheduler.interval().as_secs(),
            "device registry started"
        );
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = self.scheduler.wait() => self.poll_all(),
                event = self.inbox.recv() => {
                    let Some(event) = event else { break };
                    self.handle(event);
                    let missed = self.inbox.take_missed();
                    if missed > 0 {
                        warn!(missed, "registry missed bus events, refreshing every device");
                        self.bus.publish(BusEvent::RestRequestDevices);
                        self.poll_all();
                    }
                }
            }
        }
        debug!("device registry stopped");
    }

    pub fn handle(&mut self, event: BusEvent) {
        match event {
            BusEvent::DeviceSettingsReceived(config) => self.on_settings_received(&config),
            BusEvent::DeviceStateReceived(state) => self.on_state_received(&state),
            BusEvent::DeviceCommand(transition) => self.on_command(&transition),
            BusEvent::DevicePollRequest(device_id) => self.on_poll_request(device_id.as_deref()),
            BusEvent::BlePeripheralConnection(connection) => self.on_peripheral(connection),
            BusEvent::IotConnection(state) => self.iot = state,
            _ => {}
        }
    }

    // ── Handlers ─────────────────────────────────────────────────────

    pub fn on_settings_received(&mut self, config: &DeviceConfig) {
        if config.device_id.is_empty() || self.devices.contains_key(&config.device_id) {
            return;
        }
        let Some(device) = self.catalog.create(config) else {
            warn!(
                device_id = %config.device_id,
                model = %config.model,
                "unsupported device model, skipping"
            );
            return;
        };
        info!(
            device_id = %device.device_id,
            model = %device.model,
            kind = %device.kind,
            name = %device.name,
            "device discovered"
        );

        let target = device.target();
        let snapshot = Arc::new(device.clone());
        self.devices.insert(device.device_id.clone(), device);
        self.store.upsert(Arc::clone(&snapshot));
        self.bus.publish(BusEvent::DeviceDiscovered(snapshot));
        self.bus.publish(BusEvent::DeviceStateRequest(target));
    }

    pub fn on_state_received(&mut self, state: &RawDeviceState) {
        let Some(device) = self.devices.get_mut(&state.device_id) else {
            info!(device_id = %state.device_id, "state for unknown device dropped");
            return;
        };
        device.parse(state);
        debug!(
            device_id = %device.device_id,
            frames = state.commands.len(),
            "device state updated"
        );

        let snapshot = Arc::new(device.clone());
        self.store.upsert(Arc::clone(&snapshot));
        self.bus.publish(BusEvent::DeviceUpdated(snapshot));
    }

    pub fn on_command(&mut self, transition: &DeviceTransition) {
        let Some(device) = self.devices.get_mut(&transition.device_id) else {
            debug!(device_id = %transition.device_id, "command for unknown device dropped");
            return;
        };
        let Some(route) = route_for(device, &self.peripherals, self.iot) else {
            debug!(
                device_id = %transition.device_id,
                "no connected transport for device, command dropped"
            );
            return;
        };
        if let Err(e) = transition.apply(device, &route, &self.bus) {
            warn!(device_id = %transition.device_id, error = %e, "device command rejected");
            return;
        }

        let snapshot = Arc::new(device.clone());
        self.store.upsert(snapshot);
    }

    /// `Some(id)` polls one device now; `None` polls everything and
    /// restarts the global timer.
    pub fn on_poll_request(&mut self, device_id: Option<&str>) {
        match device_id {
            Some(id) => match self.devices.get(id) {
                Some(device) => self.bus.publish(BusEvent::DeviceStateRequest(device.target())),
                None => debug!(device_id = %id, "poll for unknown device ignored"),
            },
            None => self.poll_all(),
        }
    }

    fn on_peripheral(&mut self, connection: PeripheralConnection) {
        self.peripherals.transition(connection.address, connection.state);
    }

    fn poll_all(&mut self) {
        debug!(devices = self.devices.len(), "polling all devices");
        for device in self.devices.values() {
            self.bus.publish(BusEvent::DeviceStateRequest(device.target()));
        }
        self.scheduler.reset();
    }
}

/// A connected BLE peripheral wins over the cloud; neither means no route.
fn route_for(
    device: &GoveeDevice,
    peripherals: &ConnectionTracker<String>,
    iot: ConnectionState,
) -> Option<Route> {
    if let Some(address) = device
        .ble_address
        .as_ref()
        .filter(|a| peripherals.is_connected(a))
    {
        return Some(Route::Ble {
            address: address.clone(),
        });
    }
    device
        .iot_topic
        .as_ref()
        .filter(|_| iot.is_connected())
        .map(|topic| Route::Iot {
            topic: topic.clone(),
        })
}

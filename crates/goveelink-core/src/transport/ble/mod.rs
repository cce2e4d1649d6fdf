// ── BLE client ──
//
// Adapter power drives scanning; a discovered peripheral with a pending
// subscription gets exactly one connection attempt. Attempts run inline in
// the event loop with the scan stopped, so at most one peripheral is ever
// mid-connect. A subscription for an address the radio has already seen
// connects right away instead of waiting for another advertisement.

mod payload;

use std::collections::{HashMap, HashSet};

use goveelink_api::ble::normalize_address;
use goveelink_api::{AdapterEvent, BleCentral};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::bus::{
    BleSubscription, BusEvent, BusReceiver, EventBus, PeripheralCommand, PeripheralConnection,
    PeripheralFailure, PeripheralInfo, PeripheralPayload, Topic,
};
use crate::codec;
use crate::connection::{ConnectionState, ConnectionTracker};
use crate::error::CoreError;

pub use payload::BlePayloadProcessor;

pub struct BleClient<C: BleCentral> {
    central: C,
    bus: EventBus,
    inbox: BusReceiver,
    /// Address -> device id.
    subscriptions: HashMap<String, String>,
    /// Addresses advertised since the adapter came up.
    seen: HashSet<String>,
    peripherals: ConnectionTracker<String>,
    adapter: ConnectionTracker<()>,
    scanning: bool,
    inspect_services: bool,
}

impl<C: BleCentral> BleClient<C> {
    pub const INPUTS: &'static [Topic] = &[Topic::BleSubscribe, Topic::BlePeripheralSend];
    pub const OUTPUTS: &'static [Topic] = &[
        Topic::BleConnection,
        Topic::BlePeripheralDiscovered,
        Topic::BlePeripheralConnection,
        Topic::BlePeripheralFailure,
        Topic::BlePeripheralReceive,
    ];

    pub fn new(central: C, bus: EventBus, inspect_services: bool) -> Self {
        Self {
            central,
            inbox: bus.subscribe(Self::INPUTS),
            bus,
            subscriptions: HashMap::new(),
            seen: HashSet::new(),
            peripherals: ConnectionTracker::new(),
            adapter: ConnectionTracker::new(),
            scanning: false,
            inspect_services,
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    pub async fn run(mut self, mut events: mpsc::Receiver<AdapterEvent>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                event = events.recv() => {
                    let Some(event) = event else {
                        self.on_adapter_event(AdapterEvent::PoweredOff).await;
                        break;
                    };
                    self.on_adapter_event(event).await;
                }
                event = self.inbox.recv() => {
                    let Some(event) = event else { break };
                    self.on_bus_event(event).await;
                }
            }
        }
        if self.scanning {
            self.stop_scan().await;
        }
        self.disconnect_all().await;
        debug!("BLE client stopped");
    }

    /// Drop every open peripheral link and publish its `Closed` edge.
    pub async fn disconnect_all(&mut self) {
        let active: Vec<String> = self.peripherals.active().cloned().collect();
        for address in active {
            if let Err(e) = self.central.disconnect(&address).await {
                let err = CoreError::from(e);
                warn!(address = %address, error = %err, "disconnect failed");
                self.fail(&address, "disconnect", &err);
            }
            self.set_peripheral(&address, ConnectionState::Closed);
        }
    }

    // ── Adapter events ───────────────────────────────────────────────

    pub async fn on_adapter_event(&mut self, event: AdapterEvent) {
        match event {
            AdapterEvent::PoweredOn => {
                self.set_adapter(ConnectionState::Connected);
                self.start_scan().await;
            }
            AdapterEvent::PoweredOff => {
                self.set_adapter(ConnectionState::Offline);
                self.seen.clear();
                if self.scanning {
                    self.stop_scan().await;
                }
                let active: Vec<String> = self.peripherals.active().cloned().collect();
                for address in active {
                    self.set_peripheral(&address, ConnectionState::Closed);
                }
            }
            AdapterEvent::Discovered { address, name } => self.on_discovered(address, name).await,
            AdapterEvent::Notification { address, value } => {
                let Some(device_id) = self.subscriptions.get(&address) else {
                    return;
                };
                self.bus.publish(BusEvent::BlePeripheralReceive(PeripheralPayload {
                    address,
                    device_id: device_id.clone(),
                    frame: value,
                }));
            }
            AdapterEvent::Disconnected { address } => {
                if self.set_peripheral(&address, ConnectionState::Closed) && !self.scanning {
                    self.start_scan().await;
                }
            }
        }
    }

    async fn on_discovered(&mut self, address: String, name: Option<String>) {
        if self.seen.insert(address.clone()) {
            self.bus.publish(BusEvent::BlePeripheralDiscovered(PeripheralInfo {
                address: address.clone(),
                name,
            }));
        }

        if !self.subscriptions.contains_key(&address) {
            trace!(address = %address, "unknown address");
            return;
        }
        if self.peripherals.is_connected(&address) {
            debug!(address = %address, "already connected");
            return;
        }
        self.try_connect(&address).await;
    }

    async fn try_connect(&mut self, address: &str) {
        info!(address = %address, "connecting to peripheral");
        self.stop_scan().await;
        self.set_peripheral(address, ConnectionState::Connecting);

        match self.connect(address).await {
            Ok(()) => {
                self.set_peripheral(address, ConnectionState::Connected);
                if self.has_pending_subscriptions() {
                    self.start_scan().await;
                }
            }
            Err(e) => {
                warn!(address = %address, error = %e, "peripheral connection failed");
                self.fail(address, "connect", &e);
                self.set_peripheral(address, ConnectionState::Closed);
                self.start_scan().await;
            }
        }
    }

    async fn connect(&self, address: &str) -> Result<(), CoreError> {
        self.central.connect(address).await?;
        if self.inspect_services {
            for service in self.central.services(address).await? {
                debug!(
                    address,
                    service = %service.uuid,
                    characteristics = ?service.characteristics,
                    "peripheral service"
                );
            }
        }
        Ok(())
    }

    fn has_pending_subscriptions(&self) -> bool {
        self.subscriptions
            .keys()
            .any(|a| !self.peripherals.is_connected(a))
    }

    // ── Bus requests ─────────────────────────────────────────────────

    async fn on_bus_event(&mut self, event: BusEvent) {
        match event {
            BusEvent::BleSubscribe(subscription) => self.subscribe(subscription).await,
            BusEvent::BlePeripheralSend(command) => self.send(&command).await,
            _ => {}
        }
    }

    async fn subscribe(&mut self, subscription: BleSubscription) {
        let address = normalize_address(&subscription.address);
        info!(device_id = %subscription.device_id, address = %address, "BLE subscription");
        self.subscriptions
            .insert(address.clone(), subscription.device_id);
        if !self.adapter.is_connected(&()) {
            return;
        }
        if self.seen.contains(&address) && !self.peripherals.is_connected(&address) {
            self.try_connect(&address).await;
        } else if !self.scanning {
            self.start_scan().await;
        }
    }

    async fn send(&self, command: &PeripheralCommand) {
        if !self.peripherals.is_connected(&command.address) {
            debug!(address = %command.address, "peripheral not connected, frames dropped");
            return;
        }
        for frame in &command.frames {
            debug!(address = %command.address, frame = %codec::to_hex(frame), "writing frame");
            if let Err(e) = self.central.write(&command.address, frame).await {
                let err = CoreError::from(e);
                warn!(address = %command.address, error = %err, "write failed");
                self.fail(&command.address, "write", &err);
                return;
            }
        }
        debug!(address = %command.address, frames = command.frames.len(), "frames written");
    }

    // ── State helpers ────────────────────────────────────────────────

    fn set_adapter(&mut self, state: ConnectionState) {
        if self.adapter.transition((), state) {
            info!(state = %state, "BLE adapter");
            self.bus.publish(BusEvent::BleConnection(state));
        }
    }

    fn set_peripheral(&mut self, address: &str, state: ConnectionState) -> bool {
        let changed = self.peripherals.transition(address.to_owned(), state);
        if changed {
            info!(address, state = %state, "peripheral connection");
            self.bus
                .publish(BusEvent::BlePeripheralConnection(PeripheralConnection {
                    address: address.to_owned(),
                    device_id: self.subscriptions.get(address).cloned(),
                    state,
                }));
        }
        changed
    }

    fn fail(&self, address: &str, operation: &'static str, err: &CoreError) {
        self.bus.publish(BusEvent::BlePeripheralFailure(PeripheralFailure {
            address: address.to_owned(),
            device_id: self.subscriptions.get(address).cloned(),
            operation,
            message: err.to_string(),
        }));
    }

    async fn start_scan(&mut self) {
        match self.central.start_scan().await {
            Ok(()) => {
                self.scanning = true;
                debug!("scan started");
            }
            Err(e) => warn!(error = %e, "failed to start scan"),
        }
    }

    async fn stop_scan(&mut self) {
        if let Err(e) = self.central.stop_scan().await {
            warn!(error = %e, "failed to stop scan");
        }
        self.scanning = false;
        debug!("scan stopped");
    }
}

// ── BLE payload processor ──
//
// Translates between device-level bus events and raw peripheral frames.
// Notifications that fail the checksum never reach the registry.

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::bus::{BleSubscription, BusEvent, BusReceiver, EventBus, PeripheralCommand, Topic};
use crate::codec::{self, Frame, REPORT_IDENTIFIER};
use crate::connection::{ConnectionState, ConnectionTracker};
use crate::model::{DeviceTarget, RawDeviceState};

pub struct BlePayloadProcessor {
    bus: EventBus,
    inbox: BusReceiver,
    adapter: ConnectionState,
    peripherals: ConnectionTracker<String>,
}

impl BlePayloadProcessor {
    pub const INPUTS: &'static [Topic] = &[
        Topic::BleConnection,
        Topic::BlePeripheralConnection,
        Topic::BlePeripheralReceive,
        Topic::DeviceStateRequest,
        Topic::DeviceDiscovered,
    ];
    pub const OUTPUTS: &'static [Topic] = &[
        Topic::BleSubscribe,
        Topic::BlePeripheralSend,
        Topic::DeviceStateReceived,
    ];

    pub fn new(bus: EventBus) -> Self {
        Self {
            inbox: bus.subscribe(Self::INPUTS),
            bus,
            adapter: ConnectionState::Closed,
            peripherals: ConnectionTracker::new(),
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                event = self.inbox.recv() => {
                    let Some(event) = event else { break };
                    self.handle(event);
                }
            }
        }
    }

    pub fn handle(&mut self, event: BusEvent) {
        match event {
            BusEvent::BleConnection(state) => self.adapter = state,
            BusEvent::BlePeripheralConnection(connection) => {
                self.peripherals
                    .transition(connection.address, connection.state);
            }
            BusEvent::BlePeripheralReceive(payload) => {
                if !codec::verify(&payload.frame) {
                    warn!(
                        device_id = %payload.device_id,
                        frame = %codec::to_hex(&payload.frame),
                        "dropping notification with bad checksum"
                    );
                    return;
                }
                self.bus.publish(BusEvent::DeviceStateReceived(RawDeviceState::with_frames(
                    payload.device_id,
                    vec![payload.frame],
                )));
            }
            BusEvent::DeviceStateRequest(target) => self.request_state(&target),
            BusEvent::DeviceDiscovered(device) => {
                if let Some(address) = &device.ble_address {
                    self.bus.publish(BusEvent::BleSubscribe(BleSubscription {
                        device_id: device.device_id.clone(),
                        address: address.clone(),
                    }));
                }
            }
            _ => {}
        }
    }

    fn request_state(&self, target: &DeviceTarget) {
        let Some(address) = &target.ble_address else {
            return;
        };
        if !self.adapter.is_connected() || !self.peripherals.is_connected(address) {
            debug!(device_id = %target.device_id, "peripheral unavailable, skipping BLE status request");
            return;
        }

        let frames: Vec<Frame> = target
            .status_codes
            .iter()
            .filter_map(|code| match codec::encode(REPORT_IDENTIFIER, code, &[]) {
                Ok(frame) => Some(frame),
                Err(e) => {
                    warn!(device_id = %target.device_id, error = %e, "unencodable status code");
                    None
                }
            })
            .collect();
        if frames.is_empty() {
            return;
        }

        self.bus.publish(BusEvent::BlePeripheralSend(PeripheralCommand {
            address: address.clone(),
            device_id: target.device_id.clone(),
            frames,
        }));
    }
}

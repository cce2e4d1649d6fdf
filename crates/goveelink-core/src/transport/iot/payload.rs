// ── Cloud payload adapter ──
//
// Translates between the account topic's JSON messages and bus payloads:
// inbound device reports become `RawDeviceState`, outbound state requests
// and command frames become `status` / `ptReal` envelopes.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::bus::{BusEvent, BusReceiver, EventBus, IotCommand, IotMessage, Topic};
use crate::codec::Frame;
use crate::color::ColorRgb;
use crate::connection::ConnectionState;
use crate::error::CoreError;
use crate::model::{DeviceTarget, RawDeviceState};
use crate::transport::rest::OAuthData;

const STATUS_COMMAND: &str = "status";
const PASSTHROUGH_COMMAND: &str = "ptReal";

// ── Wire shapes ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountMessage {
    #[serde(default)]
    device: Option<String>,
    #[serde(default)]
    sku: Option<String>,
    #[serde(default)]
    cmd: Option<String>,
    #[serde(default)]
    state: Option<ReportedState>,
    #[serde(default)]
    op: Option<Operation>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReportedState {
    on_off: Option<u8>,
    brightness: Option<u8>,
    color_tem_in_kelvin: Option<u32>,
    mode: Option<u8>,
    color: Option<WireColor>,
    connected: Option<Flag>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct WireColor {
    r: u8,
    g: u8,
    b: u8,
}

/// Reachability is reported both as a JSON bool and as `"true"`/`"false"`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Text(String),
}

impl Flag {
    fn value(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Text(s) => s.parse().ok(),
        }
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct Operation {
    #[serde(default)]
    command: Vec<String>,
}

#[derive(Debug, Serialize)]
struct Envelope<'a> {
    topic: &'a str,
    msg: EnvelopeMessage<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EnvelopeMessage<'a> {
    account_topic: &'a str,
    cmd: &'a str,
    cmd_version: u8,
    transaction: String,
    #[serde(rename = "type")]
    kind: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Operation>,
}

// ── Conversions ──────────────────────────────────────────────────────

/// Decode one account-topic message. `Ok(None)` means the message is not a
/// device report (no device id).
pub fn parse_account_message(payload: &str) -> Result<Option<RawDeviceState>, CoreError> {
    let message: AccountMessage =
        serde_json::from_str(payload).map_err(|e| CoreError::Protocol {
            message: format!("account message: {e}"),
        })?;
    let Some(device_id) = message.device.filter(|d| !d.is_empty()) else {
        return Ok(None);
    };

    let commands = message
        .op
        .unwrap_or_default()
        .command
        .iter()
        .map(|frame| BASE64.decode(frame))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| CoreError::Protocol {
            message: format!("command frame for {device_id}: {e}"),
        })?;

    let state = message.state.unwrap_or_default();
    Ok(Some(RawDeviceState {
        device_id,
        model: message.sku,
        command: message.cmd,
        on_off: state.on_off.map(|v| v == 1),
        brightness: state.brightness,
        color_temperature: state.color_tem_in_kelvin.filter(|k| *k > 0),
        mode: state.mode,
        color: state.color.map(|c| ColorRgb::new(c.r, c.g, c.b)),
        connected: state.connected.as_ref().and_then(Flag::value),
        commands,
    }))
}

fn transaction() -> String {
    format!("u_{}", Utc::now().timestamp_millis())
}

/// JSON envelope asking a device to report its state.
pub fn status_request(topic: &str, account_topic: &str) -> Result<String, CoreError> {
    encode_envelope(topic, account_topic, STATUS_COMMAND, None)
}

/// JSON envelope carrying raw command frames to a device.
pub fn command_envelope(topic: &str, account_topic: &str, frames: &[Frame]) -> Result<String, CoreError> {
    let data = Operation {
        command: frames.iter().map(|f| BASE64.encode(f)).collect(),
    };
    encode_envelope(topic, account_topic, PASSTHROUGH_COMMAND, Some(data))
}

fn encode_envelope(
    topic: &str,
    account_topic: &str,
    cmd: &str,
    data: Option<Operation>,
) -> Result<String, CoreError> {
    let envelope = Envelope {
        topic,
        msg: EnvelopeMessage {
            account_topic,
            cmd,
            cmd_version: 0,
            transaction: transaction(),
            kind: 0,
            data,
        },
    };
    serde_json::to_string(&envelope).map_err(|e| CoreError::Protocol {
        message: format!("envelope: {e}"),
    })
}

// ── Processor ────────────────────────────────────────────────────────

/// Bus adapter between the cloud client and the registry.
pub struct IotPayloadProcessor {
    bus: EventBus,
    inbox: BusReceiver,
    account_topic: Option<String>,
    connection: ConnectionState,
}

impl IotPayloadProcessor {
    pub const INPUTS: &'static [Topic] = &[
        Topic::RestAuthenticated,
        Topic::IotConnection,
        Topic::IotReceived,
        Topic::DeviceStateRequest,
        Topic::IotDeviceSend,
    ];
    pub const OUTPUTS: &'static [Topic] = &[
        Topic::IotSubscribe,
        Topic::IotPublish,
        Topic::DeviceStateReceived,
    ];

    pub fn new(bus: EventBus) -> Self {
        Self {
            inbox: bus.subscribe(Self::INPUTS),
            bus,
            account_topic: None,
            connection: ConnectionState::Closed,
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
            BusEvent::RestAuthenticated(oauth) => self.on_authenticated(&oauth),
            BusEvent::IotConnection(state) => {
                self.connection = state;
                if state.is_connected() {
                    self.subscribe_account();
                }
            }
            BusEvent::IotReceived(message) => self.on_received(&message),
            BusEvent::DeviceStateRequest(target) => self.on_state_request(&target),
            BusEvent::IotDeviceSend(command) => self.on_send(&command),
            _ => {}
        }
    }

    fn on_authenticated(&mut self, oauth: &OAuthData) {
        if oauth.account_topic.is_empty() {
            return;
        }
        self.account_topic = Some(oauth.account_topic.clone());
        if self.connection.is_connected() {
            self.subscribe_account();
        }
    }

    fn subscribe_account(&self) {
        if let Some(topic) = &self.account_topic {
            self.bus.publish(BusEvent::IotSubscribe(topic.clone()));
        }
    }

    fn on_received(&self, message: &IotMessage) {
        match parse_account_message(&message.payload) {
            Ok(Some(state)) => {
                debug!(device_id = %state.device_id, frames = state.commands.len(), "cloud report");
                self.bus.publish(BusEvent::DeviceStateReceived(state));
            }
            Ok(None) => debug!(topic = %message.topic, "message without device ignored"),
            Err(e) => error!(topic = %message.topic, error = %e, "cloud report dropped"),
        }
    }

    fn on_state_request(&self, target: &DeviceTarget) {
        let (Some(topic), Some(account_topic)) = (&target.iot_topic, &self.account_topic) else {
            return;
        };
        if !self.connection.is_connected() {
            return;
        }
        self.publish(topic, status_request(topic, account_topic), &target.device_id);
    }

    fn on_send(&self, command: &IotCommand) {
        let Some(account_topic) = &self.account_topic else {
            info!(device_id = %command.device_id, "no account topic yet, command dropped");
            return;
        };
        self.publish(
            &command.topic,
            command_envelope(&command.topic, account_topic, &command.frames),
            &command.device_id,
        );
    }

    fn publish(&self, topic: &str, payload: Result<String, CoreError>, device_id: &str) {
        match payload {
            Ok(payload) => self.bus.publish(BusEvent::IotPublish(IotMessage {
                topic: topic.to_owned(),
                payload,
            })),
            Err(e) => error!(device_id, error = %e, "failed to encode cloud envelope"),
        }
    }
}

// ── Transport clients ──
//
// One module per external channel. Each pairs a client that owns the
// connection lifecycle with a payload processor that maps between raw
// transport payloads and device-level bus events.

pub mod ble;
pub mod iot;
pub mod rest;

pub use ble::{BleClient, BlePayloadProcessor};
pub use iot::{IotClient, IotPayloadProcessor};
pub use rest::{
    ApiStatus, Credentials, MemoryTokenStore, OAuthData, RestAuthenticator, RestDeviceProcessor,
    TokenStore,
};

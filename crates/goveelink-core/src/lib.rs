//! Device model and transport reconciliation between `goveelink-api` and
//! consumers (CLI, host adapters).
//!
//! Every component talks to the others only through the [`EventBus`]:
//!
//! - **[`Bridge`]**: Facade owning the bus, the [`DeviceStore`], and every
//!   background task. [`start()`](Bridge::start) spawns the enabled
//!   transports and requests authentication; [`shutdown()`](Bridge::shutdown)
//!   cancels and joins them.
//!
//! - **[`DeviceRegistry`]**: Sole owner of [`GoveeDevice`] instances.
//!   Creates devices from the account's device list through the
//!   [`DeviceCatalog`], feeds inbound state through each device's
//!   capability fragments, routes [`DeviceTransition`]s to a live
//!   transport, and runs the global poll.
//!
//! - **Transports** ([`transport`]): BLE, cloud MQTT, and REST clients,
//!   each paired with a payload processor translating between wire
//!   payloads and device-level events.
//!
//! - **Codec** ([`codec`]): 20-byte XOR-checksummed command/report frames.
//!
//! - **[`DeviceStream`]**: Subscription handle vended by the
//!   [`DeviceStore`], exposing `current()` / `latest()` / `changed()`.

pub mod bridge;
pub mod bus;
pub mod codec;
pub mod color;
pub mod config;
pub mod connection;
pub mod error;
pub mod model;
pub mod registry;
pub mod store;
pub mod stream;
pub mod transition;
pub mod transport;

// ── Primary re-exports ──────────────────────────────────────────────
pub use bridge::Bridge;
pub use bus::{BusEvent, BusReceiver, EventBus, Topic};
pub use color::ColorRgb;
pub use config::{BridgeConfig, Connections};
pub use connection::{ConnectionState, ConnectionTracker};
pub use error::{CodecError, CoreError};
pub use model::{
    Capability, CapabilityKind, DeviceCatalog, DeviceConfig, DeviceKind, DeviceTarget,
    GoveeDevice, RawDeviceState,
};
pub use registry::{DEFAULT_POLL_INTERVAL, DeviceRegistry};
pub use store::DeviceStore;
pub use stream::DeviceStream;
pub use transition::{DeviceChange, DeviceTransition, Route};
pub use transport::rest::{Credentials, MemoryTokenStore, OAuthData, TokenStore};

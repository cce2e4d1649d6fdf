// goveelink-api: Async clients for the Govee cloud (REST + IoT MQTT) and BLE peripherals

pub mod ble;
pub mod error;
pub mod iot;
pub mod rest;
pub mod transport;

pub use ble::{AdapterEvent, BleCentral, BleSettings, BtleCentral, ServiceInfo};
pub use error::Error;
pub use iot::{ConnectionEvent, IotConfig, MqttConnection, PubSubConnection, RetryPolicy};
pub use rest::RestClient;
pub use transport::TransportConfig;

//! A WebSocket bridge that lets a remote Web Bluetooth controller drive a BLE
//! central: scan for peripherals, then explore their GATT tree.

pub mod btle;
pub mod codec;
pub mod config;
pub mod explore;
pub mod models;
pub mod registry;
pub mod scan;
pub mod server;
pub mod session;

mod error;

pub use error::{Error, Result};

pub use config::{BridgeConfig, Cli};
pub use explore::{
  connect_within, CharacteristicInfo, ExploreTimeouts, Explorer, GattConnection, GattLink, ServiceInfo,
};
pub use models::*;
pub use registry::{AdvertisementSighting, PeripheralRecord, PeripheralRegistry};
pub use scan::{ScanCancel, ScanOutcome, ScanParams, ScanSession, ScanToken, Scanner, ServiceUuidPolicy, SightingStream};
pub use session::{BridgeSession, EventSender};

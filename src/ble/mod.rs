//! BLE communication module.
//!
//! This module provides the capability surface the session runs on, its
//! btleplug and in-memory implementations, and sibling service resolution.

pub mod backend;
pub mod characteristics;
pub mod connection;
pub mod correlator;
pub mod device;
pub mod platform;
pub mod scanner;
pub mod simulated;
pub mod uuids;

pub use backend::{GattBackend, NotificationStream};
pub use connection::{ConnectionManager, ConnectionState};
pub use correlator::find_sibling_service;
pub use device::{CacheMode, Characteristic, ClientConfig, DeviceRecord, DeviceSelector, GattService};
pub use platform::BtleplugBackend;
pub use scanner::BleScanner;
pub use simulated::{SimulatedBackend, SimulatedDevice, SimulatedService};
pub use uuids::*;

// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # key-input-gatt
//!
//! Finds Bluetooth Low Energy peripherals exposing a key input GATT service,
//! reads their identity from the Generic Access and Device Information
//! services, and streams key input notifications until cancelled.
//!
//! ## Features
//!
//! - **Discovery**: One enumeration snapshot of devices exposing the key input service
//! - **Sibling Resolution**: Finds the other services of the same physical device
//! - **Identity**: Device name and System ID, read live from the peripheral
//! - **Key Notifications**: Ordered stream of key values per device
//! - **Cancellation**: One token stops every read, write and stream promptly
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use key_input_gatt::{AdapterConfig, GattSession, Result, SessionConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let session = GattSession::with_btleplug(AdapterConfig::default(), SessionConfig::default()).await?;
//!     let mut events = session.subscribe();
//!
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             if let Some(line) = event.console_line() {
//!                 println!("{}", line);
//!             }
//!         }
//!     });
//!
//!     let token = CancellationToken::new();
//!     let stop = token.clone();
//!     tokio::spawn(async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         stop.cancel();
//!     });
//!
//!     session.run(token).await
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for event types

// Public modules
pub mod ble;
pub mod config;
pub mod error;
pub mod events;
pub mod protocol;
pub mod session;
pub mod utils;

// Re-exports for convenience
pub use config::{AdapterConfig, SessionConfig};
pub use error::{Error, Result};
pub use events::{KeyInputEvent, SessionEvent, SessionState};
pub use protocol::{decode_big_endian_uint, decode_utf8, SystemId};
pub use session::{GattSession, UNKNOWN_DEVICE_NAME};

// Re-export commonly used types from submodules
pub use ble::{
    find_sibling_service, BtleplugBackend, CacheMode, Characteristic, ClientConfig, DeviceRecord,
    DeviceSelector, GattBackend, GattService, SimulatedBackend, SimulatedDevice, SimulatedService,
};

//! The BLE capability surface consumed by the session.
//!
//! The session never talks to a radio directly. Everything it needs from the
//! platform goes through [`GattBackend`], which has a btleplug implementation
//! for real hardware and an in-memory one for tests.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::Stream;
use std::pin::Pin;

use crate::ble::device::{CacheMode, Characteristic, ClientConfig, DeviceRecord, DeviceSelector, GattService};
use crate::error::Result;

/// Ordered stream of value-changed payloads for one characteristic.
///
/// The stream ends when the peripheral goes away.
pub type NotificationStream = Pin<Box<dyn Stream<Item = Bytes> + Send>>;

/// Operations a BLE stack must provide.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GattBackend: Send + Sync {
    /// Enumerate every service instance matching the selector.
    async fn enumerate_devices(&self, selector: &DeviceSelector) -> Result<Vec<DeviceRecord>>;

    /// Open a service by the id of its [`DeviceRecord`].
    async fn open_service(&self, service_id: &str) -> Result<GattService>;

    /// Release a service handle obtained from [`open_service`](Self::open_service).
    async fn close_service(&self, service: &GattService) -> Result<()>;

    /// Read a characteristic value.
    async fn read_value(&self, characteristic: &Characteristic, cache_mode: CacheMode) -> Result<Bytes>;

    /// Write the client characteristic configuration descriptor.
    async fn write_client_config(&self, characteristic: &Characteristic, value: ClientConfig) -> Result<()>;

    /// Open the value-changed stream for a characteristic.
    ///
    /// Payloads only arrive once notifications have been enabled with
    /// [`write_client_config`](Self::write_client_config).
    async fn value_changed(&self, characteristic: &Characteristic) -> Result<NotificationStream>;
}

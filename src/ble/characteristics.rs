//! GATT characteristic handling.
//!
//! Provides reading, client configuration and value-changed streams for the
//! characteristics of one btleplug peripheral.

use btleplug::api::{Characteristic as BtleCharacteristic, Peripheral as _};
use btleplug::platform::Peripheral;
use bytes::Bytes;
use futures::stream::StreamExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::ble::backend::NotificationStream;
use crate::ble::device::{CacheMode, ClientConfig};
use crate::ble::uuids::DEVICE_NAME_CHARACTERISTIC_UUID;
use crate::error::{Error, Result};

/// Location of a characteristic: service UUID, service instance, characteristic UUID.
pub type CharacteristicKey = (Uuid, usize, Uuid);

/// Handler for GATT characteristics on a peripheral.
pub struct CharacteristicHandler {
    /// The peripheral to communicate with.
    peripheral: Peripheral,
    /// Last value read from each characteristic.
    values: RwLock<HashMap<CharacteristicKey, Bytes>>,
}

impl CharacteristicHandler {
    /// Create a new characteristic handler for a peripheral.
    ///
    /// Note: Services must be discovered before using this handler.
    pub fn new(peripheral: Peripheral) -> Self {
        Self {
            peripheral,
            values: RwLock::new(HashMap::new()),
        }
    }

    /// UUIDs of the characteristics of the `index`th service with `service_uuid`.
    pub fn characteristic_uuids(&self, service_uuid: &Uuid, index: usize) -> Option<Vec<Uuid>> {
        self.peripheral
            .services()
            .into_iter()
            .filter(|s| s.uuid == *service_uuid)
            .nth(index)
            .map(|s| s.characteristics.iter().map(|c| c.uuid).collect())
    }

    /// Device name from the advertisement.
    ///
    /// Stacks that keep Generic Access to themselves still report the name
    /// the peripheral advertised.
    pub async fn advertised_name(&self) -> Result<Bytes> {
        let properties = self
            .peripheral
            .properties()
            .await
            .map_err(Error::Bluetooth)?;

        properties
            .and_then(|p| p.local_name)
            .map(Bytes::from)
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: DEVICE_NAME_CHARACTERISTIC_UUID.to_string(),
            })
    }

    /// Resolve a characteristic key to the btleplug characteristic.
    pub fn get_characteristic(&self, key: &CharacteristicKey) -> Result<BtleCharacteristic> {
        let (service_uuid, index, uuid) = key;

        self.peripheral
            .services()
            .into_iter()
            .filter(|s| s.uuid == *service_uuid)
            .nth(*index)
            .and_then(|s| s.characteristics.into_iter().find(|c| c.uuid == *uuid))
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: uuid.to_string(),
            })
    }

    /// Read a characteristic value.
    ///
    /// btleplug always reads from the peripheral, so `Cached` is served from
    /// the last value this handler read, if any.
    pub async fn read(&self, key: &CharacteristicKey, cache_mode: CacheMode) -> Result<Bytes> {
        if cache_mode == CacheMode::Cached {
            if let Some(value) = self.values.read().get(key).cloned() {
                trace!("Cached read of {}", key.2);
                return Ok(value);
            }
        }

        let characteristic = self.get_characteristic(key)?;

        let data = self
            .peripheral
            .read(&characteristic)
            .await
            .map_err(Error::Bluetooth)?;

        trace!("Read {} bytes from characteristic {}", data.len(), key.2);

        let data = Bytes::from(data);
        self.values.write().insert(*key, data.clone());

        Ok(data)
    }

    /// Write the client configuration descriptor.
    ///
    /// btleplug picks notify or indicate from the characteristic's properties,
    /// so both enabled values subscribe.
    pub async fn set_client_config(&self, key: &CharacteristicKey, value: ClientConfig) -> Result<()> {
        let characteristic = self.get_characteristic(key)?;

        debug!(
            "Setting client config {:?} on {}, properties: {:?}",
            value, key.2, characteristic.properties
        );

        let result = if value.is_enabled() {
            self.peripheral.subscribe(&characteristic).await
        } else {
            self.peripheral.unsubscribe(&characteristic).await
        };

        result.map_err(|e| Error::SubscriptionRejected {
            uuid: key.2.to_string(),
            reason: e.to_string(),
        })
    }

    /// Value-changed payloads for one characteristic, in arrival order.
    pub async fn notifications(&self, uuid: Uuid) -> Result<NotificationStream> {
        let notifications = self
            .peripheral
            .notifications()
            .await
            .map_err(Error::Bluetooth)?;

        let stream = notifications.filter_map(move |notification| async move {
            (notification.uuid == uuid).then(|| Bytes::from(notification.value))
        });

        Ok(Box::pin(stream))
    }
}

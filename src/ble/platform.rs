//! btleplug-backed [`GattBackend`].
//!
//! A physical device is a btleplug peripheral and its container id is the
//! peripheral id. Service ids have the form `"{peripheral}/{uuid}"`, with a
//! `#n` suffix for the n-th repeated instance of a service on one peripheral.
//!
//! CoreBluetooth and BlueZ keep the Generic Access service to themselves. When
//! a connected peripheral's GATT table has no Generic Access service, the
//! backend reports one anyway, and its Device Name reads return the
//! advertised local name.

use async_trait::async_trait;
use btleplug::api::Peripheral as _;
use btleplug::platform::Peripheral;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::ble::backend::{GattBackend, NotificationStream};
use crate::ble::characteristics::{CharacteristicHandler, CharacteristicKey};
use crate::ble::connection::ConnectionManager;
use crate::ble::device::{CacheMode, Characteristic, ClientConfig, DeviceRecord, DeviceSelector, GattService};
use crate::ble::scanner::BleScanner;
use crate::ble::uuids::{CONTAINER_ID_PROPERTY, DEVICE_NAME_CHARACTERISTIC_UUID, GENERIC_ACCESS_SERVICE_UUID};
use crate::config::AdapterConfig;
use crate::error::{Error, Result};

/// Build a service id from its parts.
pub fn format_service_id(container_id: &str, service_uuid: &Uuid, index: usize) -> String {
    if index == 0 {
        format!("{}/{}", container_id, service_uuid)
    } else {
        format!("{}/{}#{}", container_id, service_uuid, index)
    }
}

/// Split a service id into container id, service UUID and instance index.
pub fn parse_service_id(service_id: &str) -> Result<(&str, Uuid, usize)> {
    let invalid = || Error::ServiceOpenFailed {
        service_id: service_id.to_string(),
        reason: "malformed service id".to_string(),
    };

    let (container_id, rest) = service_id.rsplit_once('/').ok_or_else(invalid)?;
    let (uuid, index) = match rest.split_once('#') {
        Some((uuid, index)) => (uuid, index.parse::<usize>().map_err(|_| invalid())?),
        None => (rest, 0),
    };
    let uuid = Uuid::parse_str(uuid).map_err(|_| invalid())?;

    Ok((container_id, uuid, index))
}

/// Number of records to report for a service found `found` times in the GATT table.
fn instance_count(service_uuid: &Uuid, found: usize, connected: bool) -> usize {
    match found {
        // Not connected yet: the advertisement is all we know
        0 if !connected => 1,
        0 if *service_uuid == GENERIC_ACCESS_SERVICE_UUID => 1,
        n => n,
    }
}

/// Characteristics of a Generic Access service hidden by the host stack.
fn hidden_service_characteristics(service_uuid: &Uuid, index: usize) -> Option<Vec<Uuid>> {
    (*service_uuid == GENERIC_ACCESS_SERVICE_UUID && index == 0)
        .then(|| vec![DEVICE_NAME_CHARACTERISTIC_UUID])
}

/// Everything the backend holds for one peripheral.
struct PeripheralEntry {
    connection: ConnectionManager,
    characteristics: CharacteristicHandler,
}

/// [`GattBackend`] over the platform BLE stack.
pub struct BtleplugBackend {
    scanner: BleScanner,
    config: AdapterConfig,
    peripherals: RwLock<HashMap<String, Arc<PeripheralEntry>>>,
}

impl BtleplugBackend {
    /// Open the configured adapter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BluetoothUnavailable`] if there is no such adapter.
    pub async fn new(config: AdapterConfig) -> Result<Self> {
        let scanner = BleScanner::new(&config).await?;
        Ok(Self {
            scanner,
            config,
            peripherals: RwLock::new(HashMap::new()),
        })
    }

    fn entry_for(&self, peripheral: Peripheral) -> Arc<PeripheralEntry> {
        let container_id = peripheral.id().to_string();
        self.peripherals
            .write()
            .entry(container_id)
            .or_insert_with(|| {
                Arc::new(PeripheralEntry {
                    connection: ConnectionManager::new(peripheral.clone(), &self.config),
                    characteristics: CharacteristicHandler::new(peripheral),
                })
            })
            .clone()
    }

    async fn lookup(&self, container_id: &str) -> Result<Option<Arc<PeripheralEntry>>> {
        let known = self.peripherals.read().get(container_id).cloned();
        if let Some(entry) = known {
            return Ok(Some(entry));
        }

        Ok(self
            .scanner
            .find_peripheral(container_id)
            .await?
            .map(|p| self.entry_for(p)))
    }

    fn entry(&self, container_id: &str) -> Result<Arc<PeripheralEntry>> {
        self.peripherals
            .read()
            .get(container_id)
            .cloned()
            .ok_or_else(|| Error::Internal(format!("unknown peripheral {}", container_id)))
    }

    fn characteristic_key(characteristic: &Characteristic) -> Result<(&str, CharacteristicKey)> {
        let (container_id, service_uuid, index) = parse_service_id(&characteristic.service_id)?;
        Ok((container_id, (service_uuid, index, characteristic.uuid)))
    }

    fn records_for(entry: &PeripheralEntry, selector: &DeviceSelector) -> Vec<DeviceRecord> {
        let peripheral = entry.connection.peripheral();
        let container_id = peripheral.id().to_string();

        let found = peripheral
            .services()
            .into_iter()
            .filter(|s| s.uuid == selector.service_uuid)
            .count();
        let instances = instance_count(
            &selector.service_uuid,
            found,
            entry.connection.state().is_connected(),
        );

        (0..instances)
            .map(|index| {
                DeviceRecord::new(
                    format_service_id(&container_id, &selector.service_uuid, index),
                    selector.service_uuid,
                )
                .with_property(CONTAINER_ID_PROPERTY, container_id.clone())
            })
            .filter(|record| selector.matches(record))
            .collect()
    }
}

#[async_trait]
impl GattBackend for BtleplugBackend {
    async fn enumerate_devices(&self, selector: &DeviceSelector) -> Result<Vec<DeviceRecord>> {
        let records = match &selector.container_id {
            Some(container_id) => {
                let entry = match self.lookup(container_id).await? {
                    Some(entry) => entry,
                    None => return Ok(Vec::new()),
                };
                // Siblings are rarely advertised, so look at the GATT table.
                // The link is only dropped here when no service handle holds it.
                entry.connection.connect().await?;
                let records = Self::records_for(&entry, selector);
                if entry.connection.open_handles() == 0 {
                    entry.connection.disconnect().await?;
                }
                records
            }
            None => {
                let peripherals = self
                    .scanner
                    .scan_snapshot(selector.service_uuid, self.config.scan_duration)
                    .await?;

                peripherals
                    .into_iter()
                    .flat_map(|p| Self::records_for(&self.entry_for(p), selector))
                    .collect()
            }
        };

        debug!("Enumeration of {} found {} records", selector, records.len());
        Ok(records)
    }

    async fn open_service(&self, service_id: &str) -> Result<GattService> {
        let (container_id, service_uuid, index) = parse_service_id(service_id)?;

        let entry = self
            .lookup(container_id)
            .await?
            .ok_or_else(|| Error::ServiceOpenFailed {
                service_id: service_id.to_string(),
                reason: "peripheral is no longer known to the adapter".to_string(),
            })?;

        entry.connection.acquire().await?;

        let uuids = match entry
            .characteristics
            .characteristic_uuids(&service_uuid, index)
            .or_else(|| hidden_service_characteristics(&service_uuid, index))
        {
            Some(uuids) => uuids,
            None => {
                if let Err(e) = entry.connection.release().await {
                    warn!("Failed to release {}: {}", container_id, e);
                }
                return Err(Error::ServiceOpenFailed {
                    service_id: service_id.to_string(),
                    reason: "service not present in GATT table".to_string(),
                });
            }
        };

        Ok(GattService {
            id: service_id.to_string(),
            uuid: service_uuid,
            characteristics: uuids
                .into_iter()
                .map(|uuid| Characteristic {
                    service_id: service_id.to_string(),
                    uuid,
                })
                .collect(),
        })
    }

    async fn close_service(&self, service: &GattService) -> Result<()> {
        let (container_id, _, _) = parse_service_id(&service.id)?;
        self.entry(container_id)?.connection.release().await
    }

    async fn read_value(&self, characteristic: &Characteristic, cache_mode: CacheMode) -> Result<Bytes> {
        let (container_id, key) = Self::characteristic_key(characteristic)?;
        let entry = self.entry(container_id)?;
        let (service_uuid, index, _) = key;

        if entry
            .characteristics
            .characteristic_uuids(&service_uuid, index)
            .is_none()
            && hidden_service_characteristics(&service_uuid, index)
                .is_some_and(|uuids| uuids.contains(&characteristic.uuid))
        {
            debug!("Serving {} from the advertised name", characteristic.uuid);
            return entry.characteristics.advertised_name().await;
        }

        entry.characteristics.read(&key, cache_mode).await
    }

    async fn write_client_config(&self, characteristic: &Characteristic, value: ClientConfig) -> Result<()> {
        let (container_id, key) = Self::characteristic_key(characteristic)?;
        self.entry(container_id)?
            .characteristics
            .set_client_config(&key, value)
            .await
    }

    async fn value_changed(&self, characteristic: &Characteristic) -> Result<NotificationStream> {
        let (container_id, _) = Self::characteristic_key(characteristic)?;
        self.entry(container_id)?
            .characteristics
            .notifications(characteristic.uuid)
            .await
    }
}

//! In-memory [`GattBackend`] for tests and demos.
//!
//! Devices are described with [`SimulatedDevice`] and registered with a
//! [`SimulatedBackend`]. Every service gets the id `"{container}/{uuid}"`, and
//! every record carries the container id property unless told otherwise.
//! Failures can be injected per service or per characteristic.

use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::mpsc;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::trace;
use uuid::Uuid;

use crate::ble::backend::{GattBackend, NotificationStream};
use crate::ble::device::{CacheMode, Characteristic, ClientConfig, DeviceRecord, DeviceSelector, GattService};
use crate::ble::uuids::*;
use crate::error::{Error, Result};

/// How a simulated read behaves.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ReadBehavior {
    Value,
    Fail(String),
    Hang,
}

/// How a simulated client configuration write behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigBehavior {
    Accept,
    Reject,
    RejectDisable,
    HangDisable,
}

#[derive(Debug, Clone)]
struct SimulatedCharacteristic {
    uuid: Uuid,
    value: Bytes,
    read: ReadBehavior,
    config: ConfigBehavior,
}

/// A service on a simulated device.
#[derive(Debug, Clone)]
pub struct SimulatedService {
    uuid: Uuid,
    characteristics: Vec<SimulatedCharacteristic>,
    fail_open: bool,
}

impl SimulatedService {
    /// Create an empty service.
    pub fn new(uuid: Uuid) -> Self {
        Self {
            uuid,
            characteristics: Vec::new(),
            fail_open: false,
        }
    }

    /// Add a characteristic with a fixed value.
    pub fn with_characteristic(mut self, uuid: Uuid, value: impl Into<Bytes>) -> Self {
        self.characteristics.push(SimulatedCharacteristic {
            uuid,
            value: value.into(),
            read: ReadBehavior::Value,
            config: ConfigBehavior::Accept,
        });
        self
    }
}

/// A physical device made of services sharing one container id.
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    container_id: String,
    expose_container_id: bool,
    services: Vec<SimulatedService>,
}

impl SimulatedDevice {
    /// Create a device with no services.
    pub fn new(container_id: impl Into<String>) -> Self {
        Self {
            container_id: container_id.into(),
            expose_container_id: true,
            services: Vec::new(),
        }
    }

    /// Create a complete key-input device with Generic Access and Device
    /// Information services.
    pub fn key_input(container_id: impl Into<String>, name: &str, system_id: &[u8]) -> Self {
        Self::new(container_id)
            .with_service(
                SimulatedService::new(GENERIC_ACCESS_SERVICE_UUID)
                    .with_characteristic(DEVICE_NAME_CHARACTERISTIC_UUID, name.as_bytes().to_vec()),
            )
            .with_service(
                SimulatedService::new(DEVICE_INFORMATION_SERVICE_UUID)
                    .with_characteristic(SYSTEM_ID_CHARACTERISTIC_UUID, system_id.to_vec()),
            )
            .with_service(
                SimulatedService::new(KEY_INPUT_SERVICE_UUID)
                    .with_characteristic(KEY_INPUT_CHARACTERISTIC_UUID, Bytes::new()),
            )
    }

    /// Add a service.
    pub fn with_service(mut self, service: SimulatedService) -> Self {
        self.services.push(service);
        self
    }

    /// Remove every service with the given UUID.
    pub fn without_service(mut self, uuid: Uuid) -> Self {
        self.services.retain(|s| s.uuid != uuid);
        self
    }

    /// Remove a characteristic from every service.
    pub fn without_characteristic(mut self, uuid: Uuid) -> Self {
        for service in &mut self.services {
            service.characteristics.retain(|c| c.uuid != uuid);
        }
        self
    }

    /// Omit the container id property from this device's records.
    pub fn without_container_id(mut self) -> Self {
        self.expose_container_id = false;
        self
    }

    /// Make opening services with this UUID fail.
    pub fn fail_open(mut self, service_uuid: Uuid) -> Self {
        for service in self.services.iter_mut().filter(|s| s.uuid == service_uuid) {
            service.fail_open = true;
        }
        self
    }

    /// Make reads of this characteristic fail.
    pub fn fail_read(self, uuid: Uuid, reason: &str) -> Self {
        self.with_read_behavior(uuid, ReadBehavior::Fail(reason.to_string()))
    }

    /// Make reads of this characteristic never complete.
    pub fn hang_read(self, uuid: Uuid) -> Self {
        self.with_read_behavior(uuid, ReadBehavior::Hang)
    }

    /// Make client configuration writes to this characteristic fail.
    pub fn reject_config(self, uuid: Uuid) -> Self {
        self.with_config_behavior(uuid, ConfigBehavior::Reject)
    }

    /// Accept enabling notifications on this characteristic but fail disabling them.
    pub fn reject_disable(self, uuid: Uuid) -> Self {
        self.with_config_behavior(uuid, ConfigBehavior::RejectDisable)
    }

    /// Accept enabling notifications on this characteristic but never complete disabling them.
    pub fn hang_disable(self, uuid: Uuid) -> Self {
        self.with_config_behavior(uuid, ConfigBehavior::HangDisable)
    }

    fn with_config_behavior(mut self, uuid: Uuid, config: ConfigBehavior) -> Self {
        for c in self.characteristics_mut(uuid) {
            c.config = config;
        }
        self
    }

    fn with_read_behavior(mut self, uuid: Uuid, read: ReadBehavior) -> Self {
        for c in self.characteristics_mut(uuid) {
            c.read = read.clone();
        }
        self
    }

    fn characteristics_mut(&mut self, uuid: Uuid) -> impl Iterator<Item = &mut SimulatedCharacteristic> {
        self.services
            .iter_mut()
            .flat_map(|s| s.characteristics.iter_mut())
            .filter(move |c| c.uuid == uuid)
    }

    fn service_id(&self, index: usize) -> String {
        let service = &self.services[index];
        let duplicates = self.services[..index]
            .iter()
            .filter(|s| s.uuid == service.uuid)
            .count();
        if duplicates == 0 {
            format!("{}/{}", self.container_id, service.uuid)
        } else {
            format!("{}/{}#{}", self.container_id, service.uuid, duplicates)
        }
    }
}

#[derive(Default)]
struct SimulatedState {
    devices: Vec<SimulatedDevice>,
    open_handles: HashMap<String, usize>,
    client_configs: HashMap<Characteristic, ClientConfig>,
    subscribers: HashMap<Characteristic, Vec<mpsc::UnboundedSender<Bytes>>>,
    fail_enumeration: bool,
    enumerations: usize,
    reads: HashSet<(Characteristic, bool)>,
}

impl SimulatedState {
    fn find_service(&self, service_id: &str) -> Option<(&SimulatedDevice, &SimulatedService)> {
        self.devices.iter().find_map(|device| {
            (0..device.services.len())
                .find(|&i| device.service_id(i) == service_id)
                .map(|i| (device, &device.services[i]))
        })
    }

    fn find_characteristic(&self, characteristic: &Characteristic) -> Result<&SimulatedCharacteristic> {
        self.find_service(&characteristic.service_id)
            .and_then(|(_, service)| {
                service
                    .characteristics
                    .iter()
                    .find(|c| c.uuid == characteristic.uuid)
            })
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: characteristic.uuid.to_string(),
            })
    }
}

/// In-memory BLE stack.
#[derive(Clone, Default)]
pub struct SimulatedBackend {
    state: Arc<RwLock<SimulatedState>>,
}

impl SimulatedBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device.
    pub fn add_device(&self, device: SimulatedDevice) {
        self.state.write().devices.push(device);
    }

    /// Make every enumeration fail as if the adapter were gone.
    pub fn fail_enumeration(&self) {
        self.state.write().fail_enumeration = true;
    }

    /// Push a value-changed payload for a device's characteristic.
    ///
    /// Returns the number of live subscribers the payload reached. Nothing is
    /// delivered unless notifications are enabled on the characteristic.
    pub fn notify(&self, container_id: &str, uuid: Uuid, payload: &[u8]) -> usize {
        let payload = Bytes::copy_from_slice(payload);
        let mut state = self.state.write();

        let targets: Vec<Characteristic> = state
            .client_configs
            .iter()
            .filter(|(c, config)| {
                c.uuid == uuid
                    && config.is_enabled()
                    && c.service_id.starts_with(&format!("{}/", container_id))
            })
            .map(|(c, _)| c.clone())
            .collect();

        let mut delivered = 0;
        for characteristic in targets {
            if let Some(senders) = state.subscribers.get_mut(&characteristic) {
                senders.retain(|tx| !tx.is_closed());
                for tx in senders.iter() {
                    if tx.unbounded_send(payload.clone()).is_ok() {
                        delivered += 1;
                    }
                }
            }
        }

        trace!("Simulated notification for {} reached {} subscribers", uuid, delivered);
        delivered
    }

    /// Drop every value-changed stream of a device, as if it disconnected.
    pub fn disconnect(&self, container_id: &str) {
        let prefix = format!("{}/", container_id);
        self.state
            .write()
            .subscribers
            .retain(|c, _| !c.service_id.starts_with(&prefix));
    }

    /// Number of service handles currently open.
    pub fn open_handle_count(&self) -> usize {
        self.state.read().open_handles.values().sum()
    }

    /// Number of enumerations performed so far.
    pub fn enumeration_count(&self) -> usize {
        self.state.read().enumerations
    }

    /// Current client configuration of a device's characteristic.
    pub fn client_config(&self, container_id: &str, uuid: Uuid) -> ClientConfig {
        let prefix = format!("{}/", container_id);
        self.state
            .read()
            .client_configs
            .iter()
            .find(|(c, _)| c.uuid == uuid && c.service_id.starts_with(&prefix))
            .map(|(_, config)| *config)
            .unwrap_or_default()
    }

    /// Check whether a characteristic was read with the given cache mode.
    pub fn was_read(&self, container_id: &str, uuid: Uuid, cache_mode: CacheMode) -> bool {
        let prefix = format!("{}/", container_id);
        let uncached = cache_mode == CacheMode::Uncached;
        self.state
            .read()
            .reads
            .iter()
            .any(|(c, u)| c.uuid == uuid && *u == uncached && c.service_id.starts_with(&prefix))
    }
}

#[async_trait]
impl GattBackend for SimulatedBackend {
    async fn enumerate_devices(&self, selector: &DeviceSelector) -> Result<Vec<DeviceRecord>> {
        let mut state = self.state.write();
        state.enumerations += 1;

        if state.fail_enumeration {
            return Err(Error::BluetoothUnavailable);
        }

        let mut records = Vec::new();
        for device in &state.devices {
            for (index, service) in device.services.iter().enumerate() {
                let mut record = DeviceRecord::new(device.service_id(index), service.uuid);
                if device.expose_container_id {
                    record = record.with_property(CONTAINER_ID_PROPERTY, device.container_id.clone());
                }
                if selector.matches(&record) {
                    records.push(record);
                }
            }
        }

        trace!("Simulated enumeration of {} found {} records", selector, records.len());
        Ok(records)
    }

    async fn open_service(&self, service_id: &str) -> Result<GattService> {
        let mut state = self.state.write();

        let service = {
            let (_, service) = state
                .find_service(service_id)
                .ok_or_else(|| Error::ServiceOpenFailed {
                    service_id: service_id.to_string(),
                    reason: "unknown service id".to_string(),
                })?;

            if service.fail_open {
                return Err(Error::ServiceOpenFailed {
                    service_id: service_id.to_string(),
                    reason: "device unreachable".to_string(),
                });
            }

            GattService {
                id: service_id.to_string(),
                uuid: service.uuid,
                characteristics: service
                    .characteristics
                    .iter()
                    .map(|c| Characteristic {
                        service_id: service_id.to_string(),
                        uuid: c.uuid,
                    })
                    .collect(),
            }
        };

        *state.open_handles.entry(service_id.to_string()).or_insert(0) += 1;
        Ok(service)
    }

    async fn close_service(&self, service: &GattService) -> Result<()> {
        let mut state = self.state.write();
        match state.open_handles.get_mut(&service.id) {
            Some(count) if *count > 0 => {
                *count -= 1;
                Ok(())
            }
            _ => Err(Error::Internal(format!("service {} is not open", service.id))),
        }
    }

    async fn read_value(&self, characteristic: &Characteristic, cache_mode: CacheMode) -> Result<Bytes> {
        // None means the read never completes
        let outcome = {
            let mut state = self.state.write();
            let sim = state.find_characteristic(characteristic)?;
            let outcome = match &sim.read {
                ReadBehavior::Value => Some(Ok(sim.value.clone())),
                ReadBehavior::Fail(reason) => Some(Err(Error::Internal(reason.clone()))),
                ReadBehavior::Hang => None,
            };
            state
                .reads
                .insert((characteristic.clone(), cache_mode == CacheMode::Uncached));
            outcome
        };

        match outcome {
            Some(result) => result,
            None => futures::future::pending().await,
        }
    }

    async fn write_client_config(&self, characteristic: &Characteristic, value: ClientConfig) -> Result<()> {
        let disabling = !value.is_enabled();

        let hang = {
            let mut state = self.state.write();
            let (rejected, hang) = match state.find_characteristic(characteristic)?.config {
                ConfigBehavior::Accept => (false, false),
                ConfigBehavior::Reject => (true, false),
                ConfigBehavior::RejectDisable => (disabling, false),
                ConfigBehavior::HangDisable => (false, disabling),
            };

            if rejected {
                return Err(Error::Internal("GATT write rejected".to_string()));
            }
            if !hang {
                state.client_configs.insert(characteristic.clone(), value);
            }
            hang
        };

        if hang {
            futures::future::pending::<()>().await;
        }

        Ok(())
    }

    async fn value_changed(&self, characteristic: &Characteristic) -> Result<NotificationStream> {
        let mut state = self.state.write();
        state.find_characteristic(characteristic)?;

        let (tx, rx) = mpsc::unbounded();
        state
            .subscribers
            .entry(characteristic.clone())
            .or_default()
            .push(tx);

        Ok(Box::pin(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn key_device(container: &str) -> SimulatedDevice {
        SimulatedDevice::key_input(container, "AB", &[0, 1, 2, 3, 4, 5, 6, 7])
    }

    #[tokio::test]
    async fn test_enumerate_by_service_and_container() {
        let backend = SimulatedBackend::new();
        backend.add_device(key_device("a"));
        backend.add_device(key_device("b"));

        let all = backend
            .enumerate_devices(&DeviceSelector::for_service(KEY_INPUT_SERVICE_UUID))
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let one = backend
            .enumerate_devices(
                &DeviceSelector::for_service(GENERIC_ACCESS_SERVICE_UUID).with_container("b"),
            )
            .await
            .unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].container_id(), Some("b"));
    }

    #[tokio::test]
    async fn test_duplicate_services_get_distinct_ids() {
        let backend = SimulatedBackend::new();
        backend.add_device(
            key_device("a").with_service(SimulatedService::new(GENERIC_ACCESS_SERVICE_UUID)),
        );

        let records = backend
            .enumerate_devices(&DeviceSelector::for_service(GENERIC_ACCESS_SERVICE_UUID))
            .await
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_ne!(records[0].id, records[1].id);
    }

    #[tokio::test]
    async fn test_open_and_close_tracks_handles() {
        let backend = SimulatedBackend::new();
        backend.add_device(key_device("a"));

        let id = format!("a/{}", KEY_INPUT_SERVICE_UUID);
        let service = backend.open_service(&id).await.unwrap();
        assert_eq!(backend.open_handle_count(), 1);

        backend.close_service(&service).await.unwrap();
        assert_eq!(backend.open_handle_count(), 0);
        assert!(backend.close_service(&service).await.is_err());
    }

    #[tokio::test]
    async fn test_notifications_require_enabled_config() {
        let backend = SimulatedBackend::new();
        backend.add_device(key_device("a"));

        let service = backend
            .open_service(&format!("a/{}", KEY_INPUT_SERVICE_UUID))
            .await
            .unwrap();
        let characteristic = service
            .characteristic(&KEY_INPUT_CHARACTERISTIC_UUID)
            .unwrap()
            .clone();

        let mut stream = backend.value_changed(&characteristic).await.unwrap();
        assert_eq!(backend.notify("a", KEY_INPUT_CHARACTERISTIC_UUID, &[1]), 0);

        backend
            .write_client_config(&characteristic, ClientConfig::Notify)
            .await
            .unwrap();
        assert_eq!(backend.notify("a", KEY_INPUT_CHARACTERISTIC_UUID, &[2]), 1);
        assert_eq!(stream.next().await, Some(Bytes::from_static(&[2])));
    }

    #[tokio::test]
    async fn test_read_failure_injection() {
        let backend = SimulatedBackend::new();
        backend.add_device(key_device("a").fail_read(DEVICE_NAME_CHARACTERISTIC_UUID, "timeout"));

        let service = backend
            .open_service(&format!("a/{}", GENERIC_ACCESS_SERVICE_UUID))
            .await
            .unwrap();
        let name = service
            .characteristic(&DEVICE_NAME_CHARACTERISTIC_UUID)
            .unwrap();

        let err = backend.read_value(name, CacheMode::Uncached).await.unwrap_err();
        assert!(err.to_string().contains("timeout"));
        assert!(backend.was_read("a", DEVICE_NAME_CHARACTERISTIC_UUID, CacheMode::Uncached));
    }

    #[tokio::test]
    async fn test_disable_injection_only_affects_disabling() {
        let backend = SimulatedBackend::new();
        backend.add_device(key_device("a").reject_disable(KEY_INPUT_CHARACTERISTIC_UUID));
        backend.add_device(key_device("b").hang_disable(KEY_INPUT_CHARACTERISTIC_UUID));

        for container in ["a", "b"] {
            let service = backend
                .open_service(&format!("{}/{}", container, KEY_INPUT_SERVICE_UUID))
                .await
                .unwrap();
            let characteristic = service
                .characteristic(&KEY_INPUT_CHARACTERISTIC_UUID)
                .unwrap()
                .clone();

            tokio_test::assert_ok!(
                backend
                    .write_client_config(&characteristic, ClientConfig::Notify)
                    .await
            );
            assert_eq!(
                backend.client_config(container, KEY_INPUT_CHARACTERISTIC_UUID),
                ClientConfig::Notify
            );

            let disable = tokio::time::timeout(
                std::time::Duration::from_millis(50),
                backend.write_client_config(&characteristic, ClientConfig::None),
            )
            .await;
            match container {
                "a" => assert!(matches!(disable, Ok(Err(Error::Internal(_))))),
                _ => assert!(disable.is_err()),
            }
            assert_eq!(
                backend.client_config(container, KEY_INPUT_CHARACTERISTIC_UUID),
                ClientConfig::Notify
            );
        }
    }
}

//! Device and GATT handle types.
//!
//! These are the values exchanged with a [`GattBackend`](crate::ble::GattBackend):
//! enumeration produces [`DeviceRecord`]s, opening a record's id produces a
//! [`GattService`], and a service owns its [`Characteristic`] handles.

use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use crate::ble::uuids::CONTAINER_ID_PROPERTY;
use crate::error::{Error, Result};

/// One discovered service instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    /// Opaque identifier used to re-open the service.
    pub id: String,
    /// UUID of the service this record describes.
    pub service_uuid: Uuid,
    /// Extra properties returned with the record.
    pub properties: HashMap<String, String>,
}

impl DeviceRecord {
    /// Create a record with an empty property bag.
    pub fn new(id: impl Into<String>, service_uuid: Uuid) -> Self {
        Self {
            id: id.into(),
            service_uuid,
            properties: HashMap::new(),
        }
    }

    /// Add a property to the record.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// The device-group identifier, if the record carries one.
    pub fn container_id(&self) -> Option<&str> {
        self.properties.get(CONTAINER_ID_PROPERTY).map(String::as_str)
    }
}

/// Enumeration filter: a service UUID, optionally narrowed to one physical device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSelector {
    /// Service UUID every match must expose.
    pub service_uuid: Uuid,
    /// Device-group identifier every match must share.
    pub container_id: Option<String>,
}

impl DeviceSelector {
    /// Select every device exposing `service_uuid`.
    pub fn for_service(service_uuid: Uuid) -> Self {
        Self {
            service_uuid,
            container_id: None,
        }
    }

    /// Narrow the selection to services on one physical device.
    pub fn with_container(mut self, container_id: impl Into<String>) -> Self {
        self.container_id = Some(container_id.into());
        self
    }

    /// Check whether a record satisfies this selector.
    pub fn matches(&self, record: &DeviceRecord) -> bool {
        if record.service_uuid != self.service_uuid {
            return false;
        }

        match &self.container_id {
            Some(expected) => record.container_id() == Some(expected.as_str()),
            None => true,
        }
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "System.Devices.InterfaceClassGuid:=\"{{{}}}\"",
            self.service_uuid
        )?;
        if let Some(container_id) = &self.container_id {
            write!(f, " AND {}:=\"{{{}}}\"", CONTAINER_ID_PROPERTY, container_id)?;
        }
        Ok(())
    }
}

/// A characteristic handle within an opened service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Characteristic {
    /// Identifier of the owning service.
    pub service_id: String,
    /// Characteristic UUID.
    pub uuid: Uuid,
}

/// An opened handle to one GATT service on one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    /// Identifier the service was opened with.
    pub id: String,
    /// Service UUID.
    pub uuid: Uuid,
    /// Characteristics exposed by the service.
    pub characteristics: Vec<Characteristic>,
}

impl GattService {
    /// All characteristics with the given UUID.
    pub fn characteristics(&self, uuid: &Uuid) -> Vec<&Characteristic> {
        self.characteristics
            .iter()
            .filter(|c| c.uuid == *uuid)
            .collect()
    }

    /// The first characteristic with the given UUID.
    pub fn characteristic(&self, uuid: &Uuid) -> Result<&Characteristic> {
        self.characteristics
            .iter()
            .find(|c| c.uuid == *uuid)
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: uuid.to_string(),
            })
    }
}

/// Whether a read may be served from the platform's value cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CacheMode {
    /// Return the cached value when one exists.
    Cached,
    /// Always read from the peripheral.
    #[default]
    Uncached,
}

/// Value written to a characteristic's client configuration descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ClientConfig {
    /// No value-changed events.
    #[default]
    None,
    /// Unacknowledged value-changed events.
    Notify,
    /// Acknowledged value-changed events.
    Indicate,
}

impl ClientConfig {
    /// Check if this value enables delivery of value-changed events.
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::None)
    }
}

//! Session and adapter configuration.

use std::time::Duration;
use uuid::Uuid;

use crate::ble::device::CacheMode;
use crate::ble::uuids::{KEY_INPUT_CHARACTERISTIC_UUID, KEY_INPUT_SERVICE_UUID};

/// Configuration for a [`GattSession`](crate::GattSession).
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Service every candidate device must expose.
    pub key_input_service_uuid: Uuid,
    /// Characteristic subscribed to on each device.
    pub key_input_characteristic_uuid: Uuid,
    /// Cache policy for the device name read.
    pub device_name_cache_mode: CacheMode,
    /// Cache policy for the system id read.
    pub system_id_cache_mode: CacheMode,
    /// Upper bound on disabling notifications during shutdown.
    pub cleanup_timeout: Duration,
    /// Capacity of the session event channel.
    pub event_capacity: usize,
}

impl SessionConfig {
    /// Default time allowed for best-effort cleanup per device.
    pub const DEFAULT_CLEANUP_TIMEOUT: Duration = Duration::from_secs(2);

    /// Default event channel capacity.
    pub const DEFAULT_EVENT_CAPACITY: usize = 256;

    /// Use a different key input service and characteristic.
    pub fn with_key_input(mut self, service_uuid: Uuid, characteristic_uuid: Uuid) -> Self {
        self.key_input_service_uuid = service_uuid;
        self.key_input_characteristic_uuid = characteristic_uuid;
        self
    }

    /// Set the cache policy for both identity reads.
    pub fn with_cache_mode(mut self, cache_mode: CacheMode) -> Self {
        self.device_name_cache_mode = cache_mode;
        self.system_id_cache_mode = cache_mode;
        self
    }

    /// Set the cleanup timeout.
    pub fn with_cleanup_timeout(mut self, timeout: Duration) -> Self {
        self.cleanup_timeout = timeout;
        self
    }

    /// Set the event channel capacity.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            key_input_service_uuid: KEY_INPUT_SERVICE_UUID,
            key_input_characteristic_uuid: KEY_INPUT_CHARACTERISTIC_UUID,
            device_name_cache_mode: CacheMode::Uncached,
            system_id_cache_mode: CacheMode::Uncached,
            cleanup_timeout: Self::DEFAULT_CLEANUP_TIMEOUT,
            event_capacity: Self::DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// Configuration for the btleplug backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterConfig {
    /// Index of the adapter to use, in the order the platform lists them.
    pub adapter_index: usize,
    /// How long one enumeration snapshot scans for.
    pub scan_duration: Duration,
    /// Connection attempts before giving up on a peripheral.
    pub connect_attempts: u32,
    /// Delay between connection attempts.
    pub connect_retry_delay: Duration,
}

impl AdapterConfig {
    /// Set the scan duration.
    pub fn with_scan_duration(mut self, duration: Duration) -> Self {
        self.scan_duration = duration;
        self
    }

    /// Select an adapter by index.
    pub fn with_adapter_index(mut self, index: usize) -> Self {
        self.adapter_index = index;
        self
    }

    /// Set the connection retry parameters.
    pub fn with_connect_params(mut self, attempts: u32, delay: Duration) -> Self {
        self.connect_attempts = attempts.max(1);
        self.connect_retry_delay = delay;
        self
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            adapter_index: 0,
            scan_duration: Duration::from_secs(5),
            connect_attempts: 3,
            connect_retry_delay: Duration::from_secs(1),
        }
    }
}

//! BLE scanning functionality.
//!
//! Provides one-shot scan snapshots used to enumerate peripherals that
//! advertise a given service.

use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::StreamExt;
use std::time::Duration;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::config::AdapterConfig;
use crate::error::{Error, Result};

/// BLE scanner taking enumeration snapshots.
pub struct BleScanner {
    /// The BLE adapter to use for scanning.
    adapter: Adapter,
}

impl BleScanner {
    /// Create a new BLE scanner on the configured adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new(config: &AdapterConfig) -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .nth(config.adapter_index)
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Ok(Self { adapter })
    }

    /// Scan for `duration` and return every peripheral advertising `service_uuid`.
    ///
    /// This is a snapshot: peripherals appearing after the scan window are
    /// not reported.
    pub async fn scan_snapshot(&self, service_uuid: Uuid, duration: Duration) -> Result<Vec<Peripheral>> {
        info!("Scanning {:?} for {} devices", duration, service_uuid);

        let mut events = self.adapter.events().await.map_err(Error::Bluetooth)?;

        self.adapter
            .start_scan(ScanFilter {
                services: vec![service_uuid],
            })
            .await
            .map_err(Error::Bluetooth)?;

        let deadline = tokio::time::sleep(duration);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                Some(event) = events.next() => {
                    if let CentralEvent::DeviceDiscovered(id) = event {
                        trace!("Device discovered: {:?}", id);
                    }
                }
                _ = &mut deadline => break,
            }
        }

        if let Err(e) = self.adapter.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }

        let mut matches = Vec::new();
        for peripheral in self.adapter.peripherals().await.map_err(Error::Bluetooth)? {
            if Self::advertises(&peripheral, &service_uuid).await {
                matches.push(peripheral);
            }
        }

        debug!("Scan snapshot found {} peripherals", matches.len());

        Ok(matches)
    }

    /// Look up a peripheral the adapter already knows about.
    pub async fn find_peripheral(&self, identifier: &str) -> Result<Option<Peripheral>> {
        let peripherals = self.adapter.peripherals().await.map_err(Error::Bluetooth)?;
        Ok(peripherals
            .into_iter()
            .find(|p| p.id().to_string() == identifier))
    }

    /// Check advertised services, falling back to services already discovered
    /// over an existing connection.
    async fn advertises(peripheral: &Peripheral, service_uuid: &Uuid) -> bool {
        let advertised = match peripheral.properties().await {
            Ok(Some(properties)) => properties.services.contains(service_uuid),
            _ => false,
        };

        advertised
            || peripheral
                .services()
                .iter()
                .any(|service| service.uuid == *service_uuid)
    }
}

//! BLE connection management.
//!
//! Opens and releases the link to one peripheral on behalf of every service
//! handle the session holds on it.

use btleplug::api::Peripheral as _;
use btleplug::platform::Peripheral;
use parking_lot::RwLock;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::AdapterConfig;
use crate::error::{Error, Result};

/// Connection state for a peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Not connected.
    #[default]
    Disconnected,
    /// Currently attempting to connect.
    Connecting,
    /// Connected with services discovered.
    Connected,
    /// Currently disconnecting.
    Disconnecting,
}

impl ConnectionState {
    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Disconnecting => write!(f, "Disconnecting"),
        }
    }
}

/// Manages the connection to one peripheral.
pub struct ConnectionManager {
    /// The peripheral to manage.
    peripheral: Peripheral,
    /// Current connection state.
    state: RwLock<ConnectionState>,
    /// Service handles currently open on this peripheral.
    open_handles: RwLock<usize>,
    /// Maximum connection attempts.
    max_attempts: u32,
    /// Delay between attempts.
    retry_delay: Duration,
}

impl ConnectionManager {
    /// Create a new connection manager for a peripheral.
    pub fn new(peripheral: Peripheral, config: &AdapterConfig) -> Self {
        Self {
            peripheral,
            state: RwLock::new(ConnectionState::Disconnected),
            open_handles: RwLock::new(0),
            max_attempts: config.connect_attempts.max(1),
            retry_delay: config.connect_retry_delay,
        }
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Get the peripheral.
    pub fn peripheral(&self) -> &Peripheral {
        &self.peripheral
    }

    /// Number of service handles open on this peripheral.
    pub fn open_handles(&self) -> usize {
        *self.open_handles.read()
    }

    /// Connect and discover services, retrying on failure.
    pub async fn connect(&self) -> Result<()> {
        if self.state().is_connected() && self.peripheral.is_connected().await.unwrap_or(false) {
            return Ok(());
        }

        self.set_state(ConnectionState::Connecting);

        if self.peripheral.is_connected().await.unwrap_or(false) {
            info!("Peripheral already connected at BLE level");
            self.discover_services().await;
            self.set_state(ConnectionState::Connected);
            return Ok(());
        }

        let mut attempts = 0;
        while attempts < self.max_attempts {
            attempts += 1;

            debug!("Connection attempt {} of {}", attempts, self.max_attempts);

            match self.peripheral.connect().await {
                Ok(_) => {
                    info!("Connected to {}", self.peripheral.id());
                    self.discover_services().await;
                    self.set_state(ConnectionState::Connected);
                    return Ok(());
                }
                Err(e) => {
                    warn!("Connection attempt {} failed: {}", attempts, e);

                    if attempts < self.max_attempts {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }

        self.set_state(ConnectionState::Disconnected);
        Err(Error::ServiceOpenFailed {
            service_id: self.peripheral.id().to_string(),
            reason: format!("connection failed after {} attempts", self.max_attempts),
        })
    }

    /// Record a newly opened service handle, connecting first if needed.
    pub async fn acquire(&self) -> Result<()> {
        self.connect().await?;
        *self.open_handles.write() += 1;
        Ok(())
    }

    /// Release a service handle, disconnecting once none remain.
    pub async fn release(&self) -> Result<()> {
        let remaining = {
            let mut handles = self.open_handles.write();
            *handles = handles.saturating_sub(1);
            *handles
        };

        if remaining == 0 {
            self.disconnect().await?;
        }

        Ok(())
    }

    /// Disconnect from the peripheral.
    pub async fn disconnect(&self) -> Result<()> {
        let current_state = self.state();

        if matches!(
            current_state,
            ConnectionState::Disconnected | ConnectionState::Disconnecting
        ) {
            return Ok(());
        }

        self.set_state(ConnectionState::Disconnecting);

        match self.peripheral.disconnect().await {
            Ok(_) => {
                info!("Disconnected from {}", self.peripheral.id());
                self.set_state(ConnectionState::Disconnected);
                Ok(())
            }
            Err(e) => {
                error!("Failed to disconnect: {}", e);
                self.set_state(ConnectionState::Disconnected);
                Err(Error::Bluetooth(e))
            }
        }
    }

    async fn discover_services(&self) {
        if let Err(e) = self.peripheral.discover_services().await {
            warn!("Failed to discover services: {}", e);
        }
    }

    fn set_state(&self, new_state: ConnectionState) {
        let old_state = std::mem::replace(&mut *self.state.write(), new_state);

        if old_state != new_state {
            debug!("Connection state changed: {} -> {}", old_state, new_state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state() {
        assert!(!ConnectionState::Disconnected.is_connected());
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
        assert!(!ConnectionState::Disconnecting.is_connected());
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(format!("{}", ConnectionState::Connected), "Connected");
        assert_eq!(format!("{}", ConnectionState::Disconnected), "Disconnected");
    }
}

//! Key input session.
//!
//! A [`GattSession`] enumerates every device exposing the key input service
//! once, then runs one pipeline per device: read the device name from the
//! Generic Access sibling, read the System ID from the Device Information
//! sibling, enable notifications on the key input characteristic and publish
//! every notification until the session is cancelled.
//!
//! Pipelines run concurrently and fail independently. A failing device is
//! reported with [`SessionEvent::DeviceFailed`] and never stops the others.

use chrono::Utc;
use futures::future::join_all;
use futures::stream::StreamExt;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::ble::backend::GattBackend;
use crate::ble::correlator::{find_sibling_service, open_service};
use crate::ble::device::{Characteristic, ClientConfig, DeviceRecord, DeviceSelector, GattService};
use crate::ble::platform::BtleplugBackend;
use crate::ble::uuids::*;
use crate::config::{AdapterConfig, SessionConfig};
use crate::error::{Error, Result};
use crate::events::{KeyInputEvent, SessionEvent, SessionState};
use crate::protocol::{decode_utf8, SystemId};
use crate::utils::cancellable;

/// Name shown for a device whose name could not be read.
pub const UNKNOWN_DEVICE_NAME: &str = "<unknown>";

/// Discovers key input devices and streams their key notifications.
pub struct GattSession {
    /// The BLE stack.
    backend: Arc<dyn GattBackend>,
    /// Session configuration.
    config: SessionConfig,
    /// Current state.
    state: RwLock<SessionState>,
    /// Devices with notifications currently enabled.
    active_subscriptions: AtomicUsize,
    /// Event channel.
    event_tx: broadcast::Sender<SessionEvent>,
}

impl GattSession {
    /// Create a session over any backend.
    pub fn new(backend: Arc<dyn GattBackend>, config: SessionConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));

        Self {
            backend,
            config,
            state: RwLock::new(SessionState::Idle),
            active_subscriptions: AtomicUsize::new(0),
            event_tx,
        }
    }

    /// Create a session on the platform BLE stack.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn with_btleplug(adapter: AdapterConfig, config: SessionConfig) -> Result<Self> {
        let backend = BtleplugBackend::new(adapter).await?;
        Ok(Self::new(Arc::new(backend), config))
    }

    /// Get the current state.
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Number of devices with notifications currently enabled.
    pub fn active_subscriptions(&self) -> usize {
        self.active_subscriptions.load(Ordering::SeqCst)
    }

    /// Get the session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Run the session until every device pipeline has finished.
    ///
    /// Pipelines with an active subscription only finish when `token` is
    /// cancelled or their device goes away. Cancellation is a normal way to
    /// end a session and resolves to `Ok(())`.
    ///
    /// # Errors
    ///
    /// Returns an error if the session was already started or the key input
    /// enumeration itself fails (for example, the adapter is unavailable).
    pub async fn run(&self, token: CancellationToken) -> Result<()> {
        {
            let mut state = self.state.write();
            if *state != SessionState::Idle {
                return Err(Error::Internal(format!("session already {}", *state)));
            }
            *state = SessionState::Enumerating;
        }
        self.emit(SessionEvent::StateChanged(SessionState::Enumerating));

        let selector = DeviceSelector::for_service(self.config.key_input_service_uuid);
        info!("Enumerating devices with {}", selector);

        let records = match cancellable(&token, self.backend.enumerate_devices(&selector)).await {
            Ok(records) => records,
            Err(Error::Cancelled) => {
                info!("Session cancelled during enumeration");
                self.set_state(SessionState::Stopped);
                return Ok(());
            }
            Err(e) => {
                error!("Key input enumeration failed: {}", e);
                self.set_state(SessionState::Stopped);
                return Err(e);
            }
        };

        info!("Found {} key input devices", records.len());
        self.set_state(SessionState::PerDeviceProcessing);

        let pipelines = join_all(records.iter().map(|record| self.run_device(record, &token)));
        tokio::pin!(pipelines);

        tokio::select! {
            biased;
            _ = token.cancelled() => {
                self.set_state(SessionState::Cancelling);
                pipelines.await;
            }
            _ = &mut pipelines => {}
        }

        self.set_state(SessionState::Stopped);
        info!("Session stopped");

        Ok(())
    }

    /// Run one device pipeline, reporting its failure without propagating it.
    async fn run_device(&self, record: &DeviceRecord, token: &CancellationToken) {
        match self.process_device(record, token).await {
            Ok(()) => debug!("Pipeline for {} finished", record.id),
            Err(Error::Cancelled) => debug!("Pipeline for {} cancelled", record.id),
            Err(e) => {
                warn!("Pipeline for {} failed: {}", record.id, e);
                self.emit(SessionEvent::DeviceFailed {
                    device_id: record.id.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    async fn process_device(&self, record: &DeviceRecord, token: &CancellationToken) -> Result<()> {
        // Held for the whole pipeline so the link stays up across sibling lookups
        let service = open_service(self.backend.as_ref(), &record.id, token).await?;
        let result = self.identify_and_stream(&service, record, token).await;
        self.release(&service).await;

        result
    }

    async fn identify_and_stream(
        &self,
        service: &GattService,
        record: &DeviceRecord,
        token: &CancellationToken,
    ) -> Result<()> {
        let device_name = match self.read_device_name(record, token).await {
            Ok(name) => name,
            Err(e) if e.is_cancelled() || e.is_correlation_failure() => return Err(e),
            Err(e) => {
                warn!("{}: {}", record.id, e);
                UNKNOWN_DEVICE_NAME.to_string()
            }
        };

        info!("Device({}): {}", device_name, record.id);
        self.emit(SessionEvent::DeviceIdentified {
            device_id: record.id.clone(),
            device_name: device_name.clone(),
        });

        match self.read_system_id(record, token).await {
            Ok(system_id) => {
                info!("Device({}) SystemID: {}", device_name, system_id);
                self.emit(SessionEvent::SystemIdRead {
                    device_name: device_name.clone(),
                    system_id,
                });
            }
            // A missing Device Information service is tolerated, a broken correlation is not
            Err(e @ Error::NoSiblingFound { .. }) => {
                warn!("System ID unavailable for {}: {}", device_name, e)
            }
            Err(e) if e.is_cancelled() || e.is_correlation_failure() => return Err(e),
            Err(e) => warn!("System ID unavailable for {}: {}", device_name, e),
        }

        self.stream_key_input(service, record, &device_name, token)
            .await
    }

    /// Read and decode the Generic Access device name.
    async fn read_device_name(&self, record: &DeviceRecord, token: &CancellationToken) -> Result<String> {
        let service = find_sibling_service(
            self.backend.as_ref(),
            record,
            GENERIC_ACCESS_SERVICE_UUID,
            token,
        )
        .await?;

        let result = self.read_name_from(&service, token).await;
        self.release(&service).await;

        result
    }

    async fn read_name_from(&self, service: &GattService, token: &CancellationToken) -> Result<String> {
        let characteristic = service
            .characteristic(&DEVICE_NAME_CHARACTERISTIC_UUID)
            .map_err(|e| Error::DeviceNameUnavailable {
                reason: e.to_string(),
            })?;

        let value = cancellable(
            token,
            self.backend
                .read_value(characteristic, self.config.device_name_cache_mode),
        )
        .await
        .map_err(|e| match e {
            Error::Cancelled => Error::Cancelled,
            other => Error::DeviceNameUnavailable {
                reason: other.to_string(),
            },
        })?;

        match decode_utf8(&value) {
            Ok(name) => Ok(name),
            Err(e) => {
                warn!("Device name is not valid UTF-8 ({}), showing it lossily", e);
                Ok(String::from_utf8_lossy(&value).into_owned())
            }
        }
    }

    /// Read and decode the Device Information System ID.
    async fn read_system_id(&self, record: &DeviceRecord, token: &CancellationToken) -> Result<SystemId> {
        let service = find_sibling_service(
            self.backend.as_ref(),
            record,
            DEVICE_INFORMATION_SERVICE_UUID,
            token,
        )
        .await?;

        let result = match service.characteristic(&SYSTEM_ID_CHARACTERISTIC_UUID) {
            Ok(characteristic) => cancellable(
                token,
                self.backend
                    .read_value(characteristic, self.config.system_id_cache_mode),
            )
            .await
            .map(|value| SystemId::from_bytes(&value)),
            Err(e) => Err(e),
        };
        self.release(&service).await;

        result
    }

    /// Enable notifications and publish them until cancelled.
    async fn stream_key_input(
        &self,
        service: &GattService,
        record: &DeviceRecord,
        device_name: &str,
        token: &CancellationToken,
    ) -> Result<()> {
        let characteristic = service
            .characteristic(&self.config.key_input_characteristic_uuid)?
            .clone();

        let mut notifications = cancellable(token, self.backend.value_changed(&characteristic)).await?;

        cancellable(
            token,
            self.backend
                .write_client_config(&characteristic, ClientConfig::Notify),
        )
        .await
        .map_err(|e| match e {
            Error::Cancelled | Error::SubscriptionRejected { .. } => e,
            other => Error::SubscriptionRejected {
                uuid: characteristic.uuid.to_string(),
                reason: other.to_string(),
            },
        })?;

        self.subscription_started();
        info!("Subscribed to key input on {}", device_name);
        self.emit(SessionEvent::Subscribed {
            device_name: device_name.to_string(),
        });

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!("Key input stream for {} cancelled", device_name);
                    break;
                }
                payload = notifications.next() => match payload {
                    Some(payload) => self.handle_notification(record, device_name, &payload),
                    None => {
                        warn!("Key input stream for {} ended", device_name);
                        break;
                    }
                },
            }
        }

        self.subscription_ended();
        self.disable_notifications(&characteristic, device_name).await;

        Ok(())
    }

    fn handle_notification(&self, record: &DeviceRecord, device_name: &str, payload: &[u8]) {
        let Some(&value) = payload.first() else {
            let err = Error::MalformedNotification {
                context: format!("empty key input payload from {}", device_name),
            };
            warn!("{}", err);
            return;
        };

        debug!("KeyInputChanged({}): {:X}", device_name, value);

        self.emit(SessionEvent::KeyInput(KeyInputEvent {
            device_id: record.id.clone(),
            device_name: device_name.to_string(),
            value,
            received_at: Utc::now(),
        }));
    }

    /// Best-effort notification disable, bounded by the cleanup timeout.
    async fn disable_notifications(&self, characteristic: &Characteristic, device_name: &str) {
        let disable = self
            .backend
            .write_client_config(characteristic, ClientConfig::None);

        match tokio::time::timeout(self.config.cleanup_timeout, disable).await {
            Ok(Ok(())) => debug!("Disabled key input notifications on {}", device_name),
            Ok(Err(e)) => warn!("Failed to disable notifications on {}: {}", device_name, e),
            Err(_) => warn!(
                "Timed out disabling notifications on {} after {:?}",
                device_name, self.config.cleanup_timeout
            ),
        }
    }

    async fn release(&self, service: &GattService) {
        if let Err(e) = self.backend.close_service(service).await {
            warn!("Failed to release service {}: {}", service.id, e);
        }
    }

    fn subscription_started(&self) {
        self.active_subscriptions.fetch_add(1, Ordering::SeqCst);

        let changed = {
            let mut state = self.state.write();
            let advance = *state == SessionState::PerDeviceProcessing;
            if advance {
                *state = SessionState::Subscribed;
            }
            advance
        };

        if changed {
            debug!(
                "Session state changed: {} -> {}",
                SessionState::PerDeviceProcessing,
                SessionState::Subscribed
            );
            self.emit(SessionEvent::StateChanged(SessionState::Subscribed));
        }
    }

    fn subscription_ended(&self) {
        self.active_subscriptions.fetch_sub(1, Ordering::SeqCst);
    }

    /// Update the state and emit an event.
    fn set_state(&self, new_state: SessionState) {
        let old_state = std::mem::replace(&mut *self.state.write(), new_state);

        if old_state != new_state {
            debug!("Session state changed: {} -> {}", old_state, new_state);
            self.emit(SessionEvent::StateChanged(new_state));
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::simulated::{SimulatedBackend, SimulatedDevice};

    fn session(backend: &SimulatedBackend) -> GattSession {
        GattSession::new(Arc::new(backend.clone()), SessionConfig::default())
    }

    #[tokio::test]
    async fn test_empty_enumeration_stops() {
        let backend = SimulatedBackend::new();
        let session = session(&backend);

        tokio_test::assert_ok!(session.run(CancellationToken::new()).await);
        assert_eq!(session.state(), SessionState::Stopped);
        assert_eq!(backend.enumeration_count(), 1);
    }

    #[tokio::test]
    async fn test_run_twice_is_rejected() {
        let backend = SimulatedBackend::new();
        let session = session(&backend);

        session.run(CancellationToken::new()).await.unwrap();
        tokio_test::assert_err!(session.run(CancellationToken::new()).await);
    }

    #[tokio::test]
    async fn test_enumeration_failure_is_fatal() {
        let backend = SimulatedBackend::new();
        backend.fail_enumeration();
        let session = session(&backend);

        let err = session.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, Error::BluetoothUnavailable));
        assert_eq!(session.state(), SessionState::Stopped);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let backend = SimulatedBackend::new();
        backend.add_device(SimulatedDevice::key_input("a", "AB", &[1]));
        let session = session(&backend);

        let token = CancellationToken::new();
        token.cancel();

        tokio_test::assert_ok!(session.run(token).await);
        assert_eq!(session.state(), SessionState::Stopped);
        assert_eq!(backend.open_handle_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_notification_is_dropped() {
        let backend = SimulatedBackend::new();
        let session = session(&backend);
        let mut rx = session.subscribe();
        let record = DeviceRecord::new("a", KEY_INPUT_SERVICE_UUID);

        session.handle_notification(&record, "AB", &[]);
        session.handle_notification(&record, "AB", &[0x05, 0x06]);

        match rx.try_recv().unwrap() {
            SessionEvent::KeyInput(event) => {
                assert_eq!(event.value, 0x05);
                assert_eq!(event.device_name, "AB");
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }
}

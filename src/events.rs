//! Events published by a [`GattSession`](crate::GattSession).

use chrono::{DateTime, Utc};
use std::fmt;

use crate::protocol::SystemId;

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SessionState {
    /// Created, not yet running.
    #[default]
    Idle,
    /// Looking for key input devices.
    Enumerating,
    /// Running device pipelines, none subscribed yet.
    PerDeviceProcessing,
    /// At least one device has an active subscription.
    Subscribed,
    /// Cancellation observed, pipelines are cleaning up.
    Cancelling,
    /// Every pipeline has finished.
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Enumerating => write!(f, "Enumerating"),
            Self::PerDeviceProcessing => write!(f, "PerDeviceProcessing"),
            Self::Subscribed => write!(f, "Subscribed"),
            Self::Cancelling => write!(f, "Cancelling"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// A key input notification.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct KeyInputEvent {
    /// Id of the key input service the notification came from.
    pub device_id: String,
    /// Decoded device name.
    pub device_name: String,
    /// First byte of the notification payload.
    pub value: u8,
    /// When the notification was received.
    pub received_at: DateTime<Utc>,
}

/// Something that happened during a session.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SessionEvent {
    /// The session moved to a new state.
    StateChanged(SessionState),
    /// A device's name was read (or replaced by a placeholder).
    DeviceIdentified {
        /// Id of the key input service.
        device_id: String,
        /// Decoded device name.
        device_name: String,
    },
    /// A device's System ID was read.
    SystemIdRead {
        /// Decoded device name.
        device_name: String,
        /// The decoded System ID.
        system_id: SystemId,
    },
    /// Notifications were enabled on a device.
    Subscribed {
        /// Decoded device name.
        device_name: String,
    },
    /// A key input notification arrived.
    KeyInput(KeyInputEvent),
    /// A device pipeline ended with an error.
    DeviceFailed {
        /// Id of the key input service.
        device_id: String,
        /// Description of the failure.
        reason: String,
    },
}

impl SessionEvent {
    /// The console line for this event, if it has one.
    ///
    /// ```
    /// use key_input_gatt::{SessionEvent, SystemId};
    ///
    /// let event = SessionEvent::SystemIdRead {
    ///     device_name: "AB".to_string(),
    ///     system_id: SystemId(0x0001020304050607),
    /// };
    /// assert_eq!(event.console_line().unwrap(), "\tSystemID: 0001020304050607");
    /// ```
    pub fn console_line(&self) -> Option<String> {
        match self {
            Self::DeviceIdentified { device_name, .. } => Some(format!("Device({}):", device_name)),
            Self::SystemIdRead { system_id, .. } => Some(format!("\tSystemID: {}", system_id)),
            Self::KeyInput(event) => Some(format!(
                "KeyInputChanged({}): {:X}",
                event.device_name, event.value
            )),
            Self::DeviceFailed { device_id, reason } => {
                Some(format!("Device {} failed: {}", device_id, reason))
            }
            Self::StateChanged(_) | Self::Subscribed { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::PerDeviceProcessing.to_string(), "PerDeviceProcessing");
        assert_eq!(SessionState::default(), SessionState::Idle);
    }

    #[test]
    fn test_console_lines() {
        let identified = SessionEvent::DeviceIdentified {
            device_id: "a".to_string(),
            device_name: "AB".to_string(),
        };
        assert_eq!(identified.console_line().unwrap(), "Device(AB):");

        let key = SessionEvent::KeyInput(KeyInputEvent {
            device_id: "a".to_string(),
            device_name: "AB".to_string(),
            value: 0x09,
            received_at: Utc::now(),
        });
        assert_eq!(key.console_line().unwrap(), "KeyInputChanged(AB): 9");

        assert!(SessionEvent::StateChanged(SessionState::Stopped)
            .console_line()
            .is_none());
    }
}

//! Error types for the key-input-gatt crate.

use thiserror::Error;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// The anchor record carries no device-group identifier.
    #[error("Device record is missing the {property} property")]
    MissingCorrelationProperty {
        /// The property key that was looked up.
        property: String,
    },

    /// No service with the requested UUID exists on the same physical device.
    #[error("No {service_uuid} service found in container {container_id}")]
    NoSiblingFound {
        /// The service UUID that was searched for.
        service_uuid: String,
        /// The device-group identifier of the anchor.
        container_id: String,
    },

    /// More than one service with the requested UUID exists on the device.
    #[error("{count} {service_uuid} services found in container {container_id}, expected one")]
    AmbiguousSibling {
        /// The service UUID that was searched for.
        service_uuid: String,
        /// The device-group identifier of the anchor.
        container_id: String,
        /// How many services matched.
        count: usize,
    },

    /// The service could not be opened.
    #[error("Failed to open service {service_id}: {reason}")]
    ServiceOpenFailed {
        /// Identifier of the service that failed to open.
        service_id: String,
        /// Description of why the open failed.
        reason: String,
    },

    /// The device name could not be read.
    #[error("Device name unavailable: {reason}")]
    DeviceNameUnavailable {
        /// Description of why the name is unavailable.
        reason: String,
    },

    /// Characteristic not found on the service.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID of the characteristic that was not found.
        uuid: String,
    },

    /// The peripheral refused the client configuration write.
    #[error("Subscription to {uuid} rejected: {reason}")]
    SubscriptionRejected {
        /// The UUID of the characteristic.
        uuid: String,
        /// Description of why the write failed.
        reason: String,
    },

    /// A notification payload could not be interpreted.
    #[error("Malformed notification: {context}")]
    MalformedNotification {
        /// Description of what was wrong with the payload.
        context: String,
    },

    /// A characteristic value could not be decoded.
    #[error("Decode error: {context}")]
    Decode {
        /// Description of what failed to decode.
        context: String,
    },

    /// The operation was interrupted by the session's cancellation token.
    #[error("Operation cancelled")]
    Cancelled,

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if this error is the cancellation outcome.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Check if this error came from resolving or opening a sibling service.
    pub fn is_correlation_failure(&self) -> bool {
        matches!(
            self,
            Self::MissingCorrelationProperty { .. }
                | Self::NoSiblingFound { .. }
                | Self::AmbiguousSibling { .. }
                | Self::ServiceOpenFailed { .. }
        )
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::BluetoothUnavailable.is_cancelled());

        let err = Error::AmbiguousSibling {
            service_uuid: "180a".to_string(),
            container_id: "c1".to_string(),
            count: 2,
        };
        assert!(err.is_correlation_failure());
        assert!(!Error::CharacteristicNotFound {
            uuid: "ffe1".to_string()
        }
        .is_correlation_failure());
    }

    #[test]
    fn test_error_display() {
        let err = Error::NoSiblingFound {
            service_uuid: "1800".to_string(),
            container_id: "abc".to_string(),
        };
        assert_eq!(err.to_string(), "No 1800 service found in container abc");
    }
}

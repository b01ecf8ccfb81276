//! BLE Service and Characteristic UUIDs.
//!
//! Contains the UUID constants and short-id expansion used to locate
//! key-input peripherals and their identity services.

use uuid::Uuid;

/// The Bluetooth Base UUID that 16-bit short ids are inserted into.
pub const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_00805f9b34fb;

/// Expand a 16-bit short id into a full 128-bit UUID.
///
/// ```
/// use key_input_gatt::ble::uuids::short_id_to_uuid;
///
/// let uuid = short_id_to_uuid(0x180a);
/// assert_eq!(uuid.to_string(), "0000180a-0000-1000-8000-00805f9b34fb");
/// ```
pub const fn short_id_to_uuid(short_id: u16) -> Uuid {
    Uuid::from_u128(((short_id as u128) << 96) | BLUETOOTH_BASE_UUID)
}

/// Recover the 16-bit short id from a UUID built on the base UUID.
pub fn uuid_to_short_id(uuid: &Uuid) -> Option<u16> {
    let value = uuid.as_u128();
    let is_short = (value & ((1 << 96) - 1)) == BLUETOOTH_BASE_UUID && (value >> 112) == 0;
    is_short.then_some((value >> 96) as u16)
}

// Standard services
/// Generic Access service UUID.
pub const GENERIC_ACCESS_SERVICE_UUID: Uuid = short_id_to_uuid(0x1800);
/// Device Information service UUID.
pub const DEVICE_INFORMATION_SERVICE_UUID: Uuid = short_id_to_uuid(0x180a);

// Standard characteristics
/// Device Name characteristic UUID (Generic Access).
pub const DEVICE_NAME_CHARACTERISTIC_UUID: Uuid = short_id_to_uuid(0x2a00);
/// System ID characteristic UUID (Device Information).
pub const SYSTEM_ID_CHARACTERISTIC_UUID: Uuid = short_id_to_uuid(0x2a23);

// Key input (vendor-specific, expanded on the base UUID all the same)
/// Key input service UUID.
pub const KEY_INPUT_SERVICE_UUID: Uuid = short_id_to_uuid(0xffe0);
/// Key input characteristic UUID (Notify).
pub const KEY_INPUT_CHARACTERISTIC_UUID: Uuid = short_id_to_uuid(0xffe1);

/// Device property holding the identifier shared by every service of one
/// physical device.
pub const CONTAINER_ID_PROPERTY: &str = "System.Devices.ContainerId";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_format() {
        assert_eq!(
            GENERIC_ACCESS_SERVICE_UUID.to_string(),
            "00001800-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            KEY_INPUT_CHARACTERISTIC_UUID.to_string(),
            "0000ffe1-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_short_id_roundtrip() {
        assert_eq!(uuid_to_short_id(&SYSTEM_ID_CHARACTERISTIC_UUID), Some(0x2a23));
        assert_eq!(uuid_to_short_id(&KEY_INPUT_SERVICE_UUID), Some(0xffe0));
    }

    #[test]
    fn test_uuid_to_short_id_rejects_custom() {
        let custom = Uuid::from_u128(0x6e40_0001_b5a3_f393_e0a9_e50e24dcca9e);
        assert_eq!(uuid_to_short_id(&custom), None);

        // 32-bit ids share the base but are not short ids
        let wide = Uuid::from_u128((0x0001_2345u128 << 96) | BLUETOOTH_BASE_UUID);
        assert_eq!(uuid_to_short_id(&wide), None);
    }
}

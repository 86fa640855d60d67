//! GATT endpoint identity for the serial service.
//!
//! The UUID triple locates the target service on a device: one service UUID
//! and the two characteristics the stream talks through. The constants below
//! are the Nordic UART Service values, shared by every device of this
//! transport family, so they are part of the wire contract rather than a
//! per-call option.

use uuid::Uuid;

// ----------------------------------------------------------------------------
// Nordic UART Service UUIDs
// ----------------------------------------------------------------------------

/// Nordic UART serial service UUID
pub const NUS_SERVICE_UUID: Uuid = Uuid::from_u128(0x6E400001_B5A3_F393_E0A9_E50E24DCCA9E);

/// Characteristic the central writes outbound bytes to
pub const NUS_WRITE_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x6E400002_B5A3_F393_E0A9_E50E24DCCA9E);

/// Characteristic the device notifies inbound bytes on
pub const NUS_NOTIFY_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x6E400003_B5A3_F393_E0A9_E50E24DCCA9E);

// ----------------------------------------------------------------------------
// Endpoint Identity
// ----------------------------------------------------------------------------

/// The three fixed UUIDs that locate a serial endpoint on a device.
///
/// Immutable for the lifetime of a stream instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointIdentity {
    /// GATT service containing both characteristics
    pub service: Uuid,
    /// Outbound (central -> device) characteristic
    pub write_char: Uuid,
    /// Inbound (device -> central, via notification) characteristic
    pub notify_char: Uuid,
}

impl EndpointIdentity {
    /// The Nordic UART Service triple used by the stock serial firmware.
    pub const NORDIC_UART: Self = Self {
        service: NUS_SERVICE_UUID,
        write_char: NUS_WRITE_CHARACTERISTIC_UUID,
        notify_char: NUS_NOTIFY_CHARACTERISTIC_UUID,
    };

    /// Build an identity for a non-standard service layout.
    pub const fn new(service: Uuid, write_char: Uuid, notify_char: Uuid) -> Self {
        Self {
            service,
            write_char,
            notify_char,
        }
    }
}

impl Default for EndpointIdentity {
    fn default() -> Self {
        Self::NORDIC_UART
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nordic_uart_triple_shares_base() {
        let id = EndpointIdentity::default();
        assert_eq!(id.service, NUS_SERVICE_UUID);
        // Characteristics differ from the service only in the short-id word
        let base = id.service.as_u128() & !(0xFFFF_u128 << 96);
        assert_eq!(id.write_char.as_u128() & !(0xFFFF_u128 << 96), base);
        assert_eq!(id.notify_char.as_u128() & !(0xFFFF_u128 << 96), base);
        assert_ne!(id.write_char, id.notify_char);
    }
}

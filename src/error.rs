//! Error types for the BLE serial stream.

use thiserror::Error;
use uuid::Uuid;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors surfaced by the BLE serial stream.
///
/// Connection-lifecycle failures (`ConnectionFailed`, link loss) are never
/// returned from a caller's stack frame; they happen asynchronously and are
/// reported through the connection-event registry instead. The variants here
/// cover synchronous misuse and the failure legs of the driver itself.
#[derive(Error, Debug)]
pub enum BleSerialError {
    #[error("No matching device found: {0}")]
    DeviceNotFound(String),

    #[error("BLE adapter not available")]
    AdapterUnavailable,

    #[error("Stream is not connected")]
    NotConnected,

    #[error("Flush timed out waiting for write acknowledgement")]
    FlushTimeout,

    #[error("Connection timeout")]
    ConnectionTimeout,

    #[error("Failed to connect to device: {0}")]
    ConnectionFailed(String),

    #[error("Failed to scan for devices: {0}")]
    ScanFailed(String),

    #[error("Failed to discover services: {0}")]
    ServiceDiscoveryFailed(String),

    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound { uuid: Uuid },

    #[error("Failed to subscribe to notifications: {0}")]
    SubscriptionFailed(String),

    #[error("Failed to write to characteristic: {0}")]
    WriteFailed(String),
}

pub type Result<T> = core::result::Result<T, BleSerialError>;

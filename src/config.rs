//! Stream configuration

use std::time::Duration;

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Configuration for a BLE serial stream
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BleSerialConfig {
    /// Maximum time to wait for a matching device to appear while scanning
    pub scan_timeout: Duration,
    /// Maximum time to wait for the GATT connection to come up
    pub connection_timeout: Duration,
    /// Maximum time `flush` waits for staged writes to be acknowledged
    pub flush_timeout: Duration,
    /// Characteristic-write payload limit. btleplug exposes no negotiated
    /// MTU, so outbound data is chunked to this size (default 20 bytes,
    /// the BLE 4.x ATT MTU of 23 minus the 3-byte ATT header).
    pub write_chunk_size: usize,
}

impl Default for BleSerialConfig {
    fn default() -> Self {
        Self {
            scan_timeout: Duration::from_secs(10),
            connection_timeout: Duration::from_secs(5),
            flush_timeout: Duration::from_secs(5),
            write_chunk_size: 20,
        }
    }
}

impl BleSerialConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set scan timeout
    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    /// Set connection timeout
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set flush timeout
    pub fn with_flush_timeout(mut self, timeout: Duration) -> Self {
        self.flush_timeout = timeout;
        self
    }

    /// Set characteristic-write payload limit
    pub fn with_write_chunk_size(mut self, size: usize) -> Self {
        self.write_chunk_size = size.max(1);
        self
    }
}

// ----------------------------------------------------------------------------
// Serial framing parameters
// ----------------------------------------------------------------------------

/// Classic serial framing (data bits / parity / stop bits).
///
/// BLE carries no baud rate or framing, so `begin_with` accepts these purely
/// for interface parity with the wired transports and ignores them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum SerialConfig {
    #[default]
    EightNoneOne,
    EightNoneTwo,
    EightEvenOne,
    EightOddOne,
    SevenEvenOne,
    SevenOddOne,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let config = BleSerialConfig::new()
            .with_scan_timeout(Duration::from_secs(2))
            .with_connection_timeout(Duration::from_millis(1500))
            .with_write_chunk_size(182);

        assert_eq!(config.scan_timeout, Duration::from_secs(2));
        assert_eq!(config.connection_timeout, Duration::from_millis(1500));
        assert_eq!(config.write_chunk_size, 182);
        // untouched field keeps its default
        assert_eq!(config.flush_timeout, Duration::from_secs(5));
    }

    #[test]
    fn chunk_size_never_zero() {
        let config = BleSerialConfig::new().with_write_chunk_size(0);
        assert_eq!(config.write_chunk_size, 1);
    }
}

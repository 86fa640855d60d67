//! Serial-stream abstraction over a BLE GATT connection.
//!
//! This crate lets client code treat a wireless microcontroller link like a
//! byte-oriented serial port: open/close, polled reads and writes, formatted
//! numeric printing, and connection-lifecycle notification. The device side
//! is a Nordic UART style GATT service (one write characteristic for
//! outbound bytes, one notify characteristic for inbound bytes); the host
//! side is btleplug's central role.
//!
//! ## Architecture
//!
//! - [`endpoint`] - the fixed service/characteristic UUID triple
//! - [`config`] - timings, chunk sizing, ignored serial framing parameters
//! - [`error`] - error types
//! - [`discovery`] - device resolution and the device-listing snapshot
//! - [`events`] - multi-observer connection-event registry
//! - `buffer` - inbound byte FIFO shared with the notification producer
//! - [`connection`] - connection state machine and the BLE link driver
//! - [`print`] - numeric text encoding for the `print` overloads
//! - [`stream`] - the [`BleSerial`] facade
//!
//! ## Usage
//!
//! ```rust,no_run
//! use ble_serial::{BleSerial, Radix};
//!
//! # fn example() -> ble_serial::Result<()> {
//! let stream = BleSerial::new("Arduino101");
//! stream.on_connection_established(|| println!("link up"));
//! stream.on_connection_failed(|message| eprintln!("connect failed: {message}"));
//! stream.begin()?;
//!
//! // ... once connection_ready() reports true:
//! if stream.connection_ready() {
//!     stream.write_bytes(&[0x41, 0x42, 0x43])?;
//!     stream.print_u32(255, Radix::Hexadecimal)?; // "FF"
//!     while stream.available() > 0 {
//!         if let Some(byte) = stream.read() {
//!             print!("{}", byte as char);
//!         }
//!     }
//! }
//! stream.end();
//! # Ok(())
//! # }
//! ```

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

mod buffer;
pub mod config;
pub mod connection;
pub mod discovery;
pub mod endpoint;
pub mod error;
pub mod events;
pub mod print;
pub mod stream;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use config::{BleSerialConfig, SerialConfig};
pub use connection::ConnectionState;
pub use discovery::{list_available_devices, DeviceInfo, DeviceTarget};
pub use endpoint::{
    EndpointIdentity, NUS_NOTIFY_CHARACTERISTIC_UUID, NUS_SERVICE_UUID,
    NUS_WRITE_CHARACTERISTIC_UUID,
};
pub use error::{BleSerialError, Result};
pub use events::HandlerId;
pub use print::{Radix, DEFAULT_DECIMAL_PLACES};
pub use stream::{BleSerial, StreamGuard};

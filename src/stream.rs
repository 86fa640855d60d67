//! The public stream facade.
//!
//! `BleSerial` composes the resolver target, endpoint identity, connection
//! driver, and inbound buffer behind the synchronous serial contract:
//! `begin`/`end`, polled `read`/`available`, counted `write`/`print`,
//! blocking `flush`, and an advisory lock for multi-call exchanges.

use std::sync::mpsc::RecvTimeoutError;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use btleplug::platform::Peripheral;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::config::{BleSerialConfig, SerialConfig};
use crate::connection::{Command, ConnectionState, Driver, LinkEvent, StreamShared};
use crate::discovery::{self, DeviceInfo, DeviceTarget};
use crate::endpoint::EndpointIdentity;
use crate::error::{BleSerialError, Result};
use crate::events::HandlerId;
use crate::print::{self, Radix, DEFAULT_DECIMAL_PLACES};

// ----------------------------------------------------------------------------
// Stream Facade
// ----------------------------------------------------------------------------

/// Channel and thread handle for one connection attempt.
struct LinkHandle {
    commands: mpsc::UnboundedSender<Command>,
    thread: JoinHandle<()>,
}

/// A serial byte stream over a BLE GATT connection.
///
/// Construction fixes the device target and endpoint identity; `begin`
/// starts the asynchronous handshake and returns immediately. Readiness is
/// polled with [`connection_ready`](Self::connection_ready) or observed via
/// [`on_connection_established`](Self::on_connection_established). Reads are
/// non-blocking: poll [`available`](Self::available), then
/// [`read`](Self::read).
pub struct BleSerial {
    config: BleSerialConfig,
    identity: EndpointIdentity,
    target: DeviceTarget,
    shared: Arc<StreamShared>,
    link: Mutex<Option<LinkHandle>>,
    advisory: Mutex<()>,
}

impl BleSerial {
    /// Stream targeting a device by advertised name, id, or address.
    pub fn new(name_or_id: impl Into<String>) -> Self {
        Self::with_config(name_or_id, BleSerialConfig::default())
    }

    /// Stream targeting a device by name/id with explicit configuration.
    pub fn with_config(name_or_id: impl Into<String>, config: BleSerialConfig) -> Self {
        Self::from_target(DeviceTarget::ByNameOrId(name_or_id.into()), config)
    }

    /// Stream targeting an already-resolved peripheral handle.
    pub fn from_device(peripheral: Peripheral) -> Self {
        Self::from_target(DeviceTarget::ByDescriptor(peripheral), BleSerialConfig::default())
    }

    /// Stream with an explicit target and configuration.
    pub fn from_target(target: DeviceTarget, config: BleSerialConfig) -> Self {
        Self {
            config,
            identity: EndpointIdentity::NORDIC_UART,
            target,
            shared: Arc::new(StreamShared::new()),
            link: Mutex::new(None),
            advisory: Mutex::new(()),
        }
    }

    /// Override the endpoint identity for a non-standard service layout.
    pub fn with_identity(mut self, identity: EndpointIdentity) -> Self {
        self.identity = identity;
        self
    }

    pub fn config(&self) -> &BleSerialConfig {
        &self.config
    }

    pub fn identity(&self) -> &EndpointIdentity {
        &self.identity
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Start the asynchronous connection handshake and return immediately.
    ///
    /// No-op when already `Ready`; joins the in-flight attempt when called
    /// again while `Connecting`. The outcome arrives through the connection
    /// events and [`connection_ready`](Self::connection_ready), never as an
    /// error from a later call's stack frame.
    pub fn begin(&self) -> Result<()> {
        if !self.shared.set_connecting() {
            return Ok(());
        }

        // Held until the handle is installed, so the driver cannot reach
        // `Ready` while `self.link` is still empty.
        let mut link = self.link.lock().unwrap_or_else(PoisonError::into_inner);
        // Reap the thread of a finished earlier attempt
        if let Some(previous) = link.take() {
            let _ = previous.commands.send(Command::Shutdown);
            let _ = previous.thread.join();
        }

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let driver = Driver::new(
            Arc::clone(&self.shared),
            self.identity,
            self.config.clone(),
        );
        let shared = Arc::clone(&self.shared);
        let target = self.target.clone();

        let spawn_result = std::thread::Builder::new()
            .name("ble-serial-driver".into())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        error!("Failed to build driver runtime: {}", e);
                        shared.handle_link_event(LinkEvent::Failed(format!("runtime: {e}")));
                        return;
                    }
                };
                runtime.block_on(driver.run(target, command_rx));
            });

        let thread = match spawn_result {
            Ok(thread) => thread,
            Err(e) => {
                self.shared.set_idle_silent();
                return Err(BleSerialError::ConnectionFailed(e.to_string()));
            }
        };

        *link = Some(LinkHandle {
            commands: command_tx,
            thread,
        });
        Ok(())
    }

    /// `begin` with classic serial parameters, which BLE has no use for.
    /// The parameters are ignored; the handshake is identical.
    pub fn begin_with(&self, baud: u32, serial_config: SerialConfig) -> Result<()> {
        debug!(
            "begin({}, {:?}): serial parameters ignored for BLE",
            baud, serial_config
        );
        self.begin()
    }

    /// Tear the connection down from any state. Caller-initiated, so no
    /// `ConnectionLost`/`ConnectionFailed` event fires; an in-flight attempt
    /// is abandoned. Buffered inbound bytes are discarded.
    ///
    /// Must not be called from a connection-event handler (those run on the
    /// driver thread this joins).
    pub fn end(&self) {
        let handle = self
            .link
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.commands.send(Command::Shutdown);
            let _ = handle.thread.join();
        }
        self.shared.set_idle_silent();
        self.shared.inbound.clear();
    }

    /// True iff the connection is currently `Ready`. Never blocks.
    pub fn connection_ready(&self) -> bool {
        self.shared.state() == ConnectionState::Ready
    }

    // ------------------------------------------------------------------
    // Connection events
    // ------------------------------------------------------------------

    /// Observe successful transitions into `Ready`. Fires exactly once per
    /// transition. The handler runs on the driver thread and must not call
    /// `begin`/`end` or block.
    pub fn on_connection_established(
        &self,
        handler: impl Fn() + Send + Sync + 'static,
    ) -> HandlerId {
        self.shared.events.on_established(handler)
    }

    /// Observe post-`Ready` link drops; the handler receives a diagnostic
    /// message. Same handler-context rules as
    /// [`on_connection_established`](Self::on_connection_established).
    pub fn on_connection_lost(
        &self,
        handler: impl Fn(&str) + Send + Sync + 'static,
    ) -> HandlerId {
        self.shared.events.on_lost(handler)
    }

    /// Observe failed connection attempts; the handler receives a diagnostic
    /// message. Same handler-context rules as
    /// [`on_connection_established`](Self::on_connection_established).
    pub fn on_connection_failed(
        &self,
        handler: impl Fn(&str) + Send + Sync + 'static,
    ) -> HandlerId {
        self.shared.events.on_failed(handler)
    }

    /// Remove a previously registered connection-event observer.
    pub fn remove_handler(&self, id: HandlerId) -> bool {
        self.shared.events.remove(id)
    }

    // ------------------------------------------------------------------
    // Reading
    // ------------------------------------------------------------------

    /// Bytes currently buffered for `read`. Never blocks.
    pub fn available(&self) -> usize {
        self.shared.inbound.len()
    }

    /// Pop the oldest received byte.
    ///
    /// Non-blocking polling contract: returns `None` when no data is
    /// buffered. Poll [`available`](Self::available) first; there is no
    /// blocking variant.
    pub fn read(&self) -> Option<u8> {
        self.shared.inbound.pop()
    }

    // ------------------------------------------------------------------
    // Writing
    // ------------------------------------------------------------------

    /// Stage one byte for transmission. See
    /// [`write_bytes`](Self::write_bytes).
    pub fn write(&self, byte: u8) -> Result<usize> {
        self.write_bytes(&[byte])
    }

    /// Stage bytes for in-order chunked transmission and return the number
    /// accepted (the whole slice, or an error).
    ///
    /// Fails with [`BleSerialError::NotConnected`] unless the connection is
    /// `Ready`. Chunk boundaries follow the configured payload limit, not
    /// the caller's buffer boundaries.
    pub fn write_bytes(&self, data: &[u8]) -> Result<usize> {
        if self.shared.state() != ConnectionState::Ready {
            return Err(BleSerialError::NotConnected);
        }
        if data.is_empty() {
            return Ok(0);
        }

        let link = self.link.lock().unwrap_or_else(PoisonError::into_inner);
        let handle = link.as_ref().ok_or(BleSerialError::NotConnected)?;
        handle
            .commands
            .send(Command::Write(data.to_vec()))
            .map_err(|_| BleSerialError::NotConnected)?;
        Ok(data.len())
    }

    /// Block until every previously staged write has been acknowledged by
    /// the transport, or fail with [`BleSerialError::FlushTimeout`].
    ///
    /// Returns immediately when the connection is not `Ready` (nothing can
    /// be staged outside `Ready`). Do not hold the advisory lock across a
    /// flush from another thread's perspective longer than necessary; the
    /// notification producer is independent of it either way.
    pub fn flush(&self) -> Result<()> {
        if self.shared.state() != ConnectionState::Ready {
            return Ok(());
        }

        let (ack_tx, ack_rx) = std::sync::mpsc::sync_channel(1);
        {
            let link = self.link.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(handle) = link.as_ref() else {
                return Ok(());
            };
            if handle.commands.send(Command::Flush(ack_tx)).is_err() {
                // Driver already gone; loss was reported through the events
                return Ok(());
            }
        }

        match ack_rx.recv_timeout(self.config.flush_timeout) {
            Ok(()) => Ok(()),
            Err(RecvTimeoutError::Timeout) => Err(BleSerialError::FlushTimeout),
            Err(RecvTimeoutError::Disconnected) => Err(BleSerialError::NotConnected),
        }
    }

    // ------------------------------------------------------------------
    // Formatted printing
    // ------------------------------------------------------------------

    /// Print a byte's numeric value as decimal text.
    pub fn print_byte(&self, byte: u8) -> Result<usize> {
        self.write_bytes(&print::encode_u32(byte as u32, Radix::Decimal))
    }

    /// Print a signed integer in the given radix.
    pub fn print_i32(&self, value: i32, radix: Radix) -> Result<usize> {
        self.write_bytes(&print::encode_i32(value, radix))
    }

    /// Print an unsigned integer in the given radix.
    pub fn print_u32(&self, value: u32, radix: Radix) -> Result<usize> {
        self.write_bytes(&print::encode_u32(value, radix))
    }

    /// Print a float with the default two fractional digits.
    pub fn print_f64(&self, value: f64) -> Result<usize> {
        self.print_f64_with(value, DEFAULT_DECIMAL_PLACES)
    }

    /// Print a float with the requested number of fractional digits.
    pub fn print_f64_with(&self, value: f64, decimal_places: u16) -> Result<usize> {
        self.write_bytes(&print::encode_f64(value, decimal_places))
    }

    /// Forward a byte slice to the raw write path unencoded.
    pub fn print_bytes(&self, data: &[u8]) -> Result<usize> {
        self.write_bytes(data)
    }

    // ------------------------------------------------------------------
    // Advisory lock
    // ------------------------------------------------------------------

    /// Acquire the advisory stream lock, blocking until it is free.
    ///
    /// Cooperative: it sequences callers who opt in (for example a
    /// multi-byte exchange that must not interleave) and constrains nobody
    /// else; the notification producer never takes it. Released when the
    /// guard drops, so a panicking section cannot leak the lock. Not
    /// re-entrant: a second `lock` on the same thread deadlocks.
    pub fn lock(&self) -> StreamGuard<'_> {
        StreamGuard {
            _guard: self.advisory.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Acquire the advisory lock without blocking, or `None` if held.
    pub fn try_lock(&self) -> Option<StreamGuard<'_>> {
        match self.advisory.try_lock() {
            Ok(guard) => Some(StreamGuard { _guard: guard }),
            Err(std::sync::TryLockError::Poisoned(poisoned)) => Some(StreamGuard {
                _guard: poisoned.into_inner(),
            }),
            Err(std::sync::TryLockError::WouldBlock) => None,
        }
    }

    // ------------------------------------------------------------------
    // Device listing
    // ------------------------------------------------------------------

    /// Snapshot of currently visible devices, produced by one scan window.
    /// Finite and consumed per call, not a live subscription.
    pub fn list_available_devices(config: &BleSerialConfig) -> Result<Vec<DeviceInfo>> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| BleSerialError::ScanFailed(e.to_string()))?;
        runtime.block_on(discovery::list_available_devices(config.scan_timeout))
    }
}

impl Drop for BleSerial {
    fn drop(&mut self) {
        self.end();
    }
}

/// Scoped guard for the advisory stream lock; dropping it releases the lock.
#[must_use = "the advisory lock is held only while the guard lives"]
pub struct StreamGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

impl StreamGuard<'_> {
    /// Release explicitly, for call sites that want the release visible.
    pub fn unlock(self) {}
}

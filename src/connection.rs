//! Connection state machine and the BLE link driver.
//!
//! The state machine itself is synchronous and message-driven: the driver
//! task translates radio callbacks into [`LinkEvent`]s and feeds them to
//! [`StreamShared::handle_link_event`], which owns every state transition and
//! fires the connection events. Keeping the transitions out of the async code
//! means the whole lifecycle is exercisable without a radio.
//!
//! The driver runs on a dedicated thread with its own current-thread runtime
//! (spawned by the facade's `begin`), owns all btleplug objects, and serves
//! commands from the synchronous side over an unbounded channel.

use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};

use btleplug::api::{Central, CentralEvent, Characteristic, Peripheral as _, WriteType};
use btleplug::platform::Peripheral;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::buffer::InboundBuffer;
use crate::config::BleSerialConfig;
use crate::discovery::{self, DeviceTarget};
use crate::endpoint::EndpointIdentity;
use crate::error::{BleSerialError, Result};
use crate::events::EventRegistry;

// ----------------------------------------------------------------------------
// Connection State
// ----------------------------------------------------------------------------

/// Lifecycle state of the stream's single connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and no attempt in flight
    Idle,
    /// Asynchronous discovery/handshake in progress
    Connecting,
    /// Subscribed and usable for read/write
    Ready,
}

/// Completion and data signals from the link driver.
#[derive(Debug)]
pub(crate) enum LinkEvent {
    /// Discovery succeeded and notifications are wired up
    Ready,
    /// The in-flight attempt failed before reaching `Ready`
    Failed(String),
    /// An established link dropped
    Lost(String),
    /// A notification payload arrived
    Data(Vec<u8>),
}

/// Commands from the synchronous facade to the driver task.
pub(crate) enum Command {
    /// Stage bytes for chunked transmission
    Write(Vec<u8>),
    /// Acknowledge once every previously staged write has completed
    Flush(std::sync::mpsc::SyncSender<()>),
    /// Caller-initiated teardown; no events fire
    Shutdown,
}

// ----------------------------------------------------------------------------
// Shared Core
// ----------------------------------------------------------------------------

/// State shared between the facade, the driver task, and the tests.
pub(crate) struct StreamShared {
    state: Mutex<ConnectionState>,
    pub(crate) inbound: InboundBuffer,
    pub(crate) events: EventRegistry,
}

impl StreamShared {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ConnectionState::Idle),
            inbound: InboundBuffer::new(),
            events: EventRegistry::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// `Idle -> Connecting`. Returns false when an attempt is already in
    /// flight or the link is up, so `begin` joins instead of restarting.
    pub fn set_connecting(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == ConnectionState::Idle {
            *state = ConnectionState::Connecting;
            true
        } else {
            false
        }
    }

    /// Caller-initiated move to `Idle`; fires nothing.
    pub fn set_idle_silent(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        *state = ConnectionState::Idle;
    }

    /// Drive the state machine from a link completion or data signal.
    pub fn handle_link_event(&self, event: LinkEvent) {
        match event {
            LinkEvent::Ready => {
                let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
                if *state == ConnectionState::Connecting {
                    *state = ConnectionState::Ready;
                    drop(state);
                    info!("BLE serial link ready");
                    self.events.fire_established();
                }
            }
            LinkEvent::Failed(message) => {
                let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
                if *state == ConnectionState::Connecting {
                    *state = ConnectionState::Idle;
                    drop(state);
                    warn!("BLE serial connection failed: {}", message);
                    self.events.fire_failed(&message);
                }
            }
            LinkEvent::Lost(message) => {
                let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
                if *state == ConnectionState::Ready {
                    *state = ConnectionState::Idle;
                    drop(state);
                    warn!("BLE serial link lost: {}", message);
                    self.events.fire_lost(&message);
                }
            }
            LinkEvent::Data(payload) => {
                self.inbound.push(&payload);
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Driver Task
// ----------------------------------------------------------------------------

type NotificationStream =
    Pin<Box<dyn Stream<Item = btleplug::api::ValueNotification> + Send>>;
type CentralEventStream = Pin<Box<dyn Stream<Item = CentralEvent> + Send>>;

/// Everything the driver needs once the link is up.
struct LinkSession {
    peripheral: Peripheral,
    write_char: Characteristic,
    notify_char: Characteristic,
    notifications: NotificationStream,
    central_events: CentralEventStream,
}

/// GATT progress made by an attempt that has not reached `Ready` yet.
/// Recorded as `establish` advances so an abandoned attempt can be unwound.
#[derive(Default)]
struct ConnectProgress {
    peripheral: Option<Peripheral>,
    notify_char: Option<Characteristic>,
}

/// Owns the btleplug side of one connection attempt and, on success, the
/// established link until shutdown or loss.
pub(crate) struct Driver {
    shared: Arc<StreamShared>,
    identity: EndpointIdentity,
    config: BleSerialConfig,
    progress: Mutex<ConnectProgress>,
}

impl Driver {
    pub fn new(shared: Arc<StreamShared>, identity: EndpointIdentity, config: BleSerialConfig) -> Self {
        Self {
            shared,
            identity,
            config,
            progress: Mutex::new(ConnectProgress::default()),
        }
    }

    /// Entry point for the driver thread's runtime.
    pub async fn run(self, target: DeviceTarget, mut commands: mpsc::UnboundedReceiver<Command>) {
        let session = tokio::select! {
            biased;
            _ = wait_for_shutdown(&mut commands) => {
                self.shared.set_idle_silent();
                self.abandon().await;
                return;
            }
            result = self.establish(target) => match result {
                Ok(session) => session,
                Err(err) => {
                    self.abandon().await;
                    self.shared.handle_link_event(LinkEvent::Failed(err.to_string()));
                    return;
                }
            },
        };

        self.clear_progress();
        self.shared.handle_link_event(LinkEvent::Ready);
        self.pump(session, commands).await;
    }

    /// Resolve, connect, discover the GATT layout, and subscribe.
    async fn establish(&self, target: DeviceTarget) -> Result<LinkSession> {
        let adapter = discovery::default_adapter().await?;
        let peripheral = discovery::resolve(&adapter, target, &self.identity, &self.config).await?;

        let already_connected = peripheral.is_connected().await.unwrap_or(false);
        if !already_connected {
            tokio::time::timeout(self.config.connection_timeout, peripheral.connect())
                .await
                .map_err(|_| BleSerialError::ConnectionTimeout)?
                .map_err(|e| BleSerialError::ConnectionFailed(e.to_string()))?;
        }
        self.record_connected(&peripheral);
        info!("Connected to device {}", peripheral.id());

        peripheral
            .discover_services()
            .await
            .map_err(|e| BleSerialError::ServiceDiscoveryFailed(e.to_string()))?;

        let characteristics = peripheral.characteristics();
        let write_char = characteristics
            .iter()
            .find(|c| c.uuid == self.identity.write_char)
            .cloned()
            .ok_or(BleSerialError::CharacteristicNotFound {
                uuid: self.identity.write_char,
            })?;
        let notify_char = characteristics
            .iter()
            .find(|c| c.uuid == self.identity.notify_char)
            .cloned()
            .ok_or(BleSerialError::CharacteristicNotFound {
                uuid: self.identity.notify_char,
            })?;

        peripheral
            .subscribe(&notify_char)
            .await
            .map_err(|e| BleSerialError::SubscriptionFailed(e.to_string()))?;
        self.record_subscribed(&notify_char);
        debug!("Subscribed to notify characteristic {}", notify_char.uuid);

        let notifications = peripheral
            .notifications()
            .await
            .map_err(|e| BleSerialError::SubscriptionFailed(e.to_string()))?;
        let central_events = adapter
            .events()
            .await
            .map_err(|e| BleSerialError::SubscriptionFailed(e.to_string()))?;

        Ok(LinkSession {
            peripheral,
            write_char,
            notify_char,
            notifications,
            central_events,
        })
    }

    /// Serve commands and pump notifications until shutdown or link loss.
    async fn pump(&self, mut session: LinkSession, mut commands: mpsc::UnboundedReceiver<Command>) {
        let device_id = session.peripheral.id();

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Write(payload)) => {
                        if let Err(err) = self.transmit(&session, &payload).await {
                            self.teardown(&session).await;
                            self.shared.handle_link_event(LinkEvent::Lost(err.to_string()));
                            return;
                        }
                    }
                    Some(Command::Flush(ack)) => {
                        // Commands are FIFO; every write staged before this
                        // flush has already been awaited.
                        let _ = ack.send(());
                    }
                    Some(Command::Shutdown) | None => {
                        self.shared.set_idle_silent();
                        self.teardown(&session).await;
                        return;
                    }
                },
                notification = session.notifications.next() => match notification {
                    Some(update) => {
                        if update.uuid == self.identity.notify_char {
                            self.shared.handle_link_event(LinkEvent::Data(update.value));
                        }
                    }
                    None => {
                        self.teardown(&session).await;
                        self.shared
                            .handle_link_event(LinkEvent::Lost("notification stream ended".into()));
                        return;
                    }
                },
                event = session.central_events.next() => match event {
                    Some(CentralEvent::DeviceDisconnected(id)) if id == device_id => {
                        self.shared
                            .handle_link_event(LinkEvent::Lost("device disconnected".into()));
                        return;
                    }
                    Some(_) => {}
                    None => {
                        self.teardown(&session).await;
                        self.shared
                            .handle_link_event(LinkEvent::Lost("adapter event stream ended".into()));
                        return;
                    }
                }
            }
        }
    }

    /// Chunked characteristic writes, in order, sized to the payload limit.
    async fn transmit(&self, session: &LinkSession, payload: &[u8]) -> Result<()> {
        let mut chunks = 0;
        for chunk in split_chunks(payload, self.config.write_chunk_size) {
            session
                .peripheral
                .write(&session.write_char, chunk, WriteType::WithResponse)
                .await
                .map_err(|e| BleSerialError::WriteFailed(e.to_string()))?;
            chunks += 1;
        }
        debug!("Sent {} bytes in {} chunks", payload.len(), chunks);
        Ok(())
    }

    fn record_connected(&self, peripheral: &Peripheral) {
        self.progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .peripheral = Some(peripheral.clone());
    }

    fn record_subscribed(&self, notify_char: &Characteristic) {
        self.progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .notify_char = Some(notify_char.clone());
    }

    fn clear_progress(&self) {
        *self.progress.lock().unwrap_or_else(PoisonError::into_inner) =
            ConnectProgress::default();
    }

    /// Unwind whatever GATT progress an unfinished attempt made. Without this,
    /// a shutdown or failure after `connect` would leave the device attached.
    async fn abandon(&self) {
        let progress = std::mem::take(
            &mut *self.progress.lock().unwrap_or_else(PoisonError::into_inner),
        );
        let Some(peripheral) = progress.peripheral else {
            return;
        };
        if let Some(notify_char) = progress.notify_char {
            if let Err(e) = peripheral.unsubscribe(&notify_char).await {
                debug!("Unsubscribe while abandoning attempt failed: {}", e);
            }
        }
        if let Err(e) = peripheral.disconnect().await {
            debug!("Disconnect while abandoning attempt failed: {}", e);
        }
        info!("Abandoned partial connection to {}", peripheral.id());
    }

    async fn teardown(&self, session: &LinkSession) {
        if let Err(e) = session.peripheral.unsubscribe(&session.notify_char).await {
            debug!("Unsubscribe during teardown failed: {}", e);
        }
        if let Err(e) = session.peripheral.disconnect().await {
            debug!("Disconnect during teardown failed: {}", e);
        }
        info!("Disconnected from device");
    }
}

/// Wait for a shutdown while an attempt is in flight. Writes cannot be
/// staged outside `Ready`; a flush that races teardown acknowledges
/// immediately since nothing is staged.
async fn wait_for_shutdown(commands: &mut mpsc::UnboundedReceiver<Command>) {
    loop {
        match commands.recv().await {
            Some(Command::Shutdown) | None => return,
            Some(Command::Flush(ack)) => {
                let _ = ack.send(());
            }
            Some(Command::Write(_)) => {}
        }
    }
}

/// Split a payload into characteristic-write-sized chunks, preserving order.
/// Chunk boundaries carry no framing; the peer sees one byte stream.
pub(crate) fn split_chunks(payload: &[u8], max: usize) -> impl Iterator<Item = &[u8]> {
    payload.chunks(max.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn connecting_shared() -> StreamShared {
        let shared = StreamShared::new();
        assert!(shared.set_connecting());
        shared
    }

    #[test]
    fn begin_joins_an_attempt_already_in_flight() {
        let shared = StreamShared::new();
        assert!(shared.set_connecting());
        assert!(!shared.set_connecting());
        assert_eq!(shared.state(), ConnectionState::Connecting);
    }

    #[test]
    fn ready_fires_established_exactly_once() {
        let shared = connecting_shared();
        let established = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&established);
        shared.events.on_established(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        shared.handle_link_event(LinkEvent::Ready);
        assert_eq!(shared.state(), ConnectionState::Ready);

        // A duplicate completion signal must not re-fire
        shared.handle_link_event(LinkEvent::Ready);
        assert_eq!(established.load(Ordering::SeqCst), 1);

        // Nor does a second begin while already Ready
        assert!(!shared.set_connecting());
        assert_eq!(established.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failure_returns_to_idle_with_a_message() {
        let shared = connecting_shared();
        let message = Arc::new(Mutex::new(String::new()));
        let sink = Arc::clone(&message);
        shared.events.on_failed(move |m| {
            *sink.lock().unwrap() = m.to_string();
        });

        shared.handle_link_event(LinkEvent::Failed("no device named Arduino101".into()));
        assert_eq!(shared.state(), ConnectionState::Idle);
        assert!(!message.lock().unwrap().is_empty());
    }

    #[test]
    fn loss_only_fires_from_ready() {
        let shared = connecting_shared();
        let lost = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&lost);
        shared.events.on_lost(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        // Not yet Ready: a loss signal is meaningless and must not fire
        shared.handle_link_event(LinkEvent::Lost("early".into()));
        assert_eq!(lost.load(Ordering::SeqCst), 0);

        shared.handle_link_event(LinkEvent::Ready);
        shared.handle_link_event(LinkEvent::Lost("device disconnected".into()));
        assert_eq!(shared.state(), ConnectionState::Idle);
        assert_eq!(lost.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn caller_teardown_is_silent_from_every_state() {
        for reach_ready in [false, true] {
            let shared = connecting_shared();
            let fired = Arc::new(AtomicUsize::new(0));
            let a = Arc::clone(&fired);
            shared.events.on_lost(move |_| {
                a.fetch_add(1, Ordering::SeqCst);
            });
            let b = Arc::clone(&fired);
            shared.events.on_failed(move |_| {
                b.fetch_add(1, Ordering::SeqCst);
            });

            if reach_ready {
                shared.handle_link_event(LinkEvent::Ready);
            }
            shared.set_idle_silent();
            assert_eq!(shared.state(), ConnectionState::Idle);
            assert_eq!(fired.load(Ordering::SeqCst), 0);
        }
    }

    #[test]
    fn notification_payloads_land_in_the_buffer_in_order() {
        let shared = connecting_shared();
        shared.handle_link_event(LinkEvent::Ready);

        shared.handle_link_event(LinkEvent::Data(vec![0x41, 0x42]));
        shared.handle_link_event(LinkEvent::Data(vec![0x43]));

        assert_eq!(shared.inbound.len(), 3);
        assert_eq!(shared.inbound.pop(), Some(0x41));
        assert_eq!(shared.inbound.pop(), Some(0x42));
        assert_eq!(shared.inbound.pop(), Some(0x43));
        assert_eq!(shared.inbound.pop(), None);
    }

    #[test]
    fn shutdown_while_connecting_abandons_silently() {
        let shared = Arc::new(StreamShared::new());
        assert!(shared.set_connecting());

        let fired = Arc::new(AtomicUsize::new(0));
        let a = Arc::clone(&fired);
        shared.events.on_failed(move |_| {
            a.fetch_add(1, Ordering::SeqCst);
        });
        let b = Arc::clone(&fired);
        shared.events.on_lost(move |_| {
            b.fetch_add(1, Ordering::SeqCst);
        });

        // Shutdown is already queued when the driver starts, so the attempt
        // is abandoned before it ever touches an adapter.
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        commands_tx.send(Command::Shutdown).unwrap();

        let driver = Driver::new(
            Arc::clone(&shared),
            EndpointIdentity::NORDIC_UART,
            BleSerialConfig::default(),
        );
        tokio_test::block_on(driver.run(
            DeviceTarget::ByNameOrId("NoSuchDevice".into()),
            commands_rx,
        ));

        assert_eq!(shared.state(), ConnectionState::Idle);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn chunks_preserve_order_and_respect_the_limit() {
        let payload: Vec<u8> = (0..45).collect();
        let chunks: Vec<&[u8]> = split_chunks(&payload, 20).collect();

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 20);
        assert_eq!(chunks[1].len(), 20);
        assert_eq!(chunks[2].len(), 5);

        let rejoined: Vec<u8> = chunks.concat();
        assert_eq!(rejoined, payload);
    }

    #[test]
    fn zero_chunk_size_is_clamped() {
        let payload = [1u8, 2, 3];
        assert_eq!(split_chunks(&payload, 0).count(), 3);
    }
}

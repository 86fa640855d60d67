//! Stream lifecycle against the public API, no radio required.
//!
//! A connection attempt against a device that cannot be found (or a host
//! without a usable adapter) must resolve to a `ConnectionFailed` event with
//! a diagnostic message, never to an error from a later call's stack frame.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use ble_serial::{BleSerial, BleSerialConfig, BleSerialError};

#[test]
fn unresolvable_device_fires_connection_failed() {
    let config = BleSerialConfig::new()
        .with_scan_timeout(Duration::from_secs(2))
        .with_connection_timeout(Duration::from_secs(2));
    let stream = BleSerial::with_config("Arduino101", config);

    let (failed_tx, failed_rx) = mpsc::channel();
    stream.on_connection_failed(move |message| {
        let _ = failed_tx.send(message.to_string());
    });

    let lost_count = Arc::new(AtomicUsize::new(0));
    let lost = Arc::clone(&lost_count);
    stream.on_connection_lost(move |_| {
        lost.fetch_add(1, Ordering::SeqCst);
    });

    stream.begin().expect("begin should start the attempt");

    let message = failed_rx
        .recv_timeout(Duration::from_secs(30))
        .expect("connection attempt should fail without a matching device");
    assert!(!message.is_empty());
    assert!(!stream.connection_ready());

    // Synchronous misuse after the failure is an explicit error
    assert!(matches!(
        stream.write_bytes(&[0x41, 0x42, 0x43]),
        Err(BleSerialError::NotConnected)
    ));

    // The drop never happened, so ConnectionLost never fired
    stream.end();
    assert_eq!(lost_count.load(Ordering::SeqCst), 0);
}

#[test]
fn end_without_begin_is_silent_and_repeatable() {
    let stream = BleSerial::new("NoSuchDevice");

    let fired = Arc::new(AtomicUsize::new(0));
    let on_lost = Arc::clone(&fired);
    stream.on_connection_lost(move |_| {
        on_lost.fetch_add(1, Ordering::SeqCst);
    });
    let on_failed = Arc::clone(&fired);
    stream.on_connection_failed(move |_| {
        on_failed.fetch_add(1, Ordering::SeqCst);
    });

    stream.end();
    stream.end();
    assert!(!stream.connection_ready());
    assert_eq!(fired.load(Ordering::SeqCst), 0);
}

#[test]
fn dropping_the_stream_tears_down_synchronously() {
    let stream = BleSerial::new("NoSuchDevice");
    assert_eq!(stream.available(), 0);
    drop(stream);
}

#[test]
fn removed_failure_observer_stays_quiet() {
    let stream = BleSerial::new("NoSuchDevice");

    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);
    let id = stream.on_connection_failed(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    assert!(stream.remove_handler(id));
    assert!(!stream.remove_handler(id));
    assert_eq!(fired.load(Ordering::SeqCst), 0);
}

//! Inbound byte buffer shared by the notification producer and the
//! synchronous consumer.
//!
//! The notification task is the only writer; `read`/`available` on the
//! facade are the consumers. The internal lock is held only for the
//! push/pop/len itself, so the producer callback is never blocked for long
//! by a reader (and never by the advisory stream lock, which is a separate
//! mechanism entirely).

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

// ----------------------------------------------------------------------------
// Inbound Buffer
// ----------------------------------------------------------------------------

/// Growable FIFO of received bytes.
#[derive(Debug, Default)]
pub(crate) struct InboundBuffer {
    bytes: Mutex<VecDeque<u8>>,
}

impl InboundBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a notification payload in arrival order.
    pub fn push(&self, payload: &[u8]) {
        let mut bytes = self.bytes.lock().unwrap_or_else(PoisonError::into_inner);
        bytes.extend(payload.iter().copied());
    }

    /// Pop the oldest byte, or `None` when the buffer is empty.
    pub fn pop(&self) -> Option<u8> {
        let mut bytes = self.bytes.lock().unwrap_or_else(PoisonError::into_inner);
        bytes.pop_front()
    }

    /// Number of buffered bytes.
    pub fn len(&self) -> usize {
        let bytes = self.bytes.lock().unwrap_or_else(PoisonError::into_inner);
        bytes.len()
    }

    /// Discard everything, used on stream teardown.
    pub fn clear(&self) {
        let mut bytes = self.bytes.lock().unwrap_or_else(PoisonError::into_inner);
        bytes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_come_out_in_arrival_order() {
        let buffer = InboundBuffer::new();
        buffer.push(&[0x41, 0x42]);
        buffer.push(&[0x43]);

        assert_eq!(buffer.pop(), Some(0x41));
        assert_eq!(buffer.pop(), Some(0x42));
        assert_eq!(buffer.pop(), Some(0x43));
        assert_eq!(buffer.pop(), None);
    }

    #[test]
    fn len_tracks_pushes_and_pops() {
        let buffer = InboundBuffer::new();
        assert_eq!(buffer.len(), 0);

        buffer.push(&[1, 2, 3, 4, 5]);
        assert_eq!(buffer.len(), 5);

        for expected in (0..5).rev() {
            buffer.pop();
            assert_eq!(buffer.len(), expected);
        }
        assert_eq!(buffer.pop(), None);
        assert_eq!(buffer.len(), 0);
    }

    #[test]
    fn notification_payloads_concatenate() {
        let buffer = InboundBuffer::new();
        let deliveries: [&[u8]; 3] = [b"he", b"ll", b"o!"];
        for payload in deliveries {
            buffer.push(payload);
        }

        let mut drained = Vec::new();
        while let Some(byte) = buffer.pop() {
            drained.push(byte);
        }
        assert_eq!(drained, b"hello!");
    }

    #[test]
    fn clear_discards_pending_bytes() {
        let buffer = InboundBuffer::new();
        buffer.push(b"stale");
        buffer.clear();
        assert_eq!(buffer.len(), 0);
        assert_eq!(buffer.pop(), None);
    }
}

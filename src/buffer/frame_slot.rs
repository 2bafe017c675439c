use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::watch;

/// One encoded frame with its publication sequence number.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub seq: u64,
    pub data: Bytes,
}

/// Single-slot holder for the latest encoded frame.
///
/// The producer overwrites the slot and never waits on readers. Each reader
/// sees a strictly increasing subset of sequence numbers.
#[derive(Clone)]
pub struct FrameSlot {
    tx: Arc<watch::Sender<Option<EncodedFrame>>>,
    next_seq: Arc<AtomicU64>,
    clients: Arc<AtomicUsize>,
}

impl FrameSlot {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            tx: Arc::new(tx),
            next_seq: Arc::new(AtomicU64::new(1)),
            clients: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn publish(&self, data: Vec<u8>) -> u64 {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.tx.send_replace(Some(EncodedFrame {
            seq,
            data: Bytes::from(data),
        }));
        seq
    }

    pub fn latest(&self) -> Option<EncodedFrame> {
        self.tx.borrow().clone()
    }

    pub fn published(&self) -> u64 {
        self.next_seq.load(Ordering::Relaxed) - 1
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<EncodedFrame>> {
        self.tx.subscribe()
    }

    pub fn client_count(&self) -> usize {
        self.clients.load(Ordering::Relaxed)
    }

    pub(crate) fn client_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.clients)
    }
}

impl Default for FrameSlot {
    fn default() -> Self {
        Self::new()
    }
}

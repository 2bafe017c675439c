//! `multipart/x-mixed-replace` frame stream.
//!
//! Each part on the wire is exactly:
//!
//! ```text
//! --frame\r\nContent-Type: image/jpeg\r\n\r\n<jpeg bytes>\r\n
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use futures_util::Stream;
use tokio::sync::watch;

use crate::analytics::PipelineControl;
use crate::buffer::{EncodedFrame, FrameSlot};

pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

const PART_HEADER: &[u8] = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
const PART_TRAILER: &[u8] = b"\r\n";

pub fn multipart_part(jpeg: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(PART_HEADER.len() + jpeg.len() + PART_TRAILER.len());
    buf.put_slice(PART_HEADER);
    buf.put_slice(jpeg);
    buf.put_slice(PART_TRAILER);
    buf.freeze()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    Streaming,
    Closed,
}

/// One connected viewer.
///
/// Holds at most a reference to the latest frame; a client that falls behind
/// skips straight to the newest frame instead of queueing.
pub struct ClientStream {
    id: usize,
    rx: watch::Receiver<Option<EncodedFrame>>,
    state: ClientState,
    last_seq: u64,
    clients: Arc<AtomicUsize>,
    control: PipelineControl,
}

impl ClientStream {
    pub fn connect(slot: &FrameSlot, control: &PipelineControl, id: usize) -> Self {
        let mut rx = slot.subscribe();
        // Deliver the current frame immediately instead of waiting for the next.
        rx.mark_changed();
        let clients = slot.client_counter();
        let connected = clients.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(client = id, connected, "stream client connected");
        Self {
            id,
            rx,
            state: ClientState::Idle,
            last_seq: 0,
            clients,
            control: control.clone(),
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Wait for the next frame newer than the last one sent, already framed
    /// as a multipart part. `None` once the producer side is gone or the
    /// pipeline is shutting down.
    pub async fn next_part(&mut self) -> Option<Bytes> {
        if self.state == ClientState::Closed {
            return None;
        }
        self.state = ClientState::Streaming;

        loop {
            tokio::select! {
                biased;
                _ = self.control.wait_for_shutdown() => {
                    self.close();
                    return None;
                }
                changed = self.rx.changed() => {
                    if changed.is_err() {
                        self.close();
                        return None;
                    }
                }
            }
            let frame = self.rx.borrow_and_update().clone();
            if let Some(frame) = frame {
                if frame.seq > self.last_seq {
                    self.last_seq = frame.seq;
                    return Some(multipart_part(&frame.data));
                }
            }
        }
    }

    pub fn close(&mut self) {
        if self.state == ClientState::Closed {
            return;
        }
        self.state = ClientState::Closed;
        let remaining = self.clients.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
        tracing::debug!(client = self.id, remaining, "stream client closed");
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send {
        futures_util::stream::unfold(self, |mut client| async move {
            client.next_part().await.map(|part| (Ok(part), client))
        })
    }
}

impl Drop for ClientStream {
    // The HTTP layer drops the body stream when a write to the socket fails.
    fn drop(&mut self) {
        self.close();
    }
}

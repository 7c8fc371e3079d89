//! In-memory connection for driving sessions without a socket.
//!
//! [`in_memory_pair`] returns the session's reader and writer halves plus a
//! [`InMemoryPeer`] that plays the client: it sends frames to the session and
//! receives whatever the session writes.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::domain::foundation::Envelope;
use crate::ports::{Frame, FrameReader, FrameWriter, TransportError};

/// Session-side reading half.
pub struct InMemoryReader {
    rx: mpsc::Receiver<Frame>,
}

/// Session-side writing half.
pub struct InMemoryWriter {
    tx: mpsc::Sender<Frame>,
    closed: bool,
    close_count: Arc<AtomicUsize>,
    fail_writes: Arc<AtomicBool>,
}

/// Client side of an in-memory connection.
pub struct InMemoryPeer {
    to_session: Option<mpsc::Sender<Frame>>,
    from_session: mpsc::Receiver<Frame>,
    close_count: Arc<AtomicUsize>,
    fail_writes: Arc<AtomicBool>,
}

/// Creates a connected reader/writer/peer triple buffering `capacity` frames
/// in each direction.
pub fn in_memory_pair(capacity: usize) -> (InMemoryReader, InMemoryWriter, InMemoryPeer) {
    let (to_session, session_rx) = mpsc::channel(capacity.max(1));
    let (session_tx, from_session) = mpsc::channel(capacity.max(1));
    let close_count = Arc::new(AtomicUsize::new(0));
    let fail_writes = Arc::new(AtomicBool::new(false));

    (
        InMemoryReader { rx: session_rx },
        InMemoryWriter {
            tx: session_tx,
            closed: false,
            close_count: close_count.clone(),
            fail_writes: fail_writes.clone(),
        },
        InMemoryPeer {
            to_session: Some(to_session),
            from_session,
            close_count,
            fail_writes,
        },
    )
}

#[async_trait]
impl FrameReader for InMemoryReader {
    async fn read_frame(&mut self) -> Result<Option<Frame>, TransportError> {
        Ok(self.rx.recv().await)
    }
}

#[async_trait]
impl FrameWriter for InMemoryWriter {
    async fn write_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
        if self.closed || self.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.tx.send(frame).await.map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.closed = true;
        self.close_count.fetch_add(1, Ordering::SeqCst);
        let _ = self.tx.try_send(Frame::Close);
        Ok(())
    }
}

impl InMemoryPeer {
    /// Sends a frame to the session.
    pub async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        match &self.to_session {
            Some(tx) => tx.send(frame).await.map_err(|_| TransportError::Closed),
            None => Err(TransportError::Closed),
        }
    }

    /// Sends an envelope as a text frame.
    pub async fn send_envelope(&self, envelope: &Envelope) -> Result<(), TransportError> {
        let text = serde_json::to_string(envelope).map_err(|e| TransportError::Io(e.to_string()))?;
        self.send(Frame::Text(text)).await
    }

    /// Receives the next frame written by the session.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.from_session.recv().await
    }

    /// Receives the next envelope written by the session, skipping pings.
    pub async fn recv_envelope(&mut self) -> Option<Envelope> {
        loop {
            match self.from_session.recv().await? {
                Frame::Text(text) => return serde_json::from_str(&text).ok(),
                Frame::Ping(_) | Frame::Pong(_) => continue,
                Frame::Binary(_) | Frame::Close => return None,
            }
        }
    }

    /// Hangs up: the session's next read returns end-of-stream.
    pub fn disconnect(&mut self) {
        self.to_session = None;
    }

    /// Makes every later session write fail.
    pub fn break_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    /// How many times the session closed its writer.
    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }
}

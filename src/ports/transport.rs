//! Transport port - frame-level access to a client connection.
//!
//! A connection is split into a reader half, owned by the session's inbound
//! loop, and a writer half, shared by the write loop and `close()`.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::foundation::{DomainError, ErrorCode};

/// One unit read from or written to a client connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

impl Frame {
    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Binary(data) | Frame::Ping(data) | Frame::Pong(data) => data.len(),
            Frame::Close => 0,
        }
    }

    /// True when the frame carries no payload.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True for text and binary frames.
    pub fn is_data(&self) -> bool {
        matches!(self, Frame::Text(_) | Frame::Binary(_))
    }
}

/// Errors raised by transport implementations.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection closed")]
    Closed,

    #[error("Frame of {size} bytes exceeds limit of {limit}")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("Transport I/O error: {0}")]
    Io(String),
}

impl From<TransportError> for DomainError {
    fn from(err: TransportError) -> Self {
        let code = match err {
            TransportError::Closed => ErrorCode::SessionClosed,
            TransportError::FrameTooLarge { .. } => ErrorCode::InvalidEnvelope,
            TransportError::Io(_) => ErrorCode::InternalError,
        };
        DomainError::new(code, err.to_string())
    }
}

/// Reading half of a connection.
#[async_trait]
pub trait FrameReader: Send {
    /// Reads the next frame. `Ok(None)` means the peer went away cleanly.
    async fn read_frame(&mut self) -> Result<Option<Frame>, TransportError>;
}

/// Writing half of a connection.
#[async_trait]
pub trait FrameWriter: Send {
    /// Writes one frame.
    async fn write_frame(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Sends a close frame and releases the connection.
    async fn close(&mut self) -> Result<(), TransportError>;
}

//! Axum websocket halves as transport ports.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};

use crate::ports::{Frame, FrameReader, FrameWriter, TransportError};

/// Reading half of an upgraded websocket.
pub struct WsFrameReader {
    inner: SplitStream<WebSocket>,
}

/// Writing half of an upgraded websocket.
pub struct WsFrameWriter {
    inner: SplitSink<WebSocket, Message>,
}

/// Splits a websocket into transport halves.
pub fn split_socket(socket: WebSocket) -> (WsFrameReader, WsFrameWriter) {
    let (sink, stream) = socket.split();
    (
        WsFrameReader { inner: stream },
        WsFrameWriter { inner: sink },
    )
}

fn from_message(message: Message) -> Frame {
    match message {
        Message::Text(text) => Frame::Text(text),
        Message::Binary(data) => Frame::Binary(data),
        Message::Ping(data) => Frame::Ping(data),
        Message::Pong(data) => Frame::Pong(data),
        Message::Close(_) => Frame::Close,
    }
}

fn into_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text),
        Frame::Binary(data) => Message::Binary(data),
        Frame::Ping(data) => Message::Ping(data),
        Frame::Pong(data) => Message::Pong(data),
        Frame::Close => Message::Close(None),
    }
}

#[async_trait]
impl FrameReader for WsFrameReader {
    async fn read_frame(&mut self) -> Result<Option<Frame>, TransportError> {
        match self.inner.next().await {
            Some(Ok(message)) => Ok(Some(from_message(message))),
            Some(Err(e)) => Err(TransportError::Io(e.to_string())),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl FrameWriter for WsFrameWriter {
    async fn write_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
        self.inner
            .send(into_message(frame))
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        // Peer may already be gone; the close frame is best effort.
        let _ = self.inner.send(Message::Close(None)).await;
        self.inner
            .close()
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_map_to_frames_and_back() {
        let frames = vec![
            Frame::Text("hi".into()),
            Frame::Binary(vec![1, 2]),
            Frame::Ping(vec![9]),
            Frame::Pong(vec![]),
        ];

        for frame in frames {
            assert_eq!(from_message(into_message(frame.clone())), frame);
        }
        assert_eq!(from_message(Message::Close(None)), Frame::Close);
    }
}

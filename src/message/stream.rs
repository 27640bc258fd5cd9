use std::task::Poll;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use snafu::prelude::*;
use tokio_tungstenite::tungstenite as websocket;

use super::{DecodeMessageError, Message};

pub(crate) type WebsocketTransport = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Error when read/write message stream/sink
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), module(error), context(suffix(false)))]
pub enum MessageStreamSinkError {
    /// underlying websocket stream broken
    #[snafu(display("underlying websocket stream broken: {source}"))]
    Websocket {
        /// source error
        source: websocket::Error,
    },

    /// received a non-text frame
    #[snafu(display("received a non-text type frame"))]
    NotTextFrame,

    /// decode text frame data failed
    #[snafu(display("decode frame to message failed: {source}"))]
    DecodeMessageFailed {
        /// source error
        source: DecodeMessageError,
    },
}

impl MessageStreamSinkError {
    /// Check if this error will make the stream/sink stop
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Websocket { .. } => true,
            Self::NotTextFrame | Self::DecodeMessageFailed { .. } => false,
        }
    }
}

/// Message framing layered over a raw websocket connection.
///
/// Reading yields decoded [`Message`]s from text frames, writing encodes
/// messages back to text frames. Close frames end the stream.
#[derive(Debug)]
pub(crate) struct MessageStreamSink {
    ws: WebsocketTransport,
}

impl MessageStreamSink {
    pub fn new(ws: WebsocketTransport) -> Self {
        Self { ws }
    }
}

impl Stream for MessageStreamSink {
    type Item = Result<Message, MessageStreamSinkError>;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        match self.ws.poll_next_unpin(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Ready(Some(frame)) => {
                let frame = frame.context(error::Websocket)?;
                let result = match frame {
                    websocket::Message::Text(text) => match Message::decode(&text) {
                        Ok(message) => Ok(message),
                        Err(e) => {
                            log::trace!("Decode failed frame text: {text}");
                            Err(MessageStreamSinkError::DecodeMessageFailed { source: e })
                        }
                    },
                    websocket::Message::Close(_) => return Poll::Ready(None),
                    _ => Err(MessageStreamSinkError::NotTextFrame),
                };
                Poll::Ready(Some(result))
            }
        }
    }
}

impl Sink<Message> for MessageStreamSink {
    type Error = MessageStreamSinkError;

    fn poll_ready(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Result<(), Self::Error>> {
        self.ws
            .poll_ready_unpin(cx)
            .map_err(|e| Self::Error::Websocket { source: e })
    }

    fn start_send(mut self: std::pin::Pin<&mut Self>, item: Message) -> Result<(), Self::Error> {
        self.ws
            .start_send_unpin(websocket::Message::Text(item.encode()))
            .map_err(|e| Self::Error::Websocket { source: e })
    }

    fn poll_flush(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Result<(), Self::Error>> {
        self.ws
            .poll_flush_unpin(cx)
            .map_err(|e| Self::Error::Websocket { source: e })
    }

    fn poll_close(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Result<(), Self::Error>> {
        self.ws
            .poll_close_unpin(cx)
            .map_err(|e| Self::Error::Websocket { source: e })
    }
}

//! Duplex connection primitive.
//!
//! [`Connection`] is what the transport needs from the socket: its state,
//! the close status it reported, a per-message output stream, a graceful close
//! and an abrupt abort. [`ChannelConnection`] implements it over an mpsc
//! channel of [`Frame`]s that the hosting websocket loop forwards.

use crate::error::DeliveryError;
use async_trait::async_trait;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tracing::debug;

/// Connection lifecycle state. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Closing,
    Closed,
}

/// Close status reported by a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseStatus {
    /// Close frame without a status code (1005)
    Empty,
    /// Normal closure (1000)
    NormalClosure,
    /// Any other close code
    Abnormal(u16),
}

impl CloseStatus {
    pub const NORMAL_CLOSURE_CODE: u16 = 1000;
    pub const EMPTY_CODE: u16 = 1005;

    pub fn from_code(code: u16) -> Self {
        match code {
            Self::NORMAL_CLOSURE_CODE => Self::NormalClosure,
            Self::EMPTY_CODE => Self::Empty,
            other => Self::Abnormal(other),
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            Self::Empty => Self::EMPTY_CODE,
            Self::NormalClosure => Self::NORMAL_CLOSURE_CODE,
            Self::Abnormal(code) => *code,
        }
    }

    /// `NormalClosure` and `Empty` are the only non-error statuses.
    pub fn is_normal(&self) -> bool {
        matches!(self, Self::Empty | Self::NormalClosure)
    }
}

/// Output stream for one message; flushed and dropped after each write.
pub type OutputStream = Box<dyn AsyncWrite + Send + Unpin>;

/// A long-lived, bidirectional connection.
///
/// Only the writer pipeline may call [`Connection::open_output_stream`]; the
/// underlying protocol forbids concurrent writes.
#[async_trait]
pub trait Connection: Send + Sync {
    fn state(&self) -> ConnectionState;

    /// Close status reported by the peer or set by a local close.
    fn close_status(&self) -> Option<CloseStatus>;

    /// Open a stream whose flushed contents form one outbound message.
    fn open_output_stream(&self) -> OutputStream;

    /// Graceful close handshake.
    async fn close(&self, status: CloseStatus, reason: &str) -> Result<(), DeliveryError>;

    /// Immediate teardown without a handshake.
    fn abort(&self);
}

/// Frames emitted by a [`ChannelConnection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Close { code: u16, reason: String },
}

#[derive(Debug)]
struct Status {
    state: ConnectionState,
    close_status: Option<CloseStatus>,
    aborted: bool,
}

#[derive(Debug)]
struct Shared {
    frames: mpsc::UnboundedSender<Frame>,
    status: Mutex<Status>,
}

impl Shared {
    fn status(&self) -> MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Channel-backed connection.
#[derive(Debug, Clone)]
pub struct ChannelConnection {
    shared: Arc<Shared>,
}

impl ChannelConnection {
    /// Create an open connection and the receiver its frames are sent to.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Frame>) {
        let (frames, receiver) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            frames,
            status: Mutex::new(Status {
                state: ConnectionState::Open,
                close_status: None,
                aborted: false,
            }),
        });
        (Self { shared }, receiver)
    }

    /// Record a close status observed by the read side. The connection stays
    /// in its current state until it is closed or aborted.
    pub fn report_close_status(&self, status: CloseStatus) {
        self.shared.status().close_status = Some(status);
    }

    pub fn is_aborted(&self) -> bool {
        self.shared.status().aborted
    }
}

#[async_trait]
impl Connection for ChannelConnection {
    fn state(&self) -> ConnectionState {
        self.shared.status().state
    }

    fn close_status(&self) -> Option<CloseStatus> {
        self.shared.status().close_status
    }

    fn open_output_stream(&self) -> OutputStream {
        Box::new(FrameWriter {
            shared: self.shared.clone(),
            buffer: Vec::new(),
        })
    }

    async fn close(&self, status: CloseStatus, reason: &str) -> Result<(), DeliveryError> {
        {
            let mut current = self.shared.status();
            if current.state != ConnectionState::Open {
                return Ok(());
            }
            current.state = ConnectionState::Closing;
        }

        let sent = self.shared.frames.send(Frame::Close {
            code: status.code(),
            reason: reason.to_string(),
        });

        let mut current = self.shared.status();
        current.state = ConnectionState::Closed;
        current.close_status.get_or_insert(status);
        debug!(code = status.code(), reason, "Connection closed");

        sent.map_err(|_| {
            DeliveryError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "connection receiver dropped before close frame",
            ))
        })
    }

    fn abort(&self) {
        let mut current = self.shared.status();
        current.state = ConnectionState::Closed;
        current.aborted = true;
        debug!("Connection aborted");
    }
}

/// Buffers written bytes and emits them as one text frame on flush.
struct FrameWriter {
    shared: Arc<Shared>,
    buffer: Vec<u8>,
}

impl FrameWriter {
    fn emit(&mut self) -> io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        if self.shared.status().state == ConnectionState::Closed {
            self.buffer.clear();
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection is closed",
            ));
        }

        let bytes = std::mem::take(&mut self.buffer);
        let text = String::from_utf8(bytes)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.shared
            .frames
            .send(Frame::Text(text))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "connection receiver dropped"))
    }
}

impl AsyncWrite for FrameWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.get_mut().buffer.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(self.get_mut().emit())
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(self.get_mut().emit())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn test_close_status_codes() {
        assert_eq!(CloseStatus::from_code(1000), CloseStatus::NormalClosure);
        assert_eq!(CloseStatus::from_code(1005), CloseStatus::Empty);
        assert_eq!(CloseStatus::from_code(1011), CloseStatus::Abnormal(1011));
        assert!(CloseStatus::Empty.is_normal());
        assert!(!CloseStatus::Abnormal(1006).is_normal());
        assert_eq!(CloseStatus::Abnormal(4400).code(), 4400);
    }

    #[tokio::test]
    async fn test_flush_emits_one_frame() {
        let (connection, mut frames) = ChannelConnection::new();
        let mut stream = connection.open_output_stream();

        stream.write_all(b"{\"type\":").await.unwrap();
        stream.write_all(b"\"ka\"}").await.unwrap();
        stream.flush().await.unwrap();
        stream.flush().await.unwrap();
        drop(stream);

        assert_eq!(frames.recv().await, Some(Frame::Text(r#"{"type":"ka"}"#.to_string())));
        assert!(frames.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_graceful_close_sends_close_frame_once() {
        let (connection, mut frames) = ChannelConnection::new();

        connection.close(CloseStatus::NormalClosure, "Closed").await.unwrap();
        connection.close(CloseStatus::NormalClosure, "Closed").await.unwrap();

        assert_eq!(connection.state(), ConnectionState::Closed);
        assert_eq!(connection.close_status(), Some(CloseStatus::NormalClosure));
        assert_eq!(
            frames.recv().await,
            Some(Frame::Close {
                code: 1000,
                reason: "Closed".to_string()
            })
        );
        assert!(frames.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_writes_after_abort_fail() {
        let (connection, _frames) = ChannelConnection::new();
        connection.abort();

        let mut stream = connection.open_output_stream();
        stream.write_all(b"late").await.unwrap();
        let err = stream.flush().await.unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
        assert!(connection.is_aborted());
        assert_eq!(connection.state(), ConnectionState::Closed);
    }
}

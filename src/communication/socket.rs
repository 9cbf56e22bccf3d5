use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures_util::FutureExt;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;

use crate::error::{AppError, AppResult, CommunicationError};
use crate::protocol::{MAX_MESSAGE_BYTES, decode_line};

use super::connection::ConnectionType;
use super::pool::Resource;

struct LineReader {
    stream: BufReader<OwnedReadHalf>,
    /// Bytes of a line not yet terminated. Kept across calls so that a
    /// cancelled read loses nothing. Never longer than [`MAX_MESSAGE_BYTES`].
    pending: Vec<u8>,
    /// Set after an oversized line was rejected, until its end is skipped.
    discarding: bool,
}

enum LineRead {
    Line(Vec<u8>),
    TooLarge,
    Eof,
}

impl LineReader {
    /// Reads up to and including the next `\n`, holding at most
    /// [`MAX_MESSAGE_BYTES`] of it. A longer line is rejected as soon as it
    /// crosses the limit; the rest of it is skipped by later calls.
    async fn read_line(&mut self) -> std::io::Result<LineRead> {
        loop {
            let available = self.stream.fill_buf().await?;
            if available.is_empty() {
                self.pending.clear();
                self.discarding = false;
                return Ok(LineRead::Eof);
            }
            let newline = available.iter().position(|byte| *byte == b'\n');
            let take = newline.map_or(available.len(), |index| index.saturating_add(1));

            if self.discarding {
                self.stream.consume(take);
                self.discarding = newline.is_none();
                continue;
            }
            if take > MAX_MESSAGE_BYTES.saturating_sub(self.pending.len()) {
                self.pending.clear();
                self.stream.consume(take);
                self.discarding = newline.is_none();
                return Ok(LineRead::TooLarge);
            }
            if let Some(chunk) = available.get(..take) {
                self.pending.extend_from_slice(chunk);
            }
            self.stream.consume(take);
            if newline.is_some() {
                return Ok(LineRead::Line(std::mem::take(&mut self.pending)));
            }
        }
    }
}

/// A pooled connection that can be written to and checked for peer
/// shutdown. Implemented by [`SocketResource`]; the fan-out sender is
/// generic over it.
#[async_trait]
pub trait PeerConnection: Resource {
    fn peer(&self) -> SocketAddr;

    /// Writes pre-encoded bytes to the peer.
    ///
    /// # Errors
    ///
    /// Returns [`CommunicationError::ConnectionClosed`] if the connection
    /// was closed, or [`CommunicationError::PeerWrite`] if the write fails.
    async fn write_all(&self, bytes: &[u8]) -> AppResult<()>;

    /// Checks, without consuming data or waiting, whether the peer has shut
    /// down its side of the connection.
    async fn is_peer_shutdown(&self) -> bool;
}

/// One accepted peer connection, pooled per [`ConnectionType`].
///
/// Writes and reads only happen through a [`super::pool::Reservation`], so
/// the internal locks are never contended; they exist to hand out `&mut`
/// access to the split stream halves.
pub struct SocketResource {
    peer: SocketAddr,
    connection_type: ConnectionType,
    writer: Mutex<OwnedWriteHalf>,
    reader: Mutex<LineReader>,
    closed: AtomicBool,
}

impl SocketResource {
    /// Wraps an accepted stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the peer address cannot be read from the socket.
    pub fn new(stream: TcpStream, connection_type: ConnectionType) -> AppResult<Self> {
        let peer = stream.peer_addr().map_err(|err| {
            AppError::communication(CommunicationError::Io {
                context: "read peer address",
                source: err,
            })
        })?;
        if let Err(err) = stream.set_nodelay(true) {
            tracing::debug!("Failed to set TCP_NODELAY for {}: {}", peer, err);
        }
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            peer,
            connection_type,
            writer: Mutex::new(write_half),
            reader: Mutex::new(LineReader {
                stream: BufReader::new(read_half),
                pending: Vec::with_capacity(1024),
                discarding: false,
            }),
            closed: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub const fn connection_type(&self) -> ConnectionType {
        self.connection_type
    }

    /// Reads the next complete message. Returns `Ok(None)` once the peer
    /// has closed its side; a trailing partial line is discarded then.
    ///
    /// Cancel-safe: bytes of a partially received line are kept for the
    /// next call.
    ///
    /// # Errors
    ///
    /// Returns an I/O error from the socket, a decode error for a malformed
    /// line, or [`CommunicationError::WireMessageTooLarge`] once a line
    /// exceeds [`MAX_MESSAGE_BYTES`]. Rejected lines are consumed.
    pub async fn read_message<M: DeserializeOwned>(&self) -> AppResult<Option<M>> {
        let line = self.reader.lock().await.read_line().await.map_err(|err| {
            AppError::communication(CommunicationError::Io {
                context: "read wire message",
                source: err,
            })
        })?;
        match line {
            LineRead::Line(line) => decode_line(&line).map(Some),
            LineRead::TooLarge => Err(AppError::communication(
                CommunicationError::WireMessageTooLarge {
                    max_bytes: MAX_MESSAGE_BYTES,
                },
            )),
            LineRead::Eof => Ok(None),
        }
    }
}

#[async_trait]
impl PeerConnection for SocketResource {
    fn peer(&self) -> SocketAddr {
        self.peer
    }

    async fn write_all(&self, bytes: &[u8]) -> AppResult<()> {
        if self.is_closed() {
            return Err(AppError::communication(CommunicationError::ConnectionClosed));
        }
        let mut writer = self.writer.lock().await;
        writer.write_all(bytes).await.map_err(|err| {
            AppError::communication(CommunicationError::PeerWrite {
                peer: self.peer,
                source: err,
            })
        })
    }

    /// A shut down peer closes this resource, so the pool drops it once the
    /// probing reservation is released.
    async fn is_peer_shutdown(&self) -> bool {
        if self.is_closed() {
            return true;
        }
        let mut guard = self.reader.lock().await;
        if !guard.stream.buffer().is_empty() || !guard.pending.is_empty() {
            return false;
        }
        let mut peek_buf = [0_u8; 1];
        let shut_down = match guard.stream.get_mut().peek(&mut peek_buf).now_or_never() {
            Some(Ok(0) | Err(_)) => true,
            Some(Ok(_)) | None => false,
        };
        drop(guard);

        if shut_down {
            tracing::info!("{} peer {} has shut down", self.connection_type, self.peer);
            self.close();
        }
        shut_down
    }
}

impl Resource for SocketResource {
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for SocketResource {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SocketResource")
            .field("peer", &self.peer)
            .field("connection_type", &self.connection_type)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

//! Transport implementations
//!
//! Frames are newline-delimited JSON envelopes. Reads go through a
//! [`LinesCodec`], so a receive dropped mid-frame keeps the partial line
//! buffered for the next one.

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};

use crate::error::IpcError;
use crate::protocol::{MessageEnvelope, IPC_PROTOCOL_VERSION};

/// Transport trait for different communication mechanisms
#[async_trait]
pub trait IpcTransport: Send + Sync {
    /// Send a message to the other end
    async fn send<T: Serialize + Send + Sync>(
        &mut self,
        message: &MessageEnvelope<T>,
    ) -> Result<(), IpcError>;

    /// Receive a message from the other end
    async fn receive<T: for<'de> Deserialize<'de> + Send>(
        &mut self,
    ) -> Result<MessageEnvelope<T>, IpcError>;

    /// Close the transport
    async fn close(&mut self) -> Result<(), IpcError>;
}

/// Largest frame accepted from a peer
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// TCP transport; one per session on either side
pub struct TcpTransport {
    reader: FramedRead<OwnedReadHalf, LinesCodec>,
    writer: OwnedWriteHalf,
    peer: SocketAddr,
}

impl TcpTransport {
    pub fn new(stream: TcpStream) -> Result<Self, IpcError> {
        let peer = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: FramedRead::new(read_half, LinesCodec::new_with_max_length(MAX_FRAME_BYTES)),
            writer: write_half,
            peer,
        })
    }

    pub async fn connect(address: &str) -> Result<Self, IpcError> {
        let stream = TcpStream::connect(address)
            .await
            .map_err(|e| IpcError::ConnectFailed {
                endpoint: address.to_string(),
                reason: e.to_string(),
            })?;
        Self::new(stream)
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Whether the peer has sent more data or hung up since the last frame.
    ///
    /// Asks the socket directly; the reactor's cached readiness can lag
    /// behind a close that already reached the kernel.
    pub fn peer_moved_on(&self) -> bool {
        !self.reader.read_buffer().is_empty() || socket_has_input(self.reader.get_ref().as_ref())
    }
}

#[cfg(unix)]
fn socket_has_input(stream: &TcpStream) -> bool {
    use nix::errno::Errno;
    use nix::sys::socket::{recv, MsgFlags};
    use std::os::fd::AsRawFd;

    let mut byte = [0u8; 1];
    match recv(
        stream.as_raw_fd(),
        &mut byte,
        MsgFlags::MSG_PEEK | MsgFlags::MSG_DONTWAIT,
    ) {
        // zero bytes is end of stream
        Ok(_) => true,
        Err(Errno::EAGAIN) => false,
        Err(_) => true,
    }
}

#[cfg(not(unix))]
fn socket_has_input(_stream: &TcpStream) -> bool {
    false
}

#[async_trait]
impl IpcTransport for TcpTransport {
    async fn send<T: Serialize + Send + Sync>(
        &mut self,
        message: &MessageEnvelope<T>,
    ) -> Result<(), IpcError> {
        let mut json = serde_json::to_string(message)
            .map_err(|e| IpcError::SerializationError(e.to_string()))?;
        json.push('\n');

        self.writer.write_all(json.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn receive<T: for<'de> Deserialize<'de> + Send>(
        &mut self,
    ) -> Result<MessageEnvelope<T>, IpcError> {
        let line = match self.reader.next().await {
            Some(Ok(line)) => line,
            Some(Err(LinesCodecError::Io(e))) => return Err(e.into()),
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                return Err(IpcError::InvalidMessage(format!(
                    "frame exceeds {} bytes",
                    MAX_FRAME_BYTES
                )))
            }
            None => return Err(IpcError::ConnectionClosed),
        };

        let envelope: MessageEnvelope<T> = serde_json::from_str(line.trim_end())
            .map_err(|e| IpcError::DeserializationError(e.to_string()))?;

        if !envelope.is_compatible() {
            return Err(IpcError::ProtocolVersionMismatch {
                expected: IPC_PROTOCOL_VERSION,
                actual: envelope.protocol_version,
            });
        }

        Ok(envelope)
    }

    async fn close(&mut self) -> Result<(), IpcError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::TransportError;

/// Upper bound on a single frame. Workload payloads are step descriptors,
/// not tensors; anything near this size is a protocol bug.
pub const MAX_FRAME_LEN: usize = 8 * 1024 * 1024;

/// Address pair identifying one side of a broadcast connection.
///
/// `publish` is where this endpoint sends (the worker's gather channel),
/// `subscribe` is where it receives (the chief's broadcast channel).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub publish: String,
    pub subscribe: String,
}

/// Lifecycle of a connection, owned by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    Connected,
    Closing,
    Closed,
}

impl ConnState {
    fn name(self) -> &'static str {
        match self {
            ConnState::Disconnected => "disconnected",
            ConnState::Connected => "connected",
            ConnState::Closing => "closing",
            ConnState::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of a single receive.
#[derive(Debug)]
pub enum Received {
    /// One complete frame.
    Frame(Bytes),
    /// The timeout elapsed with no frame.
    Timeout,
    /// The peer closed the channel on a frame boundary.
    Closed,
}

/// Write one length-prefixed frame.
pub async fn write_frame<W>(writer: &mut W, payload: Bytes) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_LEN {
        return Err(TransportError::OversizedFrame {
            len: payload.len(),
            max: MAX_FRAME_LEN,
        });
    }
    writer.write_u32(payload.len() as u32).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame.
///
/// Returns `Ok(None)` when the peer closed the stream on a frame boundary.
/// EOF inside a frame is an error.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Bytes>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(TransportError::Io(e)),
    };
    if len > MAX_FRAME_LEN {
        return Err(TransportError::OversizedFrame {
            len,
            max: MAX_FRAME_LEN,
        });
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(Some(Bytes::from(buf)))
}

/// A worker-side broadcast connection: an inbound byte stream from the
/// chief's broadcast channel and an outbound byte stream to its gather
/// channel.
///
/// Generic over the stream halves so tests can run over
/// [`tokio::io::duplex`] pairs while production uses [`TcpStream`]s.
pub struct Connection<I, O> {
    inbound: I,
    outbound: O,
    state: ConnState,
}

impl Connection<TcpStream, TcpStream> {
    /// Establish both channels, each bounded by `timeout`.
    ///
    /// No retries at this layer or any other: a worker that cannot reach
    /// its chief terminates and leaves recovery to the supervisor.
    pub async fn connect(endpoint: &Endpoint, timeout: Duration) -> Result<Self, TransportError> {
        let inbound = connect_one(&endpoint.subscribe, timeout).await?;
        let outbound = connect_one(&endpoint.publish, timeout).await?;
        debug!(subscribe = %endpoint.subscribe, publish = %endpoint.publish, "broadcast connection established");
        Ok(Self::from_parts(inbound, outbound))
    }
}

async fn connect_one(addr: &str, timeout: Duration) -> Result<TcpStream, TransportError> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| TransportError::ConnectTimeout {
            addr: addr.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        })?
        .map_err(|e| TransportError::Connect {
            addr: addr.to_string(),
            source: e,
        })?;
    stream.set_nodelay(true).ok();
    Ok(stream)
}

impl<I, O> Connection<I, O>
where
    I: AsyncRead + Unpin,
    O: AsyncWrite + Unpin,
{
    /// Wrap already-connected stream halves.
    pub fn from_parts(inbound: I, outbound: O) -> Self {
        Self {
            inbound,
            outbound,
            state: ConnState::Connected,
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Send one frame on the outbound channel.
    pub async fn send(&mut self, frame: Bytes) -> Result<(), TransportError> {
        if self.state != ConnState::Connected {
            return Err(TransportError::NotConnected {
                state: self.state.name(),
            });
        }
        write_frame(&mut self.outbound, frame).await
    }

    /// Block until a frame arrives, the timeout elapses, or the peer
    /// closes the inbound channel.
    pub async fn recv(&mut self, timeout: Option<Duration>) -> Result<Received, TransportError> {
        let frame = match timeout {
            Some(t) => match tokio::time::timeout(t, read_frame(&mut self.inbound)).await {
                Ok(res) => res?,
                Err(_) => return Ok(Received::Timeout),
            },
            None => read_frame(&mut self.inbound).await?,
        };
        match frame {
            Some(bytes) => Ok(Received::Frame(bytes)),
            None => {
                self.state = ConnState::Disconnected;
                Ok(Received::Closed)
            }
        }
    }

    /// Shut the outbound channel down. Idempotent; always leaves the
    /// connection in `Closed`.
    pub async fn close(&mut self) {
        if matches!(self.state, ConnState::Closed | ConnState::Closing) {
            return;
        }
        self.state = ConnState::Closing;
        if let Err(e) = self.outbound.shutdown().await {
            debug!(error = %e, "outbound shutdown failed");
        }
        self.state = ConnState::Closed;
    }

    /// Split into independently owned halves for the adapter's pump tasks.
    pub fn into_split(self) -> (RecvHalf<I>, SendHalf<O>) {
        (
            RecvHalf {
                inbound: self.inbound,
            },
            SendHalf {
                outbound: self.outbound,
                state: self.state,
            },
        )
    }
}

/// Owned inbound half of a split [`Connection`].
pub struct RecvHalf<I> {
    inbound: I,
}

impl<I: AsyncRead + Unpin> RecvHalf<I> {
    /// See [`Connection::recv`].
    pub async fn recv(&mut self, timeout: Option<Duration>) -> Result<Received, TransportError> {
        let frame = match timeout {
            Some(t) => match tokio::time::timeout(t, read_frame(&mut self.inbound)).await {
                Ok(res) => res?,
                Err(_) => return Ok(Received::Timeout),
            },
            None => read_frame(&mut self.inbound).await?,
        };
        Ok(match frame {
            Some(bytes) => Received::Frame(bytes),
            None => Received::Closed,
        })
    }
}

/// Owned outbound half of a split [`Connection`].
pub struct SendHalf<O> {
    outbound: O,
    state: ConnState,
}

impl<O: AsyncWrite + Unpin> SendHalf<O> {
    /// See [`Connection::send`].
    pub async fn send(&mut self, frame: Bytes) -> Result<(), TransportError> {
        if self.state != ConnState::Connected {
            return Err(TransportError::NotConnected {
                state: self.state.name(),
            });
        }
        write_frame(&mut self.outbound, frame).await
    }

    /// See [`Connection::close`].
    pub async fn close(&mut self) {
        if matches!(self.state, ConnState::Closed | ConnState::Closing) {
            return;
        }
        self.state = ConnState::Closing;
        if let Err(e) = self.outbound.shutdown().await {
            debug!(error = %e, "outbound shutdown failed");
        }
        self.state = ConnState::Closed;
    }
}

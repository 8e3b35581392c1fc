use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{ProtocolError, TransportError, WorkerError};
use crate::protocol::{AckStatus, Message, SignalKind};
use crate::transport::{read_frame, write_frame};

/// An acknowledgement surfaced from one worker's gather channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerAck {
    pub worker: usize,
    pub seq: u64,
    pub status: AckStatus,
}

/// Bound but not yet joined chief endpoints.
///
/// Binding is separate from accepting so the launcher can read the
/// OS-assigned ports and hand them to the workers it spawns.
pub struct BroadcastListener {
    broadcast: TcpListener,
    gather: TcpListener,
}

impl BroadcastListener {
    /// Bind the broadcast and gather listeners. Use port 0 for
    /// OS-assigned ports.
    pub async fn bind(broadcast_addr: &str, gather_addr: &str) -> Result<Self, TransportError> {
        let broadcast = TcpListener::bind(broadcast_addr).await?;
        let gather = TcpListener::bind(gather_addr).await?;
        let local_broadcast = broadcast.local_addr()?;
        let local_gather = gather.local_addr()?;
        info!(broadcast = %local_broadcast, gather = %local_gather, "chief listeners bound");
        Ok(Self { broadcast, gather })
    }

    /// Local `(broadcast, gather)` ports.
    pub fn local_ports(&self) -> Result<(u16, u16), TransportError> {
        Ok((
            self.broadcast.local_addr()?.port(),
            self.gather.local_addr()?.port(),
        ))
    }

    /// Wait until exactly `num_workers` workers have connected to both
    /// channels, then hand over a ready [`BroadcastServer`].
    ///
    /// This is the join-before-start contract: no message can be
    /// published before every worker is subscribed, so no worker can
    /// miss a prefix of the sequence.
    pub async fn accept(self, num_workers: usize) -> Result<BroadcastServer, TransportError> {
        let (broadcast_conns, gather_conns) = tokio::try_join!(
            accept_n(&self.broadcast, num_workers),
            accept_n(&self.gather, num_workers),
        )?;

        let (ack_tx, ack_rx) = mpsc::channel(num_workers.max(1) * 4);
        let mut readers = Vec::with_capacity(num_workers);
        for (worker, stream) in gather_conns.into_iter().enumerate() {
            let tx = ack_tx.clone();
            readers.push(tokio::spawn(gather_reader(worker, stream, tx)));
        }

        info!(num_workers, "all workers joined");
        Ok(BroadcastServer {
            workers: broadcast_conns,
            acks: ack_rx,
            readers,
            next_seq: 0,
            closed: false,
        })
    }
}

async fn accept_n(listener: &TcpListener, n: usize) -> Result<Vec<TcpStream>, TransportError> {
    let mut conns = Vec::with_capacity(n);
    while conns.len() < n {
        let (stream, peer) = listener.accept().await?;
        stream.set_nodelay(true).ok();
        debug!(peer = %peer, joined = conns.len() + 1, expected = n, "worker connected");
        conns.push(stream);
    }
    Ok(conns)
}

/// Forward decoded gather-channel messages to the server's ack queue
/// until the worker closes its side.
async fn gather_reader(
    worker: usize,
    mut stream: TcpStream,
    tx: mpsc::Sender<(usize, Result<Message, WorkerError>)>,
) {
    loop {
        let event = match read_frame(&mut stream).await {
            Ok(Some(bytes)) => match Message::from_bytes(&bytes) {
                Ok(msg) => Ok(msg),
                Err(e) => Err(WorkerError::Protocol(ProtocolError::Decode(e))),
            },
            Ok(None) => {
                debug!(worker, "gather channel closed");
                return;
            }
            Err(e) => Err(WorkerError::Transport(e)),
        };
        let failed = event.is_err();
        if tx.send((worker, event)).await.is_err() || failed {
            return;
        }
    }
}

/// The chief side of the broadcast protocol: sole producer of workload
/// items, assigning sequence numbers from 0, strictly increasing, one per
/// step.
///
/// Acknowledgements are surfaced in arrival order; what to do with them
/// is the caller's reconciliation policy.
pub struct BroadcastServer {
    workers: Vec<TcpStream>,
    acks: mpsc::Receiver<(usize, Result<Message, WorkerError>)>,
    readers: Vec<JoinHandle<()>>,
    next_seq: u64,
    closed: bool,
}

impl BroadcastServer {
    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Sequence number the next published message will carry.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Publish one workload item to every worker. Returns its sequence
    /// number.
    pub async fn broadcast(&mut self, payload: serde_json::Value) -> Result<u64, WorkerError> {
        let seq = self.take_seq()?;
        let frame = Message::Workload { seq, payload }
            .to_bytes()
            .map_err(ProtocolError::Decode)?;
        self.fan_out(seq, frame).await?;
        debug!(seq, "workload broadcast");
        Ok(seq)
    }

    /// Publish a stream-terminating control signal.
    pub async fn signal(&mut self, kind: SignalKind) -> Result<u64, WorkerError> {
        let seq = self.take_seq()?;
        let frame = Message::Signal { seq, kind }
            .to_bytes()
            .map_err(ProtocolError::Decode)?;
        self.fan_out(seq, frame).await?;
        info!(seq, ?kind, "stream terminated");
        Ok(seq)
    }

    /// Publish a fault marker; every worker observing it stops with an
    /// error.
    pub async fn fault(&mut self, reason: &str) -> Result<u64, WorkerError> {
        let seq = self.take_seq()?;
        let frame = Message::Fault {
            seq,
            reason: reason.to_string(),
        }
        .to_bytes()
        .map_err(ProtocolError::Decode)?;
        self.fan_out(seq, frame).await?;
        warn!(seq, reason, "fault broadcast");
        Ok(seq)
    }

    /// Next acknowledgement from any worker, in arrival order.
    ///
    /// Returns `Ok(None)` once every gather channel has closed. Callers
    /// that need a bound wrap this in [`tokio::time::timeout`].
    pub async fn next_ack(&mut self) -> Result<Option<WorkerAck>, WorkerError> {
        let Some((worker, event)) = self.acks.recv().await else {
            return Ok(None);
        };
        match event? {
            Message::Ack { seq, status } => Ok(Some(WorkerAck {
                worker,
                seq,
                status,
            })),
            other => Err(ProtocolError::Unexpected(format!(
                "worker {worker} sent {other:?} on gather channel"
            ))
            .into()),
        }
    }

    /// Shut every broadcast channel down and stop the gather readers.
    /// Idempotent.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        for (worker, stream) in self.workers.iter_mut().enumerate() {
            if let Err(e) = stream.shutdown().await {
                debug!(worker, error = %e, "broadcast shutdown failed");
            }
        }
        for reader in &self.readers {
            reader.abort();
        }
        info!("chief closed");
    }

    fn take_seq(&mut self) -> Result<u64, WorkerError> {
        if self.closed {
            return Err(TransportError::NotConnected { state: "closed" }.into());
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        Ok(seq)
    }

    async fn fan_out(&mut self, seq: u64, frame: Bytes) -> Result<(), WorkerError> {
        for (worker, stream) in self.workers.iter_mut().enumerate() {
            write_frame(stream, frame.clone())
                .await
                .map_err(|e| {
                    warn!(worker, seq, error = %e, "broadcast write failed");
                    WorkerError::Transport(e)
                })?;
        }
        Ok(())
    }
}

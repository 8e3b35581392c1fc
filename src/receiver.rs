use tokio::io::{AsyncRead, AsyncWrite};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{ProtocolError, WorkerError};
use crate::protocol::{publish_ack, AckStatus, Message, SignalKind, WorkloadItem};
use crate::transport::{Connection, Received, RecvHalf, SendHalf};
use crate::watchdog::Heartbeat;

/// Capacity of the delivery-ack queue between the consumer thread and the
/// outbound pump.
const ACK_QUEUE: usize = 16;

/// What the inbound pump hands to the consumer side.
enum StreamEvent {
    Message(Message),
    Closed,
    Failed(WorkerError),
}

/// Pull-based adapter over the inbound half of a broadcast connection.
///
/// Presents the chief's push stream as a blocking iterator of workload
/// items for a single-threaded consumer loop: `next()` blocks until the
/// next item arrives, yields `None` after a terminating control signal,
/// and yields an error exactly once on a protocol violation or abrupt
/// connection loss, after which the stream is permanently ended. A new
/// connection and receiver are required to start again.
///
/// Internally the connection is split across two pump tasks on the
/// bootstrap's runtime: a reader forwarding decoded messages through a
/// capacity-1 handoff channel (no further buffering), and a writer
/// draining delivery acks back to the chief. Both tasks close their half
/// of the connection on every exit path.
///
/// `next()` must be called from outside the runtime; it blocks its
/// thread.
pub struct WorkloadReceiver {
    events: mpsc::Receiver<StreamEvent>,
    acks: Option<mpsc::Sender<(u64, AckStatus)>>,
    next_seq: u64,
    terminal: bool,
    heartbeat: Heartbeat,
}

impl WorkloadReceiver {
    /// Move `conn` into pump tasks on `handle` and return the consumer
    /// side.
    pub fn spawn<I, O>(handle: &Handle, conn: Connection<I, O>) -> Self
    where
        I: AsyncRead + Unpin + Send + 'static,
        O: AsyncWrite + Unpin + Send + 'static,
    {
        let (inbound, outbound) = conn.into_split();
        let (event_tx, event_rx) = mpsc::channel(1);
        let (ack_tx, ack_rx) = mpsc::channel(ACK_QUEUE);
        handle.spawn(broadcast_reader(inbound, event_tx));
        handle.spawn(ack_writer(outbound, ack_rx));
        Self {
            events: event_rx,
            acks: Some(ack_tx),
            next_seq: 0,
            terminal: false,
            heartbeat: Heartbeat::new(),
        }
    }

    /// Progress counter for the liveness watchdog.
    pub fn heartbeat(&self) -> Heartbeat {
        self.heartbeat.clone()
    }

    /// Sequence number the next delivered item must carry.
    pub fn cursor(&self) -> u64 {
        self.next_seq
    }

    fn finish(&mut self) {
        self.terminal = true;
        // Unblocks a reader mid-send and lets the ack writer drain out.
        self.events.close();
        self.acks = None;
    }

    fn check_seq(&mut self, got: u64) -> Result<(), WorkerError> {
        if got != self.next_seq {
            return Err(ProtocolError::OutOfOrder {
                expected: self.next_seq,
                got,
            }
            .into());
        }
        Ok(())
    }

    fn deliver(&mut self, seq: u64, payload: serde_json::Value) -> WorkloadItem {
        self.next_seq = seq + 1;
        self.heartbeat.beat(seq);
        if let Some(acks) = &self.acks {
            if acks.blocking_send((seq, AckStatus::Received)).is_err() {
                warn!(seq, "ack pump gone; delivery ack dropped");
            }
        }
        WorkloadItem { seq, payload }
    }

    fn next_item(&mut self) -> Option<Result<WorkloadItem, WorkerError>> {
        if self.terminal {
            return None;
        }
        let event = match self.events.blocking_recv() {
            Some(event) => event,
            // Pump died without reporting; indistinguishable from a drop.
            None => {
                self.finish();
                return Some(Err(WorkerError::ConnectionLost));
            }
        };
        match event {
            StreamEvent::Message(Message::Workload { seq, payload }) => {
                if let Err(e) = self.check_seq(seq) {
                    self.finish();
                    return Some(Err(e));
                }
                Some(Ok(self.deliver(seq, payload)))
            }
            StreamEvent::Message(Message::Signal { seq, kind }) => {
                if let Err(e) = self.check_seq(seq) {
                    self.finish();
                    return Some(Err(e));
                }
                if kind == SignalKind::Abort {
                    warn!(seq, "stream aborted by chief");
                } else {
                    debug!(seq, "end of stream");
                }
                self.finish();
                None
            }
            StreamEvent::Message(Message::Fault { seq, reason }) => {
                self.finish();
                Some(Err(WorkerError::ChiefFault { seq, reason }))
            }
            StreamEvent::Message(other @ Message::Ack { .. }) => {
                self.finish();
                Some(Err(ProtocolError::Unexpected(format!("{other:?}")).into()))
            }
            StreamEvent::Closed => {
                self.finish();
                Some(Err(WorkerError::ConnectionLost))
            }
            StreamEvent::Failed(e) => {
                self.finish();
                Some(Err(e))
            }
        }
    }
}

impl Iterator for WorkloadReceiver {
    type Item = Result<WorkloadItem, WorkerError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_item()
    }
}

/// Inbound pump: decode frames and forward them through the handoff
/// channel until the stream ends or the consumer goes away.
async fn broadcast_reader<I>(mut inbound: RecvHalf<I>, tx: mpsc::Sender<StreamEvent>)
where
    I: AsyncRead + Unpin,
{
    loop {
        let event = match inbound.recv(None).await {
            Ok(Received::Frame(bytes)) => match Message::from_bytes(&bytes) {
                Ok(msg) => StreamEvent::Message(msg),
                Err(e) => StreamEvent::Failed(ProtocolError::Decode(e).into()),
            },
            Ok(Received::Closed) => StreamEvent::Closed,
            // recv without a timeout never reports one
            Ok(Received::Timeout) => continue,
            Err(e) => StreamEvent::Failed(e.into()),
        };
        let last = matches!(event, StreamEvent::Closed | StreamEvent::Failed(_));
        if tx.send(event).await.is_err() || last {
            return;
        }
    }
}

/// Outbound pump: publish queued acks, then shut the gather channel down.
async fn ack_writer<O>(mut gather: SendHalf<O>, mut acks: mpsc::Receiver<(u64, AckStatus)>)
where
    O: AsyncWrite + Unpin,
{
    while let Some((seq, status)) = acks.recv().await {
        if let Err(e) = publish_ack(&mut gather, seq, status).await {
            warn!(seq, error = %e, "ack publish failed");
            break;
        }
    }
    gather.close().await;
}

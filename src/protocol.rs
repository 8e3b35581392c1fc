use serde::{Deserialize, Serialize};
use tokio::io::AsyncWrite;

use crate::error::TransportError;
use crate::transport::SendHalf;

/// Messages carried on the broadcast and gather channels.
///
/// The chief is the sole producer of `Workload` and `Signal` messages and
/// assigns their sequence numbers, starting at 0 and strictly increasing,
/// one per logical step. `Ack` messages flow worker to chief.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// One step of the distributed computation.
    Workload {
        seq: u64,
        payload: serde_json::Value,
    },
    /// Out-of-band marker terminating the workload sequence.
    Signal { seq: u64, kind: SignalKind },
    /// Worker acknowledgement for the workload at `seq`.
    Ack { seq: u64, status: AckStatus },
    /// Upstream failure marker. A worker observing this must stop.
    Fault { seq: u64, reason: String },
}

/// Kinds of stream-terminating control signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalKind {
    /// Normal end of the workload sequence.
    End,
    /// The chief is tearing the job down early.
    Abort,
}

/// Worker-side acknowledgement status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AckStatus {
    /// The workload item was delivered to the consumer loop.
    Received,
    /// The consumer finished the step.
    Complete,
    /// The consumer failed the step.
    Failed,
}

/// A workload item as handed to the consumer loop.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadItem {
    pub seq: u64,
    pub payload: serde_json::Value,
}

impl Message {
    /// Serialize to JSON bytes for sending as one frame.
    pub fn to_bytes(&self) -> Result<bytes::Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(bytes::Bytes::from)
    }

    /// Deserialize from the bytes of a received frame.
    pub fn from_bytes(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }

    /// The chief-assigned sequence number this message carries.
    pub fn seq(&self) -> u64 {
        match self {
            Message::Workload { seq, .. }
            | Message::Signal { seq, .. }
            | Message::Ack { seq, .. }
            | Message::Fault { seq, .. } => *seq,
        }
    }
}

/// Publish an acknowledgement for `seq` on the worker's gather channel.
///
/// Only the send is reliable; what the chief does with acks is its own
/// policy.
pub async fn publish_ack<O>(
    gather: &mut SendHalf<O>,
    seq: u64,
    status: AckStatus,
) -> Result<(), TransportError>
where
    O: AsyncWrite + Unpin,
{
    let frame = Message::Ack { seq, status }
        .to_bytes()
        .map_err(|e| TransportError::Io(std::io::Error::other(e)))?;
    gather.send(frame).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_roundtrip() {
        let msgs = vec![
            Message::Workload {
                seq: 0,
                payload: serde_json::json!({"op": "train", "batch": 32}),
            },
            Message::Signal {
                seq: 7,
                kind: SignalKind::End,
            },
            Message::Signal {
                seq: 8,
                kind: SignalKind::Abort,
            },
            Message::Ack {
                seq: 3,
                status: AckStatus::Received,
            },
            Message::Ack {
                seq: 3,
                status: AckStatus::Failed,
            },
            Message::Fault {
                seq: 4,
                reason: "chief lost a peer".into(),
            },
        ];

        for msg in msgs {
            let bytes = msg.to_bytes().unwrap();
            let decoded = Message::from_bytes(&bytes).unwrap();
            // Verify tag-based discrimination round-trips
            let re_bytes = decoded.to_bytes().unwrap();
            assert_eq!(bytes, re_bytes);
            assert_eq!(msg.seq(), decoded.seq());
        }
    }

    #[test]
    fn string_payloads_survive() {
        let msg = Message::Workload {
            seq: 1,
            payload: serde_json::json!("step-1"),
        };
        let decoded = Message::from_bytes(&msg.to_bytes().unwrap()).unwrap();
        match decoded {
            Message::Workload { seq, payload } => {
                assert_eq!(seq, 1);
                assert_eq!(payload, serde_json::json!("step-1"));
            }
            other => panic!("expected Workload, got {other:?}"),
        }
    }

    #[test]
    fn invalid_json_returns_error() {
        assert!(Message::from_bytes(b"not json").is_err());
        assert!(Message::from_bytes(b"{\"type\":\"Unknown\"}").is_err());
    }
}

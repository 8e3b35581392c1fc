use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ContextError;
use crate::transport::Endpoint;

/// Execution context for one worker process.
///
/// Written by the launcher, deserialized exactly once at process start,
/// and read-only afterwards. The `env` and `framework` blobs belong to
/// the launcher's schema and pass through this crate untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerContext {
    /// Enables debug logging and the liveness watchdog.
    pub debug: bool,
    pub broadcast: BroadcastPorts,
    /// Opaque environment/experiment configuration.
    #[serde(default)]
    pub env: serde_json::Value,
    /// Prior state to resume from, if any.
    #[serde(default)]
    pub load_path: Option<PathBuf>,
    pub rendezvous: RendezvousInfo,
    /// Opaque computation-framework configuration.
    #[serde(default)]
    pub framework: serde_json::Value,
}

/// Ports of the chief's broadcast and gather channels, as seen from the
/// worker: it subscribes on `subscribe` and publishes acks on `publish`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BroadcastPorts {
    pub publish: u16,
    pub subscribe: u16,
}

/// Fixed-at-launch membership descriptor, passed through to the
/// controller for its own peer topology setup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RendezvousInfo {
    pub rank: usize,
    pub size: usize,
    #[serde(default)]
    pub peer_addrs: Vec<String>,
}

impl WorkerContext {
    /// Deserialize and validate a context file.
    pub fn from_file(path: &Path) -> Result<Self, ContextError> {
        let json = std::fs::read_to_string(path).map_err(|e| ContextError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_json(&json)
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self, ContextError> {
        let context: Self = serde_json::from_str(json)?;
        context.validate()?;
        Ok(context)
    }

    /// Validate field values the launcher must have filled in.
    pub fn validate(&self) -> Result<(), ContextError> {
        if self.broadcast.publish == 0 {
            return Err(ContextError::ZeroPort { channel: "publish" });
        }
        if self.broadcast.subscribe == 0 {
            return Err(ContextError::ZeroPort {
                channel: "subscribe",
            });
        }
        if self.rendezvous.rank >= self.rendezvous.size {
            return Err(ContextError::RankOutOfRange {
                rank: self.rendezvous.rank,
                size: self.rendezvous.size,
            });
        }
        Ok(())
    }

    /// The chief lives in the same container; both channels are loopback.
    pub fn broadcast_endpoint(&self) -> Endpoint {
        Endpoint {
            publish: format!("127.0.0.1:{}", self.broadcast.publish),
            subscribe: format!("127.0.0.1:{}", self.broadcast.subscribe),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> String {
        serde_json::json!({
            "debug": true,
            "broadcast": {"publish": 4001, "subscribe": 4002},
            "env": {"experiment_id": 17},
            "load_path": "/ckpt/step-400",
            "rendezvous": {"rank": 1, "size": 4, "peer_addrs": ["10.0.0.1:7000"]},
            "framework": {"backend": "allreduce"}
        })
        .to_string()
    }

    #[test]
    fn parses_full_context() {
        let ctx = WorkerContext::from_json(&sample_json()).unwrap();
        assert!(ctx.debug);
        assert_eq!(ctx.broadcast.publish, 4001);
        assert_eq!(ctx.rendezvous.rank, 1);
        assert_eq!(ctx.load_path, Some(PathBuf::from("/ckpt/step-400")));
        assert_eq!(ctx.env["experiment_id"], 17);
        let ep = ctx.broadcast_endpoint();
        assert_eq!(ep.publish, "127.0.0.1:4001");
        assert_eq!(ep.subscribe, "127.0.0.1:4002");
    }

    #[test]
    fn opaque_blobs_default_to_null() {
        let ctx = WorkerContext::from_json(
            &serde_json::json!({
                "debug": false,
                "broadcast": {"publish": 1, "subscribe": 2},
                "rendezvous": {"rank": 0, "size": 1}
            })
            .to_string(),
        )
        .unwrap();
        assert!(ctx.env.is_null());
        assert!(ctx.framework.is_null());
        assert!(ctx.load_path.is_none());
        assert!(ctx.rendezvous.peer_addrs.is_empty());
    }

    #[test]
    fn zero_port_rejected() {
        let err = WorkerContext::from_json(
            &serde_json::json!({
                "debug": false,
                "broadcast": {"publish": 0, "subscribe": 2},
                "rendezvous": {"rank": 0, "size": 1}
            })
            .to_string(),
        )
        .unwrap_err();
        assert!(matches!(err, ContextError::ZeroPort { channel: "publish" }));
    }

    #[test]
    fn rank_out_of_range_rejected() {
        let err = WorkerContext::from_json(
            &serde_json::json!({
                "debug": false,
                "broadcast": {"publish": 1, "subscribe": 2},
                "rendezvous": {"rank": 3, "size": 3}
            })
            .to_string(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ContextError::RankOutOfRange { rank: 3, size: 3 }
        ));
    }

    #[test]
    fn malformed_json_rejected() {
        assert!(matches!(
            WorkerContext::from_json("not json"),
            Err(ContextError::Decode(_))
        ));
    }
}

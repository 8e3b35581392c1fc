use std::path::Path;

use crate::context::{RendezvousInfo, WorkerContext};
use crate::error::ControllerError;
use crate::receiver::WorkloadReceiver;

/// The training controller driving one worker's computation.
///
/// Runs on the bootstrap thread, consuming the workload sequence it was
/// prepared with until the sequence ends or a step fails. This crate
/// never retries a failed run; supervision is external.
pub trait Controller {
    fn run(&mut self) -> Result<(), ControllerError>;
}

/// User-implemented factory for the computation framework's controller.
///
/// Receives everything a controller needs to participate in the job:
/// the read-only execution context, the workload sequence (one-shot; the
/// controller takes ownership), the path to prior state if resuming,
/// the rendezvous descriptor for its own peer topology, and the opaque
/// framework configuration.
pub trait ControllerFactory {
    fn prepare(
        &self,
        context: &WorkerContext,
        workloads: WorkloadReceiver,
        load_path: Option<&Path>,
        rendezvous: &RendezvousInfo,
        framework: &serde_json::Value,
    ) -> Result<Box<dyn Controller>, ControllerError>;
}

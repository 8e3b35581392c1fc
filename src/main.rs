use std::path::{Path, PathBuf};
use std::process;

use clap::Parser;
use tracing::info;

use lockstep_broadcast::{
    bootstrap, Controller, ControllerError, ControllerFactory, RendezvousInfo, WorkerContext,
    WorkloadReceiver,
};

#[derive(Parser)]
#[command(name = "worker", about = "Broadcast-coordinated training worker")]
struct Args {
    /// Path to the serialized worker execution context.
    context: PathBuf,
}

/// Stand-in controller that drains the workload sequence, logging each
/// delivered item. Training frameworks plug their own factory in through
/// the library API.
struct DrainController {
    workloads: WorkloadReceiver,
}

impl Controller for DrainController {
    fn run(&mut self) -> Result<(), ControllerError> {
        for item in self.workloads.by_ref() {
            let item = item.map_err(|e| ControllerError::Run(e.to_string()))?;
            info!(seq = item.seq, payload = %item.payload, "workload step");
        }
        info!("workload sequence exhausted");
        Ok(())
    }
}

struct DrainFactory;

impl ControllerFactory for DrainFactory {
    fn prepare(
        &self,
        _context: &WorkerContext,
        workloads: WorkloadReceiver,
        load_path: Option<&Path>,
        rendezvous: &RendezvousInfo,
        _framework: &serde_json::Value,
    ) -> Result<Box<dyn Controller>, ControllerError> {
        if let Some(path) = load_path {
            info!(path = %path.display(), "prior state available");
        }
        info!(
            rank = rendezvous.rank,
            size = rendezvous.size,
            "preparing controller"
        );
        Ok(Box::new(DrainController { workloads }))
    }
}

fn main() -> anyhow::Result<()> {
    // Exactly one positional argument: the context file path. Arity
    // mismatches must exit 1 before any logging or network setup.
    let args = Args::try_parse().unwrap_or_else(|e| {
        let _ = e.print();
        process::exit(if e.use_stderr() { 1 } else { 0 });
    });

    let context = WorkerContext::from_file(&args.context)?;
    bootstrap::init_logging(context.debug);
    bootstrap::run(&context, &DrainFactory)?;
    Ok(())
}

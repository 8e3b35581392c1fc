use std::time::Duration;

use tokio::runtime::Runtime;
use tracing::{debug, info};

use crate::context::WorkerContext;
use crate::controller::ControllerFactory;
use crate::error::{Result, TransportError};
use crate::receiver::WorkloadReceiver;
use crate::transport::Connection;
use crate::watchdog::Watchdog;

/// Bound on each of the two connect attempts to the chief. There is no
/// retry behind it.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// How often the debug watchdog checks for a stalled consumer loop.
const WATCHDOG_INTERVAL: Duration = Duration::from_secs(30);

/// Install the process-wide log subscriber: `debug` verbosity when the
/// context asks for it, `info` otherwise, `RUST_LOG` winning over both.
pub fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .init();
    debug!("starting worker process initialization");
}

/// Worker process lifecycle: connect to the chief, wrap the connection
/// in a workload sequence, and run the controller over it.
///
/// The connection is opened once with a bounded timeout and owned by the
/// receiver's pump tasks, which close it on every exit path; dropping
/// the runtime on return (normal or otherwise) tears the pumps down.
/// Controller failures propagate out unchanged; restart policy belongs
/// to the external supervisor.
pub fn run(context: &WorkerContext, factory: &dyn ControllerFactory) -> Result<()> {
    let runtime = Runtime::new().map_err(TransportError::Io)?;

    let endpoint = context.broadcast_endpoint();
    info!(
        subscribe = %endpoint.subscribe,
        publish = %endpoint.publish,
        rank = context.rendezvous.rank,
        "connecting to chief"
    );
    let conn = runtime.block_on(Connection::connect(&endpoint, CONNECT_TIMEOUT))?;

    let workloads = WorkloadReceiver::spawn(runtime.handle(), conn);
    let _watchdog = context
        .debug
        .then(|| Watchdog::arm(WATCHDOG_INTERVAL, workloads.heartbeat()));

    let mut controller = factory.prepare(
        context,
        workloads,
        context.load_path.as_deref(),
        &context.rendezvous,
        &context.framework,
    )?;
    info!("controller prepared; entering run loop");
    controller.run()?;
    info!("controller finished");
    Ok(())
}

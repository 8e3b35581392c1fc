pub mod bootstrap;
pub mod chief;
pub mod context;
pub mod controller;
pub mod error;
pub mod protocol;
pub mod receiver;
pub mod transport;
pub mod watchdog;

pub use chief::{BroadcastListener, BroadcastServer, WorkerAck};
pub use context::{BroadcastPorts, RendezvousInfo, WorkerContext};
pub use controller::{Controller, ControllerFactory};
pub use error::{
    ContextError, ControllerError, ProtocolError, Result, TransportError, WorkerError,
};
pub use protocol::{publish_ack, AckStatus, Message, SignalKind, WorkloadItem};
pub use receiver::WorkloadReceiver;
pub use transport::{ConnState, Connection, Endpoint, Received, RecvHalf, SendHalf};
pub use watchdog::{Heartbeat, Watchdog};

// This crate contains the call-correlation engine:
// - Method registry exposed to the peer process
// - Pending call table with per-call timeouts
// - Dispatcher routing incoming calls and results
// - Channel transports (in-memory, stdio)

pub mod assist;
pub mod channel;
pub mod dispatcher;
pub mod handle;
pub mod pending;
pub mod registry;

// Re-export main types for convenience
pub use assist::Assist;
pub use channel::{ChannelEndpoint, ChannelSender, ProcessControl, Signal};
pub use handle::RemoteHandle;
pub use pending::PendingCallTable;
pub use registry::{Entry, Method, MethodRegistry, Namespace, Receiver};

pub use assist_ipc::{CallConfig, CallError, CallRequest, CallResult, CallSpec, ChannelMessage};

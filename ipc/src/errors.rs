use crate::messages::CallRequest;
use thiserror::Error;

/// Every way a call can fail. The `Display` text is what the caller finds in
/// `CallResult.error`; only plain text crosses the channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    #[error("invalid configuration: {0}")]
    InvalidCallSpec(String),

    #[error("method not found: '{0}' is not exposed by the remote process")]
    MethodNotFound(String),

    /// The resolved method failed; carries the flattened error text.
    #[error("{0}")]
    Execution(String),

    #[error("timeout: no reply within {0}ms")]
    Timeout(u64),

    #[error("terminated: the remote process was terminated before replying")]
    Terminated,

    #[error("channel closed: the remote process went away before replying")]
    ChannelClosed,
}

/// A call specification without a usable method name.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("invalid configuration: {reason}")]
pub struct InvalidCallSpec {
    pub reason: String,
    /// Best-effort echo of what the caller asked for
    pub request: CallRequest,
}

/// Reasons an incoming value was not accepted as a `ChannelMessage`.
#[derive(Error, Debug)]
pub enum MalformedMessage {
    #[error("message is not a JSON object")]
    NotAnObject,

    #[error("unknown message kind: {0}")]
    UnknownKind(String),

    #[error("invalid message shape: {0}")]
    Invalid(#[from] serde_json::Error),
}

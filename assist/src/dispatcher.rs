use crate::channel::ChannelSender;
use crate::pending::PendingCallTable;
use crate::registry::MethodRegistry;
use assist_ipc::{CallError, CallRequest, CallResult, ChannelMessage};
use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::backtrace::BacktraceStatus;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, instrument, warn};

/// Routes every incoming message on one channel: calls run against the local
/// registry, results go to the pending table.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<MethodRegistry>,
    pending: PendingCallTable,
    outgoing: ChannelSender,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<MethodRegistry>,
        pending: PendingCallTable,
        outgoing: ChannelSender,
    ) -> Self {
        Self {
            registry,
            pending,
            outgoing,
        }
    }

    /// Consumes `incoming` until the peer goes away, then fails whatever is
    /// still waiting and flips `closed`.
    #[instrument(skip_all, fields(channel = %self.outgoing.label()))]
    pub async fn run(self, mut incoming: mpsc::UnboundedReceiver<Value>, closed: watch::Sender<bool>) {
        info!("Dispatcher started");
        while let Some(value) = incoming.recv().await {
            self.dispatch(value);
        }

        info!("Incoming stream ended");
        self.pending.fail_all(CallError::ChannelClosed);
        // Receivers may all be gone already
        let _ = closed.send(true);
    }

    /// Handles a single incoming value. Never blocks on method execution.
    pub fn dispatch(&self, value: Value) {
        let message = match ChannelMessage::from_value(value) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping malformed message: {}", e);
                return;
            }
        };

        match message {
            ChannelMessage::Call { request } => {
                debug!("Incoming call '{}' ({})", request.name, request.id);
                let registry = self.registry.clone();
                let outgoing = self.outgoing.clone();
                tokio::spawn(async move {
                    let result = execute(&registry, &request).await;
                    outgoing.send(&ChannelMessage::result(result));
                });
            }
            ChannelMessage::Result { request, result } => {
                debug!("Incoming result for '{}' ({})", request.name, request.id);
                self.pending.resolve(&request.id, result);
            }
        }
    }
}

/// Resolves and runs `request.name`, turning every failure (including a
/// panic in the method) into an error string on the returned result.
pub async fn execute(registry: &MethodRegistry, request: &CallRequest) -> CallResult {
    let resolved = match registry.resolve(&request.name) {
        Ok(resolved) => resolved,
        Err(e) => {
            debug!("Rejecting call '{}': {}", request.name, e);
            return CallResult::failed(request.clone(), e);
        }
    };

    let args = request.positional_params();
    let invoked = std::panic::catch_unwind(AssertUnwindSafe(|| {
        resolved.method.invoke(resolved.receiver, args)
    }));
    let outcome = match invoked {
        Ok(future) => AssertUnwindSafe(future).catch_unwind().await,
        Err(payload) => Err(payload),
    };

    match outcome {
        Ok(Ok(value)) => CallResult::success(request.clone(), value),
        Ok(Err(e)) => {
            debug!("Method '{}' failed: {:#}", request.name, e);
            CallResult::failed(request.clone(), CallError::Execution(flatten_error(&e)))
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            warn!("Method '{}' panicked: {}", request.name, message);
            CallResult::failed(
                request.clone(),
                CallError::Execution(format!("panic: {}", message)),
            )
        }
    }
}

/// Full cause chain, followed by the backtrace when one was captured.
pub fn flatten_error(error: &anyhow::Error) -> String {
    let backtrace = error.backtrace();
    match backtrace.status() {
        BacktraceStatus::Captured => format!("{:#}\n{}", error, backtrace),
        _ => format!("{:#}", error),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

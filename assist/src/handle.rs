use crate::channel::{ChannelSender, ProcessControl, Signal};
use crate::pending::PendingCallTable;
use assist_core::AssistResult;
use assist_ipc::{CallError, CallResult, CallSpec, ChannelMessage};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Caller-side view of the process on the other end of one channel.
///
/// Cheap to clone; all clones share one id counter and one pending table.
#[derive(Clone)]
pub struct RemoteHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    instance_token: String,
    counter: AtomicU64,
    pending: PendingCallTable,
    outgoing: ChannelSender,
    control: Option<Box<dyn ProcessControl>>,
    terminated: AtomicBool,
    default_timeout: Option<u64>,
    closed: watch::Receiver<bool>,
}

impl RemoteHandle {
    pub(crate) fn new(
        pending: PendingCallTable,
        outgoing: ChannelSender,
        control: Option<Box<dyn ProcessControl>>,
        default_timeout: Option<u64>,
        closed: watch::Receiver<bool>,
    ) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                instance_token: instance_token(),
                counter: AtomicU64::new(0),
                pending,
                outgoing,
                control,
                terminated: AtomicBool::new(false),
                default_timeout,
                closed,
            }),
        }
    }

    pub fn instance_token(&self) -> &str {
        &self.inner.instance_token
    }

    /// Waiters still registered on this channel.
    pub fn pending_calls(&self) -> usize {
        self.inner.pending.len()
    }

    pub fn pid(&self) -> Option<u32> {
        self.inner.control.as_ref().and_then(|control| control.pid())
    }

    fn next_id(&self) -> String {
        let n = self.inner.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}-{}", self.inner.instance_token, n)
    }

    /// Invokes a method on the remote process.
    ///
    /// Always yields a [`CallResult`]; failures of any kind, including an
    /// unusable spec, a timeout or a vanished peer, land in `error`.
    pub async fn call(&self, spec: impl Into<CallSpec>) -> CallResult {
        let config = match spec.into().into_config() {
            Ok(config) => config,
            Err(invalid) => {
                warn!("Rejecting call: {}", invalid);
                return CallResult::failed(
                    invalid.request,
                    CallError::InvalidCallSpec(invalid.reason),
                );
            }
        };

        let id = match config.id.clone() {
            Some(id) => id,
            None => self.next_id(),
        };
        let mut request = config.into_request(id);
        if request.timeout_millis.is_none() {
            request.timeout_millis = self.inner.default_timeout;
        }

        // Register before checking: terminate sets the flag before it drains
        // the table, so a waiter missed by the drain always sees the flag here
        let waiter = self.inner.pending.register(&request);
        if self.inner.terminated.load(Ordering::SeqCst) {
            debug!("Call '{}' issued after terminate", request.name);
            drop(waiter);
            return CallResult::failed(request, CallError::Terminated);
        }

        if let Some(millis) = request.timeout_millis {
            self.inner.pending.arm_timeout(&waiter, millis);
        }

        debug!("Calling '{}' ({})", request.name, request.id);
        if !self.inner.outgoing.send(&ChannelMessage::call(request.clone())) {
            // Nothing will ever answer; fail the id now rather than wait forever
            self.inner.pending.resolve(
                &request.id,
                CallResult::failed(request.clone(), CallError::ChannelClosed),
            );
        }

        match waiter.wait().await {
            Some(result) => result,
            None => CallResult::failed(request, CallError::ChannelClosed),
        }
    }

    /// Stops the remote process. Outstanding calls and any later call
    /// resolve with a `terminated` error.
    pub async fn terminate(&self, signal: Signal) -> AssistResult<()> {
        if self.inner.terminated.swap(true, Ordering::SeqCst) {
            debug!("Remote already terminated");
            return Ok(());
        }

        let failed = self.inner.pending.fail_all(CallError::Terminated);
        self.inner.counter.store(0, Ordering::Relaxed);
        info!(
            "Terminating remote on '{}' ({} calls outstanding)",
            self.inner.outgoing.label(),
            failed
        );

        match &self.inner.control {
            Some(control) => control.terminate(signal).await,
            None => Ok(()),
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.terminated.load(Ordering::SeqCst)
    }

    /// Resolves once the incoming side of the channel has ended.
    pub async fn closed(&self) {
        let mut closed = self.inner.closed.clone();
        // An Err means the dispatcher is gone, which is closed as well
        let _ = closed.wait_for(|closed| *closed).await;
    }
}

impl fmt::Debug for RemoteHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteHandle")
            .field("instance_token", &self.inner.instance_token)
            .field("channel", &self.inner.outgoing.label())
            .field("pending", &self.inner.pending.len())
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

/// A token unique to one handle: creation time in milliseconds plus a
/// six-digit random suffix.
pub fn instance_token() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let suffix = 100_000 + uuid::Uuid::new_v4().as_u128() % 900_000;
    format!("{}{}", millis, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assist_ipc::CallConfig;
    use std::collections::HashSet;
    use tokio::sync::mpsc;

    fn handle() -> (RemoteHandle, mpsc::UnboundedReceiver<serde_json::Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (_closed_tx, closed_rx) = watch::channel(false);
        let handle = RemoteHandle::new(
            PendingCallTable::new(),
            ChannelSender::new("test", tx),
            None,
            None,
            closed_rx,
        );
        (handle, rx)
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let (handle, _rx) = handle();
        let ids: HashSet<String> = (0..1000).map(|_| handle.next_id()).collect();
        assert_eq!(ids.len(), 1000);
        assert!(ids.iter().all(|id| id.starts_with(handle.instance_token())));
    }

    #[test]
    fn test_instance_token_shape() {
        let token = instance_token();
        assert!(token.len() > 6);
        assert!(token.chars().all(|c| c.is_ascii_digit()));

        let (first, _a) = handle();
        let (second, _b) = handle();
        assert_ne!(first.instance_token(), second.instance_token());
    }

    #[tokio::test]
    async fn test_call_on_closed_channel_fails_fast() {
        let (handle, rx) = handle();
        drop(rx);

        let result = handle.call("greet").await;
        assert!(result.error.unwrap().starts_with("channel closed"));
        assert_eq!(handle.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_call_after_terminate_sends_nothing() {
        let (handle, mut rx) = handle();
        handle.terminate(Signal::Terminate).await.unwrap();

        let result = handle.call(CallConfig::new("greet").id("late")).await;
        assert!(result.error.unwrap().starts_with("terminated"));
        assert_eq!(result.request.id, "late");
        assert_eq!(handle.pending_calls(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_call_is_withdrawn() {
        let (handle, mut rx) = handle();

        let gave_up =
            tokio::time::timeout(std::time::Duration::from_millis(20), handle.call("anything"))
                .await;
        assert!(gave_up.is_err());
        // the call went out, but nobody is waiting for its answer any more
        assert!(rx.try_recv().is_ok());
        assert_eq!(handle.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_invalid_spec_sends_nothing() {
        let (handle, mut rx) = handle();
        let result = handle.call(serde_json::json!({"params": [1]})).await;
        assert!(result.error.unwrap().starts_with("invalid configuration"));
        assert!(rx.try_recv().is_err());
    }
}

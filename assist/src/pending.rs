use assist_ipc::{CallError, CallRequest, CallResult};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

// One registered continuation awaiting the result for an id
#[derive(Debug)]
struct Waiter {
    key: u64,
    request: CallRequest,
    responder: oneshot::Sender<CallResult>,
    timer: Option<JoinHandle<()>>,
}

#[derive(Debug, Default)]
struct PendingState {
    // Never holds an empty Vec: an entry leaves the map as soon as its waiters fire
    waiters: HashMap<String, Vec<Waiter>>,
    next_key: u64,
}

/// In-flight calls for one channel, keyed by correlation id.
///
/// Whichever of a genuine reply or a timeout reaches [`resolve`] first wins;
/// the other finds no entry and is a no-op.
///
/// [`resolve`]: PendingCallTable::resolve
#[derive(Debug, Clone, Default)]
pub struct PendingCallTable {
    inner: Arc<Mutex<PendingState>>,
}

/// The caller's side of a registered waiter. Dropping it before a result
/// arrives withdraws the waiter from the table.
#[derive(Debug)]
pub struct WaiterHandle {
    table: PendingCallTable,
    id: String,
    key: u64,
    request: CallRequest,
    rx: oneshot::Receiver<CallResult>,
}

impl WaiterHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// `None` only if the table was dropped without resolving this waiter.
    pub async fn wait(mut self) -> Option<CallResult> {
        (&mut self.rx).await.ok()
    }
}

impl Drop for WaiterHandle {
    fn drop(&mut self) {
        // No-op once resolved: the entry is already gone
        if self.table.withdraw(&self.id, self.key) {
            debug!("Caller for id '{}' gave up, waiter withdrawn", self.id);
        }
    }
}

impl PendingCallTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PendingState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates (or appends to) the waiter entry for `request.id`.
    pub fn register(&self, request: &CallRequest) -> WaiterHandle {
        let (tx, rx) = oneshot::channel();
        let mut state = self.lock();
        state.next_key += 1;
        let key = state.next_key;

        let waiters = state.waiters.entry(request.id.clone()).or_default();
        if !waiters.is_empty() {
            debug!("Id '{}' now has {} waiters", request.id, waiters.len() + 1);
        }
        waiters.push(Waiter {
            key,
            request: request.clone(),
            responder: tx,
            timer: None,
        });

        WaiterHandle {
            table: self.clone(),
            id: request.id.clone(),
            key,
            request: request.clone(),
            rx,
        }
    }

    /// Starts a timer that resolves `handle.id` with a synthetic timeout
    /// result through the same path a genuine reply takes.
    pub fn arm_timeout(&self, handle: &WaiterHandle, millis: u64) {
        let table = self.clone();
        let id = handle.id.clone();
        let request = handle.request.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            debug!("Call '{}' ({}) timed out after {}ms", id, request.name, millis);
            table.resolve(&id, CallResult::failed(request, CallError::Timeout(millis)));
        });

        let mut state = self.lock();
        let waiter = state
            .waiters
            .get_mut(&handle.id)
            .and_then(|waiters| waiters.iter_mut().find(|w| w.key == handle.key));
        match waiter {
            Some(waiter) => waiter.timer = Some(timer),
            // Already resolved
            None => timer.abort(),
        }
    }

    // Removes one waiter and stops its timer; drops the id with its last waiter
    fn withdraw(&self, id: &str, key: u64) -> bool {
        let mut state = self.lock();
        let Some(waiters) = state.waiters.get_mut(id) else {
            return false;
        };
        let Some(position) = waiters.iter().position(|w| w.key == key) else {
            return false;
        };

        let waiter = waiters.remove(position);
        if waiters.is_empty() {
            state.waiters.remove(id);
        }
        drop(state);

        if let Some(timer) = waiter.timer {
            timer.abort();
        }
        true
    }

    /// Delivers `result` to every waiter for `id` and removes the entry.
    /// Returns how many waiters fired; an unknown id is a no-op.
    pub fn resolve(&self, id: &str, result: CallResult) -> usize {
        let waiters = self.lock().waiters.remove(id);
        let Some(waiters) = waiters else {
            debug!("No pending call for id '{}', dropping result", id);
            return 0;
        };

        let fired = waiters.len();
        for waiter in waiters {
            if let Some(timer) = waiter.timer {
                timer.abort();
            }
            if waiter.responder.send(result.clone()).is_err() {
                debug!("Caller for id '{}' stopped waiting", id);
            }
        }
        fired
    }

    /// Resolves every outstanding waiter with `error` and empties the table.
    pub fn fail_all(&self, error: CallError) -> usize {
        let drained: Vec<(String, Vec<Waiter>)> = self.lock().waiters.drain().collect();

        let mut failed = 0;
        for (id, waiters) in drained {
            for waiter in waiters {
                if let Some(timer) = waiter.timer {
                    timer.abort();
                }
                failed += 1;
                if waiter
                    .responder
                    .send(CallResult::failed(waiter.request, error.clone()))
                    .is_err()
                {
                    debug!("Caller for id '{}' stopped waiting", id);
                }
            }
        }
        if failed > 0 {
            warn!("Failed {} outstanding calls: {}", failed, error);
        }
        failed
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().waiters.contains_key(id)
    }

    /// Number of registered waiters across all ids.
    pub fn len(&self) -> usize {
        self.lock().waiters.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().waiters.is_empty()
    }
}

use crate::channel::{stdio, ChannelEndpoint, ProcessControl};
use crate::dispatcher::Dispatcher;
use crate::handle::RemoteHandle;
use crate::pending::PendingCallTable;
use crate::registry::MethodRegistry;
use assist_core::{AssistConfig, AssistError, AssistResult, WorkerConfig};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// The exposed method tree plus the settings applied to every channel it is
/// attached to.
#[derive(Debug, Clone)]
pub struct Assist {
    registry: Arc<MethodRegistry>,
    config: AssistConfig,
}

impl Assist {
    pub fn new(registry: MethodRegistry) -> Self {
        Self::with_config(registry, AssistConfig::default())
    }

    pub fn with_config(registry: MethodRegistry, config: AssistConfig) -> Self {
        Self {
            registry: Arc::new(registry),
            config,
        }
    }

    pub fn registry(&self) -> &MethodRegistry {
        &self.registry
    }

    pub fn config(&self) -> &AssistConfig {
        &self.config
    }

    /// Starts serving `endpoint` and returns the handle for calling its peer.
    /// Must be called from within a tokio runtime.
    pub fn attach(
        &self,
        endpoint: ChannelEndpoint,
        control: Option<Box<dyn ProcessControl>>,
    ) -> RemoteHandle {
        let (outgoing, incoming) = endpoint.into_parts();
        let pending = PendingCallTable::new();
        let (closed_tx, closed_rx) = watch::channel(false);

        let dispatcher = Dispatcher::new(self.registry.clone(), pending.clone(), outgoing.clone());
        tokio::spawn(dispatcher.run(incoming, closed_tx));

        let label = outgoing.label().to_string();
        let handle = RemoteHandle::new(
            pending,
            outgoing,
            control,
            self.config.default_timeout_millis,
            closed_rx,
        );
        info!(
            "Attached channel '{}' (instance {})",
            label,
            handle.instance_token()
        );
        handle
    }

    /// Spawns `worker` with piped stdio and attaches to it.
    pub fn spawn(&self, worker: &WorkerConfig) -> AssistResult<RemoteHandle> {
        let (endpoint, process) = stdio::spawn(worker)?;
        Ok(self.attach(endpoint, Some(Box::new(process))))
    }

    /// Spawns the worker named in the configuration.
    pub fn spawn_configured(&self) -> AssistResult<RemoteHandle> {
        let worker = self
            .config
            .worker
            .as_ref()
            .ok_or_else(|| AssistError::Config("no worker configured".to_string()))?;
        self.spawn(worker)
    }

    /// Worker side: serves the parent over this process's stdin/stdout.
    pub fn serve_stdio(&self) -> RemoteHandle {
        self.attach(stdio::current_process(), None)
    }
}

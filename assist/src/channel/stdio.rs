// Channel transport over a worker's stdin/stdout pipes, framed with
// Content-Length headers.

use super::{ChannelEndpoint, ProcessControl, Signal};
use assist_core::{AssistError, AssistResult, WorkerConfig};
use assist_ipc::codec::{self, STDIO_BUFFER_SIZE};
use async_trait::async_trait;
use serde_json::Value;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader, BufWriter};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};
use tokio::task;
use tracing::{debug, error, info, warn};

/// Spawns a worker with piped stdio and returns the endpoint talking to it.
pub fn spawn(config: &WorkerConfig) -> AssistResult<(ChannelEndpoint, ChildProcess)> {
    // Set up command with executable and arguments
    let mut command_parts = config.command.iter();
    let executable = command_parts
        .next()
        .ok_or_else(|| AssistError::Spawn("Empty worker command".to_string()))?;
    let label = format!("worker:{}", executable);
    info!("Launching worker process: {}", label);

    let mut cmd = Command::new(executable);
    cmd.args(command_parts);
    cmd.args(&config.args);
    cmd.envs(&config.env);

    // Configure stdin, stdout, stderr pipes
    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|e| AssistError::Spawn(format!("{}: Failed to spawn: {}", label, e)))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AssistError::Spawn(format!("{}: Failed to get stdin", label)))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AssistError::Spawn(format!("{}: Failed to get stdout", label)))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AssistError::Spawn(format!("{}: Failed to get stderr", label)))?;

    let pid = child.id();
    let label = match pid {
        Some(pid) => format!("{}[{}]", label, pid),
        None => label,
    };

    forward_stderr(label.clone(), stderr);
    let endpoint = connect(label.clone(), stdout, stdin);

    Ok((
        endpoint,
        ChildProcess {
            label,
            pid,
            child: Mutex::new(Some(child)),
        },
    ))
}

/// The worker-side endpoint over this process's own stdin/stdout.
pub fn current_process() -> ChannelEndpoint {
    connect(
        format!("parent-of:{}", std::process::id()),
        tokio::io::stdin(),
        tokio::io::stdout(),
    )
}

/// Builds an endpoint over any reader/writer pair.
pub fn connect<R, W>(label: String, reader: R, writer: W) -> ChannelEndpoint
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
    let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();

    spawn_reader(label.clone(), reader, incoming_tx);
    spawn_writer(label.clone(), writer, outgoing_rx);

    ChannelEndpoint::new(label, outgoing_tx, incoming_rx)
}

fn spawn_reader<R>(label: String, reader: R, incoming: mpsc::UnboundedSender<Value>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    task::spawn(async move {
        let mut reader = BufReader::with_capacity(STDIO_BUFFER_SIZE, reader);
        loop {
            match codec::read_value(&mut reader).await {
                Ok(Some(value)) => {
                    if incoming.send(value).is_err() {
                        debug!("Reader({}): Endpoint dropped, stopping", label);
                        break;
                    }
                }
                Ok(None) => {
                    info!("Reader({}): Stream closed", label);
                    break;
                }
                Err(e) => {
                    error!("Reader({}): Error reading frame: {}", label, e);
                    break;
                }
            }
        }
    });
}

fn spawn_writer<W>(label: String, writer: W, mut outgoing: mpsc::UnboundedReceiver<Value>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    task::spawn(async move {
        let mut writer = BufWriter::with_capacity(STDIO_BUFFER_SIZE, writer);
        while let Some(value) = outgoing.recv().await {
            if let Err(e) = codec::write_frame(&mut writer, &value).await {
                error!("Writer({}): Error writing frame: {}", label, e);
                // Dropping the receiver makes later sends report the channel as unavailable
                break;
            }
        }
        info!("Writer({}): Writer task finished", label);
    });
}

fn forward_stderr<R>(label: String, stderr: R)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    task::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => warn!("[stderr - {}]: {}", label, line),
                Ok(None) => {
                    debug!("{} stderr closed", label);
                    break;
                }
                Err(e) => {
                    error!("Error reading stderr for '{}': {}", label, e);
                    break;
                }
            }
        }
    });
}

/// A spawned worker process.
#[derive(Debug)]
pub struct ChildProcess {
    label: String,
    pid: Option<u32>,
    child: Mutex<Option<Child>>,
}

impl ChildProcess {
    pub fn label(&self) -> &str {
        &self.label
    }

    // Reap the child in the background so it does not linger as a zombie
    fn reap(&self, mut child: Child) {
        let label = self.label.clone();
        task::spawn(async move {
            match child.wait().await {
                Ok(status) => info!("{} exited with {}", label, status),
                Err(e) => warn!("Failed to wait for {}: {}", label, e),
            }
        });
    }
}

#[async_trait]
impl ProcessControl for ChildProcess {
    async fn terminate(&self, signal: Signal) -> AssistResult<()> {
        let Some(mut child) = self.child.lock().await.take() else {
            debug!("{} already terminated", self.label);
            return Ok(());
        };

        let result = deliver(&mut child, self.pid, signal);
        match &result {
            Ok(()) => info!("Sent {:?} to {}", signal, self.label),
            Err(e) => error!("Failed to terminate {}: {}", self.label, e),
        }
        self.reap(child);
        result
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }
}

#[cfg(unix)]
fn deliver(child: &mut Child, pid: Option<u32>, signal: Signal) -> AssistResult<()> {
    use nix::sys::signal::{kill, Signal as NixSignal};
    use nix::unistd::Pid;

    let Some(pid) = pid else {
        // Already exited
        return Ok(());
    };
    let signal = match signal {
        Signal::Interrupt => NixSignal::SIGINT,
        Signal::Terminate => NixSignal::SIGTERM,
        Signal::Kill => return child.start_kill().map_err(AssistError::from),
    };
    kill(Pid::from_raw(pid as i32), signal)
        .map_err(|e| AssistError::Spawn(format!("kill({}, {}) failed: {}", pid, signal, e)))
}

#[cfg(not(unix))]
fn deliver(child: &mut Child, _pid: Option<u32>, _signal: Signal) -> AssistResult<()> {
    child.start_kill().map_err(AssistError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assist_ipc::{CallRequest, ChannelMessage};
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_connect_frames_both_directions() {
        let (local_io, remote_io) = duplex(4096);
        let (local_read, local_write) = tokio::io::split(local_io);
        let (remote_read, remote_write) = tokio::io::split(remote_io);

        let local = connect("local".to_string(), local_read, local_write);
        let mut remote = connect("remote".to_string(), remote_read, remote_write);

        let request = CallRequest::new("7", "greet").with_params(serde_json::json!(["Sam"]));
        assert!(local.send(&ChannelMessage::call(request.clone())));

        let message = ChannelMessage::from_value(remote.recv().await.unwrap()).unwrap();
        assert_eq!(message, ChannelMessage::call(request));
    }

    #[test]
    fn test_spawn_rejects_empty_command() {
        let result = spawn(&WorkerConfig::default());
        assert!(matches!(result, Err(AssistError::Spawn(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_and_terminate() {
        let config = WorkerConfig::new(vec!["sleep".to_string(), "30".to_string()]);
        let (mut endpoint, process) = spawn(&config).unwrap();
        assert!(process.pid().is_some());

        process.terminate(Signal::Terminate).await.unwrap();
        // stdout closes once the process is gone
        assert!(endpoint.recv().await.is_none());
        // second terminate is a no-op
        process.terminate(Signal::Kill).await.unwrap();
    }
}

use anyhow::{Context, Result};
use assist_core::{get_default_config_file, AssistConfig, WorkerConfig, ENV_LOG_LEVEL};
use assist_ipc::{CallConfig, CallSpec};
use process_assist::{Assist, MethodRegistry, Signal};
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const APP_NAME: &str = "assist-demo";

/// Loads the configuration file (default location when `path` is `None`),
/// then applies environment and command-line overrides.
pub fn load_config(path: Option<&Path>, timeout_ms: Option<u64>) -> Result<AssistConfig> {
    let path: PathBuf = match path {
        Some(path) => path.to_path_buf(),
        None => get_default_config_file(APP_NAME).context("Failed to locate config file")?,
    };

    let mut config = AssistConfig::load_from_file(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?
        .with_env_overrides();
    if timeout_ms.is_some() {
        config.default_timeout_millis = timeout_ms;
    }
    Ok(config)
}

/// The child invocation of this same binary.
fn self_worker() -> Result<WorkerConfig> {
    let exe = std::env::current_exe().context("Failed to resolve current executable")?;
    Ok(WorkerConfig::new(vec![
        exe.to_string_lossy().into_owned(),
        "child".to_string(),
    ]))
}

fn demo_calls() -> Vec<CallSpec> {
    vec![
        CallConfig::new("test").params(json!(["test params 001"])).into(),
        CallConfig::new("math.add").params(json!([2, 3])).into(),
        CallSpec::from("childFunc"),
    ]
}

/// Spawns the worker, runs the demo calls, prints every result, then stops it.
pub async fn run(config: AssistConfig, log_level: &str) -> Result<()> {
    let mut worker = match &config.worker {
        Some(worker) => worker.clone(),
        None => self_worker()?,
    };
    worker
        .env
        .entry(ENV_LOG_LEVEL.to_string())
        .or_insert_with(|| log_level.to_string());

    let assist = Assist::with_config(MethodRegistry::empty(), config);
    let child = assist.spawn(&worker).context("Failed to spawn worker")?;
    info!("Worker started (pid {:?})", child.pid());

    for spec in demo_calls() {
        let result = child.call(spec).await;
        if !result.is_ok() {
            warn!("Call '{}' failed", result.request.name);
        }
        println!(
            "{}",
            serde_json::to_string_pretty(&result).context("Failed to render result")?
        );
    }

    child
        .terminate(Signal::Terminate)
        .await
        .context("Failed to terminate worker")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_config_with_cli_timeout() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "default_timeout_millis = 1000\n").unwrap();

        let config = load_config(Some(&path), None).unwrap();
        assert!(config.default_timeout_millis.is_some());

        let config = load_config(Some(&path), Some(250)).unwrap();
        assert_eq!(config.default_timeout_millis, Some(250));
    }

    #[test]
    fn test_demo_calls() {
        let names: Vec<String> = demo_calls()
            .into_iter()
            .map(|spec| spec.into_config().unwrap().name)
            .collect();
        assert_eq!(names, ["test", "math.add", "childFunc"]);
    }

    #[test]
    fn test_self_worker_runs_child() {
        let worker = self_worker().unwrap();
        assert_eq!(worker.command.len(), 2);
        assert_eq!(worker.command[1], "child");
    }
}

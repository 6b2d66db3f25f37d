use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Demo of method calls between a controller and the worker it spawns
#[derive(Parser, Debug)]
#[command(name = "assist-demo", author, version, about, long_about = None)]
pub struct Args {
    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, global = true, env = "ASSIST_LOG_LEVEL")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Spawn a worker and call its exposed methods
    Parent {
        /// Local wait limit for each call, in milliseconds
        #[arg(long, env = "ASSIST_CALL_TIMEOUT_MS")]
        timeout_ms: Option<u64>,

        /// Path to the configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Serve methods to the parent over stdin/stdout
    Child,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_parent() {
        let args = Args::try_parse_from([
            "assist-demo",
            "parent",
            "--timeout-ms",
            "250",
            "--config",
            "/tmp/assist.toml",
        ])
        .unwrap();
        match args.command {
            Command::Parent { timeout_ms, config } => {
                assert_eq!(timeout_ms, Some(250));
                assert_eq!(config, Some(PathBuf::from("/tmp/assist.toml")));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_child_with_global_log_level() {
        let args = Args::try_parse_from(["assist-demo", "child", "--log-level", "debug"]).unwrap();
        assert!(matches!(args.command, Command::Child));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Args::try_parse_from(["assist-demo"]).is_err());
    }
}

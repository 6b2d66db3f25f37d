use tracing::warn;
use tracing_subscriber::{fmt, prelude::*, reload, EnvFilter, Registry};

pub const DEFAULT_LEVEL: &str = "info";

/// Lets the filter change once configuration has been read.
pub struct LogHandle {
    filter: reload::Handle<EnvFilter, Registry>,
    // RUST_LOG always wins over configured levels
    from_env: bool,
}

impl LogHandle {
    pub fn set_level(&self, level: &str) {
        if self.from_env {
            return;
        }
        if let Err(e) = self.filter.reload(EnvFilter::new(level)) {
            warn!("Failed to apply log level '{}': {}", level, e);
        }
    }
}

/// Installs the global subscriber. Output goes to stderr: a worker's stdout
/// carries channel frames.
pub fn init(level: &str) -> LogHandle {
    let (filter, from_env) = match EnvFilter::try_from_default_env() {
        Ok(filter) => (filter, true),
        Err(_) => (EnvFilter::new(level), false),
    };
    let (filter, handle) = reload::Layer::new(filter);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    LogHandle {
        filter: handle,
        from_env,
    }
}

/// Command line (or `ASSIST_LOG_LEVEL`) first, then the config file.
pub fn effective_level(cli: Option<&str>, configured: Option<&str>) -> String {
    cli.or(configured).unwrap_or(DEFAULT_LEVEL).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_level_precedence() {
        assert_eq!(effective_level(Some("debug"), Some("warn")), "debug");
        assert_eq!(effective_level(None, Some("warn")), "warn");
        assert_eq!(effective_level(None, None), DEFAULT_LEVEL);
    }
}

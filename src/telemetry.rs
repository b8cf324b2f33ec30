use anyhow::{Result, anyhow};
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "MDC_LOG";
const DEFAULT_DIRECTIVES: &str = "warn";

/// Diagnostic logging to stderr. `MDC_LOG` takes `EnvFilter` directives,
/// e.g. `MDC_LOG=mdc=debug`.
pub fn init_logging() -> Result<()> {
    let directives = std::env::var(LOG_ENV)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_DIRECTIVES.to_string());

    let filter = EnvFilter::try_new(&directives)
        .map_err(|err| anyhow!("invalid {LOG_ENV} directives `{directives}`: {err}"))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|err| anyhow!("failed to initialize logging: {err}"))
}

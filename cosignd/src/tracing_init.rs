//! Tracing subscriber initialization, run before config loading so a bad
//! config file is itself logged instead of silently printed to stderr.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Initializes the global tracing subscriber. `RUST_LOG` always wins; in its
/// absence, `config` (if present) supplies a default level and any
/// per-module directives.
pub fn init(config: Option<&LoggingConfig>) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let mut filter = EnvFilter::new("");
        let level = config.map(|c| c.level.as_str()).unwrap_or("info");
        filter = filter.add_directive(level.parse().unwrap_or_else(|_| "info".parse().unwrap()));
        for directive in config.map(|c| c.module_levels.as_slice()).unwrap_or(&[]) {
            if let Ok(directive) = directive.parse() {
                filter = filter.add_directive(directive);
            }
        }
        filter
    });

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))
}

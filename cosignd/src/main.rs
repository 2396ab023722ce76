use anyhow::Result;
use clap::Parser;

use cosignd::{Config, Server};

#[derive(Parser, Debug)]
#[command(name = "cosignd", about = "Authentication state server for a centralized web SSO deployment")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "/etc/cosign/cosignd.toml")]
    config: std::path::PathBuf,

    /// Overrides `RUST_LOG`/the config file's logging level with `debug`.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::from_file(&cli.config);
    let mut logging = config.as_ref().ok().and_then(|c| c.logging.clone());
    if cli.verbose {
        logging
            .get_or_insert_with(|| cosignd::config::LoggingConfig {
                level: "debug".to_string(),
                module_levels: Vec::new(),
            })
            .level = "debug".to_string();
    }
    cosignd::tracing_init::init(logging.as_ref())?;

    let config = config.map_err(anyhow::Error::from)?;

    let server = Server::bind(&config).await?;
    server.serve().await?;

    Ok(())
}

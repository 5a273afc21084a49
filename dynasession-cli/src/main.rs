use anyhow::Result;
use clap::Parser;
use dynasession_cli::{Cli, load_config, run};
use dynasession_store::DynamoDbItemStore;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let telemetry = if cli.json_logs {
        dynasession_telemetry::init_json_telemetry("dynasession")
    } else {
        dynasession_telemetry::init_telemetry("dynasession")
    };
    if let Err(e) = telemetry {
        eprintln!("Failed to initialize telemetry: {e}");
    }

    let config = load_config(cli.config.as_deref())?;
    let backend = DynamoDbItemStore::from_config(&config).await?;

    run(cli.command, config, Arc::new(backend), &mut std::io::stdout()).await
}

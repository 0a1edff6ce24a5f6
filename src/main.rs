use anyhow::Result;
use clap::Parser;
use scrape_orchestrator::{
    load_config, setup_logging, shutdown_signal, validate_config_file, Cli, CliRunner, Commands,
    ShutdownMode,
};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    setup_logging(args.verbose)?;

    info!("Starting scrape-orchestrator v{}", env!("CARGO_PKG_VERSION"));

    // Validation never launches a browser
    if let Commands::Validate { file } = &args.command {
        validate_config_file(file).await?;
        return Ok(());
    }

    let config = load_config(&args).await?;
    let grace = config.shutdown_grace;
    let cli_runner = CliRunner::new(config).await?;

    // Serve mode handles its own signals and drains before returning
    let result = if matches!(args.command, Commands::Serve { .. }) {
        cli_runner.run(args.command).await
    } else {
        tokio::select! {
            result = cli_runner.run(args.command) => {
                info!("Application completed");
                result
            }
            _ = shutdown_signal() => {
                info!("Received shutdown signal");
                Ok(())
            }
        }
    };

    info!("Shutting down...");
    cli_runner.service.shutdown(ShutdownMode::Drain(grace)).await;

    if let Err(e) = result {
        error!("Application error: {:#}", e);
        std::process::exit(1);
    }

    info!("scrape-orchestrator stopped");
    Ok(())
}

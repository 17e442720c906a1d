use anyhow::{Context, Result};
use clap::Parser;
use places_scraper::{setup_logging, Cli, CliRunner, Commands, Config};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Cli::parse();

    // Setup logging
    setup_logging(args.verbose)?;

    info!("Starting places-scraper v{}", env!("CARGO_PKG_VERSION"));

    // `validate` checks its own file; everything else needs a usable config
    let config = match &args.command {
        Commands::Validate { .. } => Config::default(),
        Commands::Run { .. } => match load_config(&args).await {
            Ok(config) => config,
            Err(e) => {
                error!("Invalid configuration: {:#}", e);
                std::process::exit(1);
            }
        },
    };

    let cli_runner = CliRunner::new(config);

    if let Err(e) = cli_runner.run(args.command).await {
        error!("Application error: {:#}", e);
        std::process::exit(1);
    }

    info!("places-scraper stopped");
    Ok(())
}

async fn load_config(args: &Cli) -> Result<Config> {
    let mut config = if let Some(config_path) = &args.config {
        // Load from file
        let config_content = tokio::fs::read_to_string(config_path)
            .await
            .with_context(|| format!("cannot read {}", config_path.display()))?;
        serde_json::from_str(&config_content)
            .with_context(|| format!("cannot parse {}", config_path.display()))?
    } else {
        // Use default configuration
        Config::default()
    };

    // Override with CLI arguments
    args.apply_overrides(&mut config);

    config.validate()?;

    info!("Configuration loaded successfully");
    info!("Browser pool size: {}", config.pool_size);
    info!("Max concurrent pages: {}", config.execution_ceiling());
    info!("Starvation threshold: {:?}", config.starvation_threshold);

    Ok(config)
}

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tradewarden::application::engine::Engine;
use tradewarden::config::Settings;
use tracing::{info, Level};
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "tradewarden", about = "Autonomous equities trading engine")]
struct Args {
    /// Path to the settings document.
    #[arg(short, long, default_value = "config/settings.toml")]
    config: PathBuf,

    /// Run phase 0 and the full pipeline immediately instead of waiting for
    /// the scheduled wall-clock points.
    #[arg(long)]
    run_now: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let args = Args::parse();
    let settings = Settings::load(&args.config)?;

    info!("starting tradewarden (capital ${:.2})", settings.engine.starting_capital);

    let mut engine = Engine::build(settings).await?;
    engine
        .add_alert_handler(std::sync::Arc::new(|alert| {
            info!("[alert] {}: {:?}", alert.symbol(), alert);
        }))
        .await;
    engine.start().await?;

    if args.run_now {
        info!("--run-now: driving phase 0 and the pipeline immediately");
        engine.run_pipeline_now().await;
    }

    tokio::signal::ctrl_c().await?;
    info!("interrupt received, shutting down");
    engine.shutdown().await;

    Ok(())
}

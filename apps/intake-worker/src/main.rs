mod app;
mod cli;
mod telemetry;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use crate::app::App;
use crate::cli::Args;
use crate::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file if it exists
    dotenv::dotenv().ok();

    let args = Args::parse();

    let _guards = init_telemetry(&args)?;

    info!("Starting intake worker");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let result = run_application(args).await;

    if let Err(ref e) = result {
        error!("Worker error: {:#}", e);
    }

    info!("Worker shutdown complete");

    result
}

async fn run_application(args: Args) -> Result<()> {
    let app = App::build(args).await?;
    app.run().await?;
    Ok(())
}

//! Listing Sniper - new listing entry and deadline exit bot

use anyhow::Result;
use clap::Parser;

use listing_sniper::adapters::cli::{execute, CliApp};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists (webhook secrets go here, not in config.toml)
    dotenvy::dotenv().ok();

    let app = CliApp::parse();
    execute(app).await
}

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use dotenvy::dotenv;

use tracing::info;

use pahe_relay::{AppConfig, ApplicationServer, Logger};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let config = Arc::new(AppConfig::parse());

    // guards are kept alive to flush logs and maintain the sentry connection
    let _guards = Logger::init(config.cargo_env, config.sentry_dsn.clone());

    info!(
        "logger and env prepped, catalog at {}, sandbox runtime '{}'",
        config.catalog_base_url, config.node_binary
    );

    ApplicationServer::serve(config)
        .await
        .context("relay server failed to start")?;

    Ok(())
}

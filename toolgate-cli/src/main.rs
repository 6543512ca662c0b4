//! `toolgate` console binary.

mod args;
mod builtins;
mod commands;
mod console;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use toolgate::governor::{Governance, review_queue};
use toolgate::primitives::Identity;
use tracing::info;

use crate::args::Cli;
use crate::console::Console;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = toolgate::config::load(cli.config.as_deref())?;
    if let Some(dir) = cli.data_dir {
        config.storage.data_dir = dir;
    }
    toolgate::telemetry::init(&config.telemetry)?;

    let identity = Identity::new(cli.identity.as_str())
        .with_context(|| format!("invalid identity `{}`", cli.identity))?;
    let (reviews, inbox) = review_queue(config.review.timeout());
    let governance = Governance::open(config, Arc::new(reviews))
        .await
        .context("opening governance state")?;
    builtins::install(&governance)?;

    if !cli.no_auto_grant {
        let report = governance.reload(Some(&identity)).await?;
        info!(%identity, tools = report.loaded.len(), granted = report.granted.len(), "catalog tools granted");
    }

    let agent = governance.agent(identity);
    let result = Console::new(&governance, agent, inbox).run().await;
    governance.shutdown();
    result
}

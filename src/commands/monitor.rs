use anyhow::{Context as _, Result};
use clap::ArgMatches;
use colored::Colorize;
use std::sync::Arc;

use super::chain_client;
use crate::core::context::Context;
use crate::core::monitoring::MonitoringService;

/// Serve metrics and control requests without starting a validator
pub async fn handle_monitor(ctx: Arc<Context>, matches: &ArgMatches) -> Result<()> {
    let port = matches
        .get_one::<u16>("port")
        .copied()
        .unwrap_or(ctx.config.monitoring.port);

    let service = MonitoringService::new(ctx.clone(), chain_client(&ctx));
    let addr = service.start(port).await?;

    println!("{} ws://{}", "✓ Monitoring on".green(), addr);
    println!(
        "  {} every {} ms",
        "Sampling".dimmed(),
        ctx.config.monitoring.interval_ms
    );
    println!(
        "  {} {}",
        "History:".dimmed(),
        service.collector().history().dir().display()
    );
    println!();
    println!("{}", "Press Ctrl-C to stop.".dimmed());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    println!();
    service.stop().await;
    println!("{}", "✓ Monitoring stopped".green());
    Ok(())
}

use anyhow::{Context as _, Result};
use chrono::{NaiveDate, Utc};
use clap::ArgMatches;
use colored::Colorize;
use std::sync::Arc;

use super::chain_client;
use crate::core::context::Context;
use crate::core::metrics::{evaluate_alerts, AlertSeverity, MetricSample, MetricsCollector};
use crate::ui::{colored_percent, format_mib, format_size, format_time, format_uptime, running_badge};

pub async fn handle_metrics(ctx: Arc<Context>, matches: &ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("show", sub)) => show(ctx, sub).await,
        Some(("history", sub)) => history(ctx, sub),
        Some(("cleanup", sub)) => cleanup(ctx, sub),
        _ => {
            println!("Use 'valmon metrics --help' for more information.");
            Ok(())
        }
    }
}

fn parse_date(matches: &ArgMatches, id: &str, default: NaiveDate) -> Result<NaiveDate> {
    match matches.get_one::<String>(id) {
        Some(text) => NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .with_context(|| format!("Invalid --{} date '{}', expected YYYY-MM-DD", id, text)),
        None => Ok(default),
    }
}

/// Take a fresh sample. The first CPU reading after start-up is always
/// zero, so two samples are taken and the second one reported.
async fn show(ctx: Arc<Context>, matches: &ArgMatches) -> Result<()> {
    let collector = MetricsCollector::new(ctx.clone(), chain_client(&ctx));

    collector.collect().await;
    tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
    let sample = collector
        .collect()
        .await
        .context("Metrics collection was interrupted")?;

    if matches.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&sample)?);
        return Ok(());
    }

    print_sample(&ctx, &sample);
    Ok(())
}

fn print_sample(ctx: &Context, sample: &MetricSample) {
    let thresholds = &ctx.config.performance;
    let system = &sample.system;
    let validator = &sample.validator;

    println!("{} {}", "Sampled at".dimmed(), format_time(sample.timestamp));
    println!();

    println!("{}", "System".white().bold());
    println!(
        "  {} {} of {} cores",
        "CPU:".dimmed(),
        colored_percent(system.cpu.usage_percent, thresholds.cpu_warning, thresholds.cpu_critical),
        system.cpu.core_count
    );
    println!(
        "  {} {} ({} / {})",
        "Memory:".dimmed(),
        colored_percent(
            system.memory.usage_percent,
            thresholds.memory_warning,
            thresholds.memory_critical
        ),
        format_mib(system.memory.used_mb),
        format_mib(system.memory.total_mb)
    );
    println!(
        "  {} {:.2} {:.2} {:.2}",
        "Load:".dimmed(),
        system.load.one,
        system.load.five,
        system.load.fifteen
    );
    println!();

    println!("{} {}", "Validator".white().bold(), running_badge(validator.running));
    if validator.running {
        if let Some(pid) = validator.pid {
            println!("  {} {}", "PID:".dimmed(), pid);
        }
        println!("  {} {}", "Uptime:".dimmed(), format_uptime(validator.uptime_secs));
        println!(
            "  {} {}",
            "CPU:".dimmed(),
            colored_percent(validator.cpu_percent, thresholds.cpu_warning, thresholds.cpu_critical)
        );
        println!("  {} {}", "Memory:".dimmed(), format_mib(validator.memory_mb));
        println!("  {} {}", "Slot:".dimmed(), validator.slot_height);
        println!("  {} {}", "Block height:".dimmed(), validator.block_height);
        println!("  {} {:.1}", "TPS:".dimmed(), validator.tps);
        if let Some(epoch) = &validator.epoch_info {
            println!(
                "  {} {} ({}/{})",
                "Epoch:".dimmed(),
                epoch.epoch,
                epoch.slot_index,
                epoch.slots_in_epoch
            );
        }
    }
    println!();

    let network = &sample.network;
    println!("{}", "Network".white().bold());
    if network.interface.is_empty() {
        println!("  {}", "unavailable".dimmed());
    } else {
        println!("  {} {}", "Interface:".dimmed(), network.interface);
        println!(
            "  {} {}/s in, {}/s out",
            "Rate:".dimmed(),
            format_size(network.rx_bytes_per_sec),
            format_size(network.tx_bytes_per_sec)
        );
        if let Some(speed) = network.link_speed_mbps {
            println!("  {} {} Mb/s", "Link:".dimmed(), speed);
        }
    }
    println!();

    let storage = &sample.storage;
    println!("{}", "Storage".white().bold());
    if storage.mount_point.is_empty() {
        println!("  {}", "unavailable".dimmed());
    } else {
        println!(
            "  {} {} {} ({} free)",
            "Disk:".dimmed(),
            storage.mount_point,
            colored_percent(storage.usage_percent, thresholds.disk_warning, thresholds.disk_critical),
            format_size(storage.available_bytes)
        );
        println!("  {} {}", "Ledger:".dimmed(), format_size(storage.ledger_bytes));
    }

    let alerts = evaluate_alerts(sample, thresholds);
    if !alerts.is_empty() {
        println!();
        println!("{}", "Alerts".white().bold());
        for alert in alerts {
            let badge = match alert.severity {
                AlertSeverity::Critical => "CRITICAL".red().bold(),
                AlertSeverity::Warning => "WARNING".yellow().bold(),
            };
            println!("  {} {}", badge, alert.message);
        }
    }
}

fn history(ctx: Arc<Context>, matches: &ArgMatches) -> Result<()> {
    let today = Utc::now().date_naive();
    let from = parse_date(matches, "from", today)?;
    let to = parse_date(matches, "to", today)?;

    let collector = MetricsCollector::new(ctx.clone(), chain_client(&ctx));
    let samples = collector.get_historical_metrics(from, to)?;

    if matches.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&samples)?);
        return Ok(());
    }

    if samples.is_empty() {
        println!("{} {} .. {}", "No samples recorded for".yellow(), from, to);
        return Ok(());
    }

    println!(
        "{}",
        format!(
            "{:<20} {:>7} {:>7} {:>7} {:>9} {:>12}",
            "TIME", "CPU", "MEM", "DISK", "TPS", "SLOT"
        )
        .bold()
    );
    for sample in &samples {
        println!(
            "{:<20} {:>6.1}% {:>6.1}% {:>6.1}% {:>9.1} {:>12}",
            format_time(sample.timestamp),
            sample.system.cpu.usage_percent,
            sample.system.memory.usage_percent,
            sample.storage.usage_percent,
            sample.validator.tps,
            sample.validator.slot_height
        );
    }
    println!();
    println!("{} {}", samples.len(), "samples".dimmed());
    Ok(())
}

fn cleanup(ctx: Arc<Context>, matches: &ArgMatches) -> Result<()> {
    let days = matches
        .get_one::<u32>("days")
        .copied()
        .unwrap_or(ctx.config.monitoring.retention_days);

    let collector = MetricsCollector::new(ctx.clone(), chain_client(&ctx));
    let removed = collector.cleanup_old_metrics(days)?;

    if removed.is_empty() {
        println!("{} {} days.", "No metrics files older than".dimmed(), days);
    } else {
        for path in &removed {
            println!("  {} {}", "-".dimmed(), path.display());
        }
        println!("{} {} files", "✓ Removed".green(), removed.len());
    }
    Ok(())
}

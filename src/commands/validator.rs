//! `start`, `stop`, `restart`, `reset` and `status`.

use anyhow::{Context as _, Result};
use clap::ArgMatches;
use colored::Colorize;
use dialoguer::Confirm;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use super::chain_client;
use crate::core::context::Context;
use crate::core::monitoring::MonitoringService;
use crate::core::supervisor::{ExitInfo, ProcessSupervisor, StartInfo, StartOptions};
use crate::error::ValmonError;
use crate::ui::{colored_percent, format_mib, format_time, format_uptime, running_badge};

/// How long `restart` waits for the previous owner to let go
const LOCK_RETRY_ATTEMPTS: u32 = 10;
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(500);

fn start_options(matches: &ArgMatches) -> StartOptions {
    StartOptions {
        environment: matches.get_one::<String>("env").cloned(),
        reset: matches.get_flag("reset"),
        hard_reset: matches.get_flag("hard"),
        monitor: matches.get_flag("monitor"),
    }
}

fn print_started(info: &StartInfo) {
    println!(
        "{} {}",
        "✓ Validator running for environment".green(),
        info.environment.cyan().bold()
    );
    println!("  {} {}", "PID:".dimmed(), info.pid);
    println!("  {} {}", "RPC:".dimmed(), info.rpc_url);
    println!("  {} {}", "WebSocket:".dimmed(), info.ws_url);
}

/// Resolves when the child reports its exit
async fn wait_for_exit(exit_rx: Option<watch::Receiver<Option<ExitInfo>>>) -> Option<ExitInfo> {
    let Some(mut exit_rx) = exit_rx else {
        return std::future::pending().await;
    };
    exit_rx.wait_for(Option::is_some).await.ok().and_then(|exit| *exit)
}

/// Run the validator in the foreground until Ctrl-C or until it exits
pub async fn start(ctx: Arc<Context>, matches: &ArgMatches) -> Result<()> {
    run_foreground(ctx, start_options(matches), matches.get_one::<u16>("port").copied()).await
}

pub async fn restart(ctx: Arc<Context>, matches: &ArgMatches) -> Result<()> {
    let mut supervisor = ProcessSupervisor::new(ctx.clone(), chain_client(&ctx));
    if supervisor.stop().await? {
        println!("{}", "✓ Previous validator stopped".green());
    }
    drop(supervisor);

    run_foreground(ctx, start_options(matches), matches.get_one::<u16>("port").copied()).await
}

async fn run_foreground(ctx: Arc<Context>, opts: StartOptions, port: Option<u16>) -> Result<()> {
    let service = MonitoringService::new(ctx.clone(), chain_client(&ctx));

    if opts.monitor {
        let port = port.unwrap_or(ctx.config.monitoring.port);
        let addr = service.start(port).await?;
        println!("{} ws://{}", "✓ Monitoring on".green(), addr);
    }

    println!("{}", "Starting validator...".cyan());
    let info = start_with_retry(&service, opts).await?;
    print_started(&info);
    println!();
    println!("{}", "Press Ctrl-C to stop.".dimmed());

    let exit_rx = service.exit_watch().await;
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            println!();
            println!("{}", "Stopping validator...".cyan());
        }
        exit = wait_for_exit(exit_rx) => {
            match exit {
                Some(exit) => println!("{} ({})", "Validator exited".yellow(), exit),
                None => println!("{}", "Validator exited".yellow()),
            }
        }
    }

    service.stop_validator().await?;
    service.stop().await;
    println!("{}", "✓ Validator stopped".green());
    Ok(())
}

/// A stopping owner releases the lock shortly after its validator exits
async fn start_with_retry(service: &MonitoringService, opts: StartOptions) -> Result<StartInfo> {
    let mut attempt = 1;
    loop {
        match service.start_validator(opts.clone()).await {
            Err(ValmonError::Conflict(msg)) if attempt < LOCK_RETRY_ATTEMPTS => {
                log::debug!("Start attempt {} blocked: {}", attempt, msg);
                attempt += 1;
                tokio::time::sleep(LOCK_RETRY_DELAY).await;
            }
            other => return other.map_err(Into::into),
        }
    }
}

pub async fn stop(ctx: Arc<Context>) -> Result<()> {
    let mut supervisor = ProcessSupervisor::new(ctx.clone(), chain_client(&ctx));

    if supervisor.stop().await? {
        println!("{}", "✓ Validator stopped".green());
    } else {
        println!("{}", "No validator is running.".yellow());
    }
    Ok(())
}

pub async fn reset(ctx: Arc<Context>, matches: &ArgMatches) -> Result<()> {
    let hard = matches.get_flag("hard");

    if hard && !matches.get_flag("yes") {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Delete the ledger and all accounts under {}?",
                ctx.paths.root.display()
            ))
            .default(false)
            .interact()?;
        if !confirmed {
            println!("{}", "Reset cancelled.".dimmed());
            return Ok(());
        }
    }

    let mut supervisor = ProcessSupervisor::new(ctx.clone(), chain_client(&ctx));
    supervisor.reset(hard)?;

    println!("{} {}", "✓ Ledger cleared:".green(), ctx.paths.ledger_dir.display());
    if hard {
        println!(
            "{} {}",
            "✓ Accounts cleared:".green(),
            ctx.paths.accounts_dir.display()
        );
    }
    Ok(())
}

pub fn status(ctx: Arc<Context>, matches: &ArgMatches) -> Result<()> {
    let mut supervisor = ProcessSupervisor::new(ctx.clone(), chain_client(&ctx));
    let status = supervisor.get_status();

    if matches.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("{} {}", "Validator:".white().bold(), running_badge(status.running));
    if !status.running {
        return Ok(());
    }

    let thresholds = &ctx.config.performance;
    if let Some(environment) = &status.environment {
        println!("  {} {}", "Environment:".dimmed(), environment.cyan());
    }
    if let Some(pid) = status.pid {
        println!("  {} {}", "PID:".dimmed(), pid);
    }
    if let Some(rpc_url) = &status.rpc_url {
        println!("  {} {}", "RPC:".dimmed(), rpc_url);
    }
    if let Some(start_time) = status.start_time {
        println!("  {} {}", "Started:".dimmed(), format_time(start_time));
    }
    println!("  {} {}", "Uptime:".dimmed(), format_uptime(status.uptime_secs));
    println!(
        "  {} {}",
        "CPU:".dimmed(),
        colored_percent(status.cpu_percent, thresholds.cpu_warning, thresholds.cpu_critical)
    );
    println!("  {} {}", "Memory:".dimmed(), format_mib(status.memory_mb));
    Ok(())
}

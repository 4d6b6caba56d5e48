//! Long-running daemon and its one-shot counterparts.

use std::time::Duration;

use chrono::Utc;
use console::style;
use tokio::sync::watch;
use tracing::info;

use crate::cli::helpers::build_engine;
use crate::config::Settings;
use crate::repository::migrations::run_migrations;
use crate::services::{recover_interrupted_runs, RunOutcome};

/// Migrate, recover, then run the scheduler and digest loops until Ctrl-C.
pub async fn cmd_daemon(settings: &Settings) -> anyhow::Result<()> {
    settings.ensure_directories()?;
    run_migrations(&settings.database_url()).await?;

    let db = settings.create_db_context()?;
    // Before any tick, so no live run can be mistaken for an orphan.
    recover_interrupted_runs(&db, Utc::now()).await?;
    let engine = build_engine(settings, db)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler = engine.scheduler();
    let tick_interval = Duration::from_secs(settings.scheduler.tick_interval_secs.max(1));
    let scheduler_rx = shutdown_rx.clone();
    let mut scheduler_task =
        tokio::spawn(async move { scheduler.run(tick_interval, scheduler_rx).await });

    let digests = engine.digests();
    let poll_interval = Duration::from_secs(settings.digest.poll_interval_secs.max(1));
    let mut digest_task =
        tokio::spawn(async move { digests.run(poll_interval, shutdown_rx).await });

    println!(
        "{} Daemon running (tick every {}s, digests every {}s). Ctrl-C to stop.",
        style("→").cyan(),
        tick_interval.as_secs(),
        poll_interval.as_secs()
    );

    // A loop that ends on its own (a panic) takes the daemon down with it.
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Shutdown requested; waiting for in-flight runs");
            let _ = shutdown_tx.send(true);
            let (scheduler_result, digest_result) = tokio::join!(scheduler_task, digest_task);
            scheduler_result?;
            digest_result?;
        }
        result = &mut scheduler_task => {
            let _ = shutdown_tx.send(true);
            let _ = digest_task.await;
            result?;
            anyhow::bail!("scheduler loop stopped unexpectedly");
        }
        result = &mut digest_task => {
            let _ = shutdown_tx.send(true);
            let _ = scheduler_task.await;
            result?;
            anyhow::bail!("digest loop stopped unexpectedly");
        }
    }

    println!("{} Daemon stopped", style("✓").green());
    Ok(())
}

/// Run one scheduler tick and report it.
pub async fn cmd_tick(settings: &Settings) -> anyhow::Result<()> {
    let engine = build_engine(settings, settings.create_db_context()?)?;
    let report = engine.scheduler().tick(Utc::now()).await?;

    if report.claimed == 0 {
        println!("{} No automations due", style("→").dim());
        return Ok(());
    }
    println!(
        "{} Claimed {}: {} completed, {} failed, {} already running, {} compiled",
        style("✓").green(),
        report.claimed,
        report.completed,
        report.failed,
        report.already_running,
        report.compiled
    );
    println!("  Proposals created: {}", report.proposals_created);
    Ok(())
}

/// Send whatever digests are due now.
pub async fn cmd_digest(settings: &Settings) -> anyhow::Result<()> {
    let engine = build_engine(settings, settings.create_db_context()?)?;
    let report = engine.digests().send_daily_digests(Utc::now()).await?;

    if report.due == 0 {
        println!("{} No digests due", style("→").dim());
        return Ok(());
    }
    println!(
        "{} {} due: {} sent, {} with no activity",
        style("✓").green(),
        report.due,
        report.sent,
        report.empty
    );
    if report.failed_recipients > 0 {
        println!(
            "  {} {} recipient(s) could not be reached",
            style("!").yellow(),
            report.failed_recipients
        );
    }
    Ok(())
}

/// Fail runs left in `running` by a previous process.
pub async fn cmd_recover(settings: &Settings) -> anyhow::Result<()> {
    let db = settings.create_db_context()?;
    let count = recover_interrupted_runs(&db, Utc::now()).await?;
    println!("{} Closed {} interrupted run(s)", style("✓").green(), count);
    Ok(())
}

/// Execute one automation now.
pub async fn cmd_run(settings: &Settings, config_id: &str) -> anyhow::Result<()> {
    let engine = build_engine(settings, settings.create_db_context()?)?;

    match engine.executor().execute_by_id(config_id).await? {
        RunOutcome::Completed {
            run_id,
            counts,
            flags,
        } => {
            println!("{} Run {} done", style("✓").green(), run_id);
            println!("  Prospects found:    {}", counts.prospects_found);
            println!("  Duplicates skipped: {}", counts.duplicates_skipped);
            println!("  Proposals created:  {}", counts.proposals_created);
            if flags.query_updated || flags.prompt_updated {
                println!(
                    "  {} New suggestion recorded; see 'prospector config show {}'",
                    style("→").cyan(),
                    config_id
                );
            }
            if flags.compiled {
                println!(
                    "  {} Compilation target reached",
                    style("!").yellow()
                );
            }
        }
        RunOutcome::AlreadyRunning => {
            println!(
                "{} A run of {} is already in progress",
                style("!").yellow(),
                config_id
            );
        }
        RunOutcome::Compiled { pending } => {
            println!(
                "{} Skipped: {} pending proposal(s) meet the compilation target",
                style("!").yellow(),
                pending
            );
        }
    }
    Ok(())
}

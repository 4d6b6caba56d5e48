//! Run history listing.

use console::style;

use crate::cli::helpers::{format_time, page_offset, truncate};
use crate::config::Settings;
use crate::models::{RunLog, RunStatus};

fn flags(run: &RunLog) -> String {
    let mut out = String::new();
    if run.compiled {
        out.push('C');
    }
    if run.query_updated {
        out.push('Q');
    }
    if run.prompt_updated {
        out.push('P');
    }
    out
}

pub async fn cmd_runs(
    settings: &Settings,
    config_id: Option<&str>,
    page: u32,
    per_page: u32,
) -> anyhow::Result<()> {
    let per_page = per_page.max(1);
    let run_logs = settings.create_db_context()?.run_logs();
    let total = run_logs.count(config_id).await?;
    let runs = run_logs
        .list(config_id, i64::from(per_page), page_offset(page, per_page))
        .await?;

    if runs.is_empty() {
        println!("{} No runs", style("!").yellow());
        return Ok(());
    }

    println!(
        "\n{} (page {} of {})",
        style("Runs").bold(),
        page.max(1),
        (total + i64::from(per_page) - 1) / i64::from(per_page)
    );
    println!("{}", "-".repeat(100));
    println!(
        "{:<16} {:<8} {:>5} {:>5} {:>5} {:<4} {:<8} Query",
        "Started", "Status", "Found", "Dup", "New", "Flag", "Took"
    );
    println!("{}", "-".repeat(100));

    for run in &runs {
        let status = match run.status {
            RunStatus::Done => style(run.status.as_str()).green(),
            RunStatus::Running => style(run.status.as_str()).cyan(),
            RunStatus::Failed => style(run.status.as_str()).red(),
        };
        let took = run
            .duration()
            .map(|d| format!("{}s", d.num_seconds()))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<16} {:<8} {:>5} {:>5} {:>5} {:<4} {:<8} {}",
            format_time(Some(run.started_at)),
            status,
            run.prospects_found,
            run.duplicates_skipped,
            run.proposals_created,
            flags(run),
            took,
            truncate(&run.executed_query, 40)
        );
        if let Some(error) = &run.error_message {
            println!("  {} {}", style("✗").red(), error);
        }
    }
    println!("\nFlags: C compiled, Q query suggestion, P prompt suggestion");
    Ok(())
}

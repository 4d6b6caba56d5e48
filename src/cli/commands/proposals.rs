//! Proposal review and applier feedback commands.

use console::style;

use crate::cli::helpers::{build_engine, format_time, page_offset, truncate};
use crate::config::Settings;
use crate::models::{Proposal, ProposalOperation, ProposalStatus};
use crate::repository::ProposalFilter;
use crate::services::ReviewService;

fn review_service(settings: &Settings) -> anyhow::Result<std::sync::Arc<ReviewService>> {
    Ok(build_engine(settings, settings.create_db_context()?)?.review())
}

fn parse_payload(raw: &str) -> anyhow::Result<serde_json::Value> {
    serde_json::from_str(raw).map_err(|e| anyhow::anyhow!("invalid JSON payload: {}", e))
}

fn styled_status(status: ProposalStatus) -> console::StyledObject<&'static str> {
    let s = style(status.as_str());
    match status {
        ProposalStatus::Pending => s.cyan(),
        ProposalStatus::Approved => s.green(),
        ProposalStatus::Rejected => s.dim(),
        ProposalStatus::Executed => s.green().bold(),
        ProposalStatus::Failed => s.red(),
    }
}

/// One-line label for a proposal: the lead title when there is one.
fn label(proposal: &Proposal) -> String {
    proposal
        .payload
        .get("title")
        .and_then(|v| v.as_str())
        .map(String::from)
        .unwrap_or_else(|| {
            format!(
                "{} {}{}",
                proposal.operation.as_str(),
                proposal.entity_type,
                proposal
                    .entity_id
                    .map(|id| format!(" #{}", id))
                    .unwrap_or_default()
            )
        })
}

fn print_summary(verb: &str, proposal: &Proposal) {
    println!(
        "{} {} {} ({})",
        style("✓").green(),
        verb,
        proposal.id,
        styled_status(proposal.status)
    );
}

pub async fn cmd_proposals_list(
    settings: &Settings,
    status: Option<&str>,
    automation_config_id: Option<String>,
    tenant_id: Option<String>,
    page: u32,
    per_page: u32,
) -> anyhow::Result<()> {
    let status = status
        .map(|s| {
            ProposalStatus::from_str(s).ok_or_else(|| anyhow::anyhow!("unknown status '{}'", s))
        })
        .transpose()?;
    let filter = ProposalFilter {
        tenant_id,
        status,
        automation_config_id,
    };
    let per_page = per_page.max(1);

    let proposals = settings
        .create_db_context()?
        .proposals()
        .list(&filter, i64::from(per_page), page_offset(page, per_page))
        .await?;

    if proposals.is_empty() {
        println!("{} No proposals", style("!").yellow());
        return Ok(());
    }

    println!("\n{} (page {})", style("Proposals").bold(), page.max(1));
    println!("{}", "-".repeat(100));
    println!(
        "{:<36} {:<9} {:<10} {:<16} Summary",
        "ID", "Status", "Source", "Created"
    );
    println!("{}", "-".repeat(100));
    for proposal in &proposals {
        let invalid = if proposal.is_valid() { "" } else { " (invalid)" };
        println!(
            "{:<36} {:<9} {:<10} {:<16} {}{}",
            proposal.id,
            styled_status(proposal.status),
            proposal.source.as_str(),
            format_time(Some(proposal.created_at)),
            truncate(&label(proposal), 40),
            invalid
        );
    }
    Ok(())
}

pub async fn cmd_proposal_show(settings: &Settings, id: &str) -> anyhow::Result<()> {
    let proposal = settings
        .create_db_context()?
        .proposals()
        .get(id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Proposal '{}' not found", id))?;

    println!("\n{} {}", style(label(&proposal)).bold(), style(&proposal.id).dim());
    println!("{}", "-".repeat(60));
    println!("  Status:        {}", styled_status(proposal.status));
    println!("  Tenant:        {}", proposal.tenant_id);
    println!(
        "  Operation:     {} {}{}",
        proposal.operation.as_str(),
        proposal.entity_type,
        proposal
            .entity_id
            .map(|id| format!(" #{}", id))
            .unwrap_or_default()
    );
    println!(
        "  Proposed by:   {} ({})",
        proposal.proposed_by,
        proposal.source.as_str()
    );
    if let Some(config_id) = &proposal.automation_config_id {
        println!("  Automation:    {}", config_id);
    }
    println!("  Created:       {}", format_time(Some(proposal.created_at)));
    if let Some(reviewer) = &proposal.reviewed_by {
        println!(
            "  Reviewed:      {} by {}",
            format_time(proposal.reviewed_at),
            reviewer
        );
    }
    if proposal.executed_at.is_some() {
        println!("  Executed:      {}", format_time(proposal.executed_at));
    }
    if let Some(error) = &proposal.error_message {
        println!("  {} {}", style("Error:").red(), error);
    }
    for error in &proposal.validation_errors {
        println!("  {} {}", style("Invalid:").yellow(), error);
    }

    println!("\n{}", serde_json::to_string_pretty(&proposal.payload)?);
    Ok(())
}

pub async fn cmd_proposal_add(
    settings: &Settings,
    tenant_id: &str,
    proposed_by: &str,
    entity_type: &str,
    entity_id: Option<i64>,
    operation: &str,
    payload: &str,
) -> anyhow::Result<()> {
    let operation = ProposalOperation::from_str(operation)
        .ok_or_else(|| anyhow::anyhow!("unknown operation '{}'", operation))?;
    let proposal = review_service(settings)?
        .create_manual(
            tenant_id,
            proposed_by,
            entity_type,
            entity_id,
            operation,
            parse_payload(payload)?,
        )
        .await?;

    print_summary("Recorded", &proposal);
    for error in &proposal.validation_errors {
        println!("  {} {}", style("Invalid:").yellow(), error);
    }
    Ok(())
}

pub async fn cmd_proposal_review(
    settings: &Settings,
    id: &str,
    reviewer: &str,
    approve: bool,
) -> anyhow::Result<()> {
    let review = review_service(settings)?;
    let proposal = if approve {
        review.approve(id, reviewer).await?
    } else {
        review.reject(id, reviewer).await?
    };
    print_summary(if approve { "Approved" } else { "Rejected" }, &proposal);
    Ok(())
}

pub async fn cmd_proposal_edit(settings: &Settings, id: &str, payload: &str) -> anyhow::Result<()> {
    let proposal = review_service(settings)?
        .edit_payload(id, parse_payload(payload)?)
        .await?;
    print_summary("Edited", &proposal);
    for error in &proposal.validation_errors {
        println!("  {} {}", style("Invalid:").yellow(), error);
    }
    Ok(())
}

/// Record what the applier did with an approved proposal.
pub async fn cmd_proposal_feedback(
    settings: &Settings,
    id: &str,
    error: Option<&str>,
) -> anyhow::Result<()> {
    let review = review_service(settings)?;
    let proposal = match error {
        None => review.mark_executed(id).await?,
        Some(message) => review.mark_failed(id, message).await?,
    };
    print_summary("Recorded", &proposal);
    Ok(())
}

pub async fn cmd_proposal_resubmit(settings: &Settings, id: &str) -> anyhow::Result<()> {
    let copy = review_service(settings)?.resubmit(id).await?;
    println!(
        "{} Resubmitted {} as {}",
        style("✓").green(),
        id,
        copy.id
    );
    Ok(())
}

//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod automation;
mod daemon;
mod init;
mod proposals;
mod runs;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Settings;

#[derive(Parser)]
#[command(name = "prospector")]
#[command(about = "Scheduled lead-sourcing automations with human-reviewed proposals")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Create the data directory and apply database migrations
    Init,

    /// Run the scheduler and digest loops until interrupted
    Daemon,

    /// Claim and execute every due automation once
    Tick,

    /// Send any digests due now
    Digest,

    /// Fail runs left open by a crash or restart
    Recover,

    /// Execute one automation now, ignoring its schedule
    Run {
        /// Automation config ID
        config_id: String,
    },

    /// Manage automation configs
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// List run history, newest first
    Runs {
        /// Only runs of this config
        #[arg(long)]
        config: Option<String>,
        #[arg(short, long, default_value = "1")]
        page: u32,
        #[arg(long, default_value = "20")]
        per_page: u32,
    },

    /// Review proposals and record applier feedback
    Proposals {
        #[command(subcommand)]
        command: ProposalCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Create an automation
    Add {
        /// Display name
        name: String,
        /// Search query the automation runs
        #[arg(short, long)]
        query: String,
        #[arg(long, default_value = "default")]
        tenant: String,
        /// Owner recorded on the config
        #[arg(long, env = "USER", default_value = "operator")]
        owner: String,
        /// Seconds between runs
        #[arg(short, long, default_value = "3600")]
        interval: i64,
        /// System prompt for the agent
        #[arg(long)]
        prompt: Option<String>,
        /// Extra settings as key=value (repeatable)
        #[arg(short, long = "set")]
        settings: Vec<String>,
    },
    /// List automations
    List {
        #[arg(long)]
        tenant: Option<String>,
    },
    /// Show one automation in full
    Show { id: String },
    /// Change settings as key=value pairs
    Set {
        id: String,
        #[arg(required = true)]
        settings: Vec<String>,
    },
    /// Delete an automation and its run history
    Delete {
        id: String,
        /// Skip the confirmation prompt
        #[arg(short = 'y', long)]
        confirm: bool,
    },
    /// Enable an automation
    Enable { id: String },
    /// Disable an automation
    Disable { id: String },
    /// Adopt the pending query/prompt suggestion
    AcceptSuggestion { id: String },
    /// Discard the pending suggestion
    RejectSuggestion { id: String },
}

#[derive(Subcommand)]
enum ProposalCommands {
    /// List proposals, newest first
    List {
        /// pending, approved, rejected, executed or failed
        #[arg(short, long)]
        status: Option<String>,
        /// Only proposals from this automation
        #[arg(long)]
        config: Option<String>,
        #[arg(long)]
        tenant: Option<String>,
        #[arg(short, long, default_value = "1")]
        page: u32,
        #[arg(long, default_value = "20")]
        per_page: u32,
    },
    /// Show one proposal with its payload
    Show { id: String },
    /// Record a proposal by hand
    Add {
        /// Target entity type (e.g. lead, deal)
        entity_type: String,
        /// create, update or delete
        operation: String,
        /// JSON object payload
        payload: String,
        /// Target entity ID (required for update and delete)
        #[arg(long)]
        entity_id: Option<i64>,
        #[arg(long, default_value = "default")]
        tenant: String,
        #[arg(long, env = "USER", default_value = "operator")]
        by: String,
    },
    /// Approve a pending proposal
    Approve {
        id: String,
        #[arg(long, env = "USER", default_value = "operator")]
        by: String,
    },
    /// Reject a pending proposal
    Reject {
        id: String,
        #[arg(long, env = "USER", default_value = "operator")]
        by: String,
    },
    /// Replace a pending proposal's payload
    Edit {
        id: String,
        /// JSON object payload
        payload: String,
    },
    /// Mark an approved proposal as applied
    Executed { id: String },
    /// Mark an approved proposal as failed to apply
    Failed { id: String, message: String },
    /// Queue a failed proposal again as a new pending copy
    Resubmit { id: String },
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).await?;

    match cli.command {
        Commands::Init => init::cmd_init(&settings).await,
        Commands::Daemon => daemon::cmd_daemon(&settings).await,
        Commands::Tick => daemon::cmd_tick(&settings).await,
        Commands::Digest => daemon::cmd_digest(&settings).await,
        Commands::Recover => daemon::cmd_recover(&settings).await,
        Commands::Run { config_id } => daemon::cmd_run(&settings, &config_id).await,
        Commands::Config { command } => match command {
            ConfigCommands::Add {
                name,
                query,
                tenant,
                owner,
                interval,
                prompt,
                settings: pairs,
            } => {
                automation::cmd_config_add(
                    &settings,
                    automation::NewAutomation {
                        name,
                        query,
                        tenant,
                        owner,
                        interval,
                        prompt,
                        settings: pairs,
                    },
                )
                .await
            }
            ConfigCommands::List { tenant } => {
                automation::cmd_config_list(&settings, tenant.as_deref()).await
            }
            ConfigCommands::Show { id } => automation::cmd_config_show(&settings, &id).await,
            ConfigCommands::Set { id, settings: pairs } => {
                automation::cmd_config_set(&settings, &id, &pairs).await
            }
            ConfigCommands::Delete { id, confirm } => {
                automation::cmd_config_delete(&settings, &id, confirm).await
            }
            ConfigCommands::Enable { id } => {
                automation::cmd_config_enable(&settings, &id, true).await
            }
            ConfigCommands::Disable { id } => {
                automation::cmd_config_enable(&settings, &id, false).await
            }
            ConfigCommands::AcceptSuggestion { id } => {
                automation::cmd_config_suggestion(&settings, &id, true).await
            }
            ConfigCommands::RejectSuggestion { id } => {
                automation::cmd_config_suggestion(&settings, &id, false).await
            }
        },
        Commands::Runs {
            config,
            page,
            per_page,
        } => runs::cmd_runs(&settings, config.as_deref(), page, per_page).await,
        Commands::Proposals { command } => match command {
            ProposalCommands::List {
                status,
                config,
                tenant,
                page,
                per_page,
            } => {
                proposals::cmd_proposals_list(
                    &settings,
                    status.as_deref(),
                    config,
                    tenant,
                    page,
                    per_page,
                )
                .await
            }
            ProposalCommands::Show { id } => proposals::cmd_proposal_show(&settings, &id).await,
            ProposalCommands::Add {
                entity_type,
                operation,
                payload,
                entity_id,
                tenant,
                by,
            } => {
                proposals::cmd_proposal_add(
                    &settings,
                    &tenant,
                    &by,
                    &entity_type,
                    entity_id,
                    &operation,
                    &payload,
                )
                .await
            }
            ProposalCommands::Approve { id, by } => {
                proposals::cmd_proposal_review(&settings, &id, &by, true).await
            }
            ProposalCommands::Reject { id, by } => {
                proposals::cmd_proposal_review(&settings, &id, &by, false).await
            }
            ProposalCommands::Edit { id, payload } => {
                proposals::cmd_proposal_edit(&settings, &id, &payload).await
            }
            ProposalCommands::Executed { id } => {
                proposals::cmd_proposal_feedback(&settings, &id, None).await
            }
            ProposalCommands::Failed { id, message } => {
                proposals::cmd_proposal_feedback(&settings, &id, Some(&message)).await
            }
            ProposalCommands::Resubmit { id } => {
                proposals::cmd_proposal_resubmit(&settings, &id).await
            }
        },
    }
}

//! Automation config management commands.

use std::io::{self, Write};

use chrono::Utc;
use console::style;

use crate::cli::helpers::{format_time, parse_assignment, truncate};
use crate::config::Settings;
use crate::models::AutomationConfig;

/// Arguments for `config add`.
pub struct NewAutomation {
    pub name: String,
    pub query: String,
    pub tenant: String,
    pub owner: String,
    pub interval: i64,
    pub prompt: Option<String>,
    pub settings: Vec<String>,
}

fn apply_all(config: &mut AutomationConfig, pairs: &[String]) -> anyhow::Result<()> {
    for pair in pairs {
        let (key, value) = parse_assignment(pair)?;
        config
            .apply_setting(key, value)
            .map_err(|e| anyhow::anyhow!("{}: {}", key, e))?;
    }
    Ok(())
}

async fn load(settings: &Settings, id: &str) -> anyhow::Result<AutomationConfig> {
    settings
        .create_db_context()?
        .automations()
        .get(id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Automation '{}' not found", id))
}

pub async fn cmd_config_add(settings: &Settings, new: NewAutomation) -> anyhow::Result<()> {
    let mut config = AutomationConfig::new(&new.tenant, &new.owner, &new.name, &new.query);
    config
        .apply_setting("interval", &new.interval.to_string())
        .map_err(|e| anyhow::anyhow!(e))?;
    if let Some(prompt) = new.prompt {
        config.system_prompt = prompt;
    }
    apply_all(&mut config, &new.settings)?;

    settings
        .create_db_context()?
        .automations()
        .create(&config)
        .await?;

    println!(
        "{} Created automation {} ({})",
        style("✓").green(),
        style(&config.name).bold(),
        config.id
    );
    println!("  First run at the next scheduler tick");
    Ok(())
}

pub async fn cmd_config_list(settings: &Settings, tenant: Option<&str>) -> anyhow::Result<()> {
    let configs = settings
        .create_db_context()?
        .automations()
        .list(tenant)
        .await?;

    if configs.is_empty() {
        println!(
            "{} No automations. Create one with 'prospector config add'.",
            style("!").yellow()
        );
        return Ok(());
    }

    println!("\n{}", style("Automations").bold());
    println!("{}", "-".repeat(100));
    println!(
        "{:<36} {:<22} {:<8} {:>6} {:<16} {:<16}",
        "ID", "Name", "State", "Runs", "Last Run", "Next Run"
    );
    println!("{}", "-".repeat(100));

    for config in configs {
        let state = if !config.enabled {
            style("off").dim()
        } else if config.compiled_at.is_some() {
            style("compiled").yellow()
        } else {
            style("on").green()
        };
        let marker = if config.has_pending_suggestion() { "*" } else { "" };
        println!(
            "{:<36} {:<22} {:<8} {:>6} {:<16} {:<16}",
            config.id,
            truncate(&format!("{}{}", config.name, marker), 22),
            state,
            config.run_count,
            format_time(config.last_run_at),
            format_time(config.next_run_at),
        );
    }
    println!("\n* pending suggestion");
    Ok(())
}

pub async fn cmd_config_show(settings: &Settings, id: &str) -> anyhow::Result<()> {
    let config = load(settings, id).await?;
    let db = settings.create_db_context()?;
    let pending = db.proposals().count_pending_for_config(id).await?;

    println!("\n{} {}", style(&config.name).bold(), style(&config.id).dim());
    println!("{}", "-".repeat(60));
    println!("  Tenant / owner:    {} / {}", config.tenant_id, config.owner_id);
    println!("  Entity type:       {}", config.entity_type);
    println!("  Enabled:           {}", config.enabled);
    println!("  Interval:          {}s", config.interval_secs);
    println!("  Last run:          {}", format_time(config.last_run_at));
    println!("  Next run:          {}", format_time(config.next_run_at));
    println!("  Runs:              {}", config.run_count);
    println!(
        "  Empty runs:        {} (limit {})",
        config.consecutive_zero_runs, config.empty_run_limit
    );

    println!("\n{}", style("Search").bold());
    println!("  Query:             {}", config.search_query);
    if !config.search_filters.is_empty() {
        println!(
            "  Filters:           {}",
            serde_json::Value::Object(config.search_filters.clone())
        );
    }
    println!("  Active query:      {}", config.active_query());
    println!("  Prompt:            {}", truncate(&config.system_prompt, 80));

    println!("\n{}", style("Suggestions").bold());
    match (&config.suggested_query, &config.suggested_prompt) {
        (None, None) => println!("  None pending"),
        (query, prompt) => {
            if let Some(query) = query {
                println!(
                    "  Query:             {} {}",
                    query,
                    if config.use_suggested_query { "(in use)" } else { "" }
                );
            }
            if let Some(prompt) = prompt {
                println!(
                    "  Prompt:            {} {}",
                    truncate(prompt, 80),
                    if config.use_suggested_prompt { "(in use)" } else { "" }
                );
            }
            if let Some(reason) = &config.suggestion_reason {
                println!("  Reason:            {}", reason);
            }
        }
    }
    println!(
        "  Threshold {} / cooldown {} runs, {} prospects / auto-accept {}",
        config.suggestion_threshold,
        config.prompt_cooldown_runs,
        config.prompt_cooldown_prospects,
        config.auto_accept_suggestions
    );

    println!("\n{}", style("Compilation").bold());
    if config.has_compilation_target() {
        println!(
            "  Pending {} of target {}{}",
            pending,
            config.compilation_target,
            if config.disable_on_compiled { " (disables when reached)" } else { "" }
        );
        println!("  Compiled at:       {}", format_time(config.compiled_at));
    } else {
        println!("  No target ({} pending)", pending);
    }

    println!("\n{}", style("Digest").bold());
    if config.digest_enabled {
        println!(
            "  {} UTC{:+}min to {}",
            config.digest_time.format("%H:%M"),
            config.digest_utc_offset_minutes,
            if config.digest_recipients.is_empty() {
                "(no recipients)".to_string()
            } else {
                config.digest_recipients.join(", ")
            }
        );
        println!("  Last sent:         {}", format_time(config.last_digest_at));
    } else {
        println!("  Disabled");
    }
    Ok(())
}

pub async fn cmd_config_set(settings: &Settings, id: &str, pairs: &[String]) -> anyhow::Result<()> {
    let mut config = load(settings, id).await?;
    apply_all(&mut config, pairs)?;

    if !settings
        .create_db_context()?
        .automations()
        .update_settings(&config)
        .await?
    {
        anyhow::bail!("Automation '{}' disappeared while updating", id);
    }
    println!(
        "{} Updated {} setting(s) on {}",
        style("✓").green(),
        pairs.len(),
        config.name
    );
    Ok(())
}

pub async fn cmd_config_delete(settings: &Settings, id: &str, confirm: bool) -> anyhow::Result<()> {
    let config = load(settings, id).await?;
    let db = settings.create_db_context()?;
    let runs = db.run_logs().count(Some(id)).await?;

    if !confirm {
        print!(
            "Delete '{}' and {} run log(s)? Proposals are kept. [y/N] ",
            config.name, runs
        );
        io::stdout().flush()?;
        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        if !input.trim().eq_ignore_ascii_case("y") {
            println!("{} Cancelled", style("!").yellow());
            return Ok(());
        }
    }

    db.automations().delete(id).await?;
    println!("{} Deleted {}", style("✓").green(), config.name);
    Ok(())
}

pub async fn cmd_config_enable(settings: &Settings, id: &str, enabled: bool) -> anyhow::Result<()> {
    let db = settings.create_db_context()?;
    if !db.automations().set_enabled(id, enabled).await? {
        anyhow::bail!("Automation '{}' not found", id);
    }
    println!(
        "{} {} {}",
        style("✓").green(),
        if enabled { "Enabled" } else { "Disabled" },
        id
    );
    Ok(())
}

pub async fn cmd_config_suggestion(settings: &Settings, id: &str, accept: bool) -> anyhow::Result<()> {
    let config = load(settings, id).await?;
    let automations = settings.create_db_context()?.automations();

    let changed = if accept {
        automations.accept_suggestion(id, Utc::now()).await?
    } else {
        automations.reject_suggestion(id).await?
    };

    if !changed {
        println!("{} No pending suggestion on {}", style("!").yellow(), config.name);
    } else if accept {
        println!("{} Suggestion adopted on {}", style("✓").green(), config.name);
    } else {
        println!("{} Suggestion discarded on {}", style("✓").green(), config.name);
    }
    Ok(())
}

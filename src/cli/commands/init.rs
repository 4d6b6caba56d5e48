//! Initialize command.

use console::style;

use crate::config::Settings;
use crate::repository::migrations::run_migrations;
use crate::repository::util::redact_url_password;

/// Create the data directory and bring the schema up to date.
pub async fn cmd_init(settings: &Settings) -> anyhow::Result<()> {
    settings.ensure_directories()?;

    let url = settings.database_url();
    let applied = run_migrations(&url).await?;
    for name in &applied {
        println!("  {} Applied migration: {}", style("✓").green(), name);
    }
    if applied.is_empty() {
        println!("  {} Schema already up to date", style("→").dim());
    }

    println!(
        "{} Initialized prospector at {}",
        style("✓").green(),
        redact_url_password(&url)
    );
    Ok(())
}

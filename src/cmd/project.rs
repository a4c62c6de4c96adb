//! Project setup command: `chatops init`.

use anyhow::Result;
use console::style;
use std::path::Path;

pub fn cmd_init(project_dir: &Path, force: bool) -> Result<()> {
    use chatops::init::{init_project, is_initialized};
    use chatops::ui::icons::SPARKLE;
    use dialoguer::Confirm;

    let overwrite = if force {
        true
    } else if is_initialized(project_dir) && console::user_attended() {
        Confirm::new()
            .with_prompt("chatops.toml already exists. Overwrite it with defaults?")
            .default(false)
            .interact()
            .unwrap_or(false)
    } else {
        false
    };

    let result = init_project(project_dir, overwrite)?;
    if !result.wrote_config {
        println!(
            "chatops already initialized at {}",
            result.config_path.display()
        );
        println!("Use --force to overwrite it with defaults.");
        return Ok(());
    }

    println!(
        "{}Initialized chatops in {}",
        SPARKLE,
        result.chatops_dir.display()
    );
    println!();
    println!("Next steps:");
    println!(
        "  1. Edit {} (services, GitHub repository)",
        style(result.config_path.display()).cyan()
    );
    println!(
        "  2. Put {} and {} in .env to enable the classifier and remote execution",
        style("HF_API_TOKEN").yellow(),
        style("GITHUB_TOKEN").yellow()
    );
    println!("  3. Run {}", style("chatops serve").cyan());
    Ok(())
}

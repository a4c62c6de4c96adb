//! Server command: `chatops serve`.

use anyhow::Result;
use chatops::config::ChatopsConfig;
use console::style;

pub async fn cmd_serve(config: &ChatopsConfig) -> Result<()> {
    if config.server.dev_mode {
        println!(
            "{} CORS is permissive and the server listens on all interfaces",
            style("dev mode:").yellow().bold()
        );
    }
    println!(
        "Serving on port {} (job database: {})",
        style(config.server.port).cyan(),
        config.server.db_path.display()
    );
    chatops::server::start_server(config).await
}

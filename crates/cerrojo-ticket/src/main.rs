//! Entry point of the ticket selling demo.

use cerrojo_common::Configuration;
use cerrojo_ticket::{Cli, LoggingConfig, init_logging, seller};
use clap::Parser;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let configuration = Configuration::load(cli.config.as_deref(), cli.overrides())?;

    let _logging_guard = init_logging(&LoggingConfig::from_configuration(&configuration))?;
    cerrojo_lock::metrics::describe_lock_metrics();

    let summary = seller::run(&cli.sale_plan(), &configuration).await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        for window in &summary.windows {
            info!(
                window = %window.window,
                sold = window.sold,
                busy = window.busy,
                sessions = window.sessions,
                "Window summary"
            );
        }
        info!(
            sold = summary.sold,
            remaining = summary.remaining,
            residual_nodes = summary.residual_nodes,
            "Sale finished"
        );
    }

    if summary.double_sold > 0 {
        error!(double_sold = summary.double_sold, "Tickets were sold more than once");
        anyhow::bail!("{} tickets sold more than once", summary.double_sold);
    }
    Ok(())
}

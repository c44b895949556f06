//! kbharvest CLI: harvest knowledge-base articles into Markdown.
//!
//! Discovers articles by crawling list pages or querying a record store,
//! writes one Markdown file per article plus a JSON manifest, and merges
//! harvested articles into a single AI-ready document.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;
use kbharvest_shared::HarvestError;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);

    if let Err(report) = commands::run(cli).await {
        // Harvest failures exit with their category's status code.
        if let Some(err) = report.downcast_ref::<HarvestError>() {
            eprintln!("Error: {report:?}");
            std::process::exit(err.kind().exit_code());
        }
        return Err(report);
    }
    Ok(())
}

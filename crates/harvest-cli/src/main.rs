use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "harvest")]
#[command(about = "Storefront listing harvester")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Download the paginated listing index
    Pages,
    /// Extract listing records from downloaded index pages
    Listings,
    /// Collect app identifiers from the listing records
    Ids,
    /// Download every app's detail page
    Details,
    /// Run all stages in order
    All,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let pipeline = harvest_sync::pipeline_from_env()?;

    match cli.command.unwrap_or(Commands::All) {
        Commands::Pages => {
            let summary = pipeline.fetch_pages().await?;
            println!(
                "pages complete: saved={} dir={}",
                summary.pages_saved, summary.output_dir
            );
        }
        Commands::Listings => {
            let summary = pipeline.extract_listings().await?;
            println!(
                "listings complete: files={} failed_files={} records={} output={}",
                summary.files_scanned, summary.files_failed, summary.records, summary.output_file
            );
        }
        Commands::Ids => {
            let summary = pipeline.harvest_ids().await?;
            println!(
                "ids complete: records={} ids={} output={}",
                summary.records_read, summary.ids_written, summary.output_file
            );
        }
        Commands::Details => {
            let summary = pipeline.fetch_details().await?;
            println!(
                "details complete: total={} saved={} failed={} dir={}",
                summary.total,
                summary.succeeded,
                summary.failures.len(),
                summary.output_dir
            );
        }
        Commands::All => {
            let summary = pipeline.run_all().await?;
            println!(
                "harvest complete: pages={} records={} ids={} details_saved={} details_failed={}",
                summary.pages.pages_saved,
                summary.extraction.records,
                summary.ids.ids_written,
                summary.details.succeeded,
                summary.details.failures.len()
            );
        }
    }

    Ok(())
}

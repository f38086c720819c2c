use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use evhub_adapters::normalize::title_case_word;
use evhub_adapters::ProviderKind;
use evhub_core::IngestionReport;
use evhub_storage::PgEventStore;
use evhub_sync::{build_provider, run_ingestion, SyncConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "evhub")]
#[command(about = "Event Hub ingestion command-line interface")]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    ingest: IngestArgs,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Pull events from a provider into the event store (default).
    Ingest(IngestArgs),
    /// Apply pending database migrations.
    Migrate,
    /// Serve the JSON listing API.
    Serve,
}

#[derive(Debug, Args)]
struct IngestArgs {
    /// Provider to ingest from: fixtures, google or apify_facebook.
    #[arg(long, env = "EVENT_PROVIDER", default_value = "fixtures")]
    source: ProviderKind,

    /// Restrict ingestion to a city. Repeatable.
    #[arg(long = "city", value_name = "CITY")]
    cities: Vec<String>,

    /// Print the full report as JSON instead of the summary line.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("evhub=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Ingest(cli.ingest)) {
        Commands::Ingest(args) => ingest(args).await?,
        Commands::Migrate => {
            let config = SyncConfig::from_env();
            let store = PgEventStore::connect(&config.database_url).await?;
            store.migrate().await?;
            println!("migrations applied");
        }
        Commands::Serve => evhub_web::serve_from_env().await?,
    }

    Ok(())
}

async fn ingest(args: IngestArgs) -> Result<()> {
    let config = SyncConfig::from_env();
    let cities = evhub_adapters::clean_cities(args.cities.as_slice());
    let provider = build_provider(args.source, &config, &cities)?;
    let store = PgEventStore::connect(&config.database_url).await?;

    let mut allowed = cities.iter().map(|c| title_case(c)).collect::<Vec<_>>();
    allowed.sort();
    allowed.dedup();
    let allowlist = (!allowed.is_empty()).then_some(allowed.as_slice());

    info!(source = %args.source, cities = ?allowed, "starting ingestion");
    let report = run_ingestion(&store, provider.as_ref(), allowlist).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report, &allowed);
    }
    Ok(())
}

fn print_summary(report: &IngestionReport, allowed: &[String]) {
    println!(
        "Created: {}, Updated: {}, Skipped: {}, Errors: {}",
        report.created,
        report.updated,
        report.skipped,
        report.errors.len()
    );
    if !allowed.is_empty() {
        println!("Cities processed: {}", allowed.join(", "));
    }
    for error in &report.errors {
        eprintln!("{error}");
    }
}

fn title_case(city: &str) -> String {
    city.split_whitespace()
        .map(title_case_word)
        .collect::<Vec<_>>()
        .join(" ")
}

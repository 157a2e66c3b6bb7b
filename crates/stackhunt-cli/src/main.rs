use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use stackhunt_client::discovery::DEFAULT_DEBUG_PORT;
use stackhunt_client::{BuiltWithParser, CdpSessionProvider, DebuggerEndpoint, ListingExtractor};
use stackhunt_core::config::{
    DEFAULT_INSPECTION_URL, DEFAULT_LISTING_BASE_URL, DEFAULT_REPLAY_TARGET_URL,
    DEFAULT_TRACKING_SUFFIX,
};
use stackhunt_core::traits::{BrowserSession, SessionProvider};
use stackhunt_core::{
    AppError, Environment, ExtractionPolicy, JsonStore, LinkResolver, ListingScraper,
    PipelineConfig, Record, ReplayEntry, ReplayPipeline, RetryPolicy, SessionMode, StageReport,
    TechnologyClassifier, TracingReporter,
};

#[derive(Parser)]
#[command(
    name = "stackhunt",
    version,
    about = "Scrape product launches, resolve their websites and classify their tech stacks"
)]
struct Cli {
    /// Run environment: `test` caps scrolling and shows the browser
    #[arg(long, global = true, env = "STACKHUNT_ENV", default_value = "test")]
    env: Environment,

    /// Host of the browser's remote debugging interface
    #[arg(long, global = true, env = "STACKHUNT_DEBUG_HOST", default_value = "localhost")]
    debug_host: String,

    /// Port of the browser's remote debugging interface
    #[arg(long, global = true, env = "STACKHUNT_DEBUG_PORT", default_value_t = DEFAULT_DEBUG_PORT)]
    debug_port: u16,

    /// Abort on the first malformed listing entry instead of skipping it
    #[arg(long, global = true, default_value_t = false)]
    strict: bool,

    /// Leave browser automation markers visible to pages
    #[arg(long, global = true, env = "STACKHUNT_NO_STEALTH", default_value_t = false)]
    no_stealth: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape a listing page into the listing document
    Scrape {
        /// Listing page to scrape
        #[arg(short, long)]
        url: String,

        /// Listing document
        #[arg(short, long, env = "STACKHUNT_DATA", default_value = "data.json")]
        data: PathBuf,
    },

    /// Resolve each record's outbound website link
    Resolve {
        /// Listing document
        #[arg(short, long, env = "STACKHUNT_DATA", default_value = "data.json")]
        data: PathBuf,

        /// Base URL detail-page links are relative to
        #[arg(long, default_value = DEFAULT_LISTING_BASE_URL)]
        base_url: String,

        /// Leave records that previously failed to resolve alone
        #[arg(long, default_value_t = false)]
        skip_unresolved: bool,
    },

    /// Classify resolved websites through a signed-in inspection service
    Classify {
        /// Listing document
        #[arg(short, long, env = "STACKHUNT_DATA", default_value = "data.json")]
        data: PathBuf,

        /// Inspection service landing page
        #[arg(long, default_value = DEFAULT_INSPECTION_URL)]
        service_url: String,

        /// Tracking suffix stripped from links before lookup
        #[arg(long, default_value = DEFAULT_TRACKING_SUFFIX)]
        tracking_suffix: String,
    },

    /// Regenerate tracking links for a list of {old, origin} pairs
    Replay {
        /// Input document of {old, origin} pairs
        #[arg(short, long)]
        input: PathBuf,

        /// Document regenerated links are appended to
        #[arg(short, long, default_value = "output.json")]
        output: PathBuf,

        /// Document failed entries are appended to
        #[arg(short, long, default_value = "failed.json")]
        failed: PathBuf,

        /// Link-generation form
        #[arg(long, env = "STACKHUNT_REPLAY_URL", default_value = DEFAULT_REPLAY_TARGET_URL)]
        target_url: String,
    },

    /// Scrape, resolve and classify in one go
    All {
        /// Listing page to scrape
        #[arg(short, long)]
        url: String,

        /// Listing document
        #[arg(short, long, env = "STACKHUNT_DATA", default_value = "data.json")]
        data: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("stackhunt=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        if let Some(help) = e.downcast_ref::<AppError>().and_then(AppError::remediation) {
            eprintln!("{help}");
        }
        return Err(e);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = PipelineConfig::for_environment(cli.env);
    if cli.strict {
        config = config.with_extraction_policy(ExtractionPolicy::Abort);
    }
    if cli.no_stealth {
        config = config.with_stealth(false);
    }
    tracing::info!(
        env = %cli.env,
        headless = config.headless,
        stealth = config.stealth,
        "Starting"
    );

    let endpoint = DebuggerEndpoint::new(cli.debug_host, cli.debug_port)?;
    let provider = CdpSessionProvider::new(&config, endpoint);

    match cli.command {
        Commands::Scrape { url, data } => {
            cmd_scrape(&provider, &config, &url, &data).await?;
        }
        Commands::Resolve {
            data,
            base_url,
            skip_unresolved,
        } => {
            let mut config = config.with_listing_base_url(base_url);
            if skip_unresolved {
                config = config.with_retry_policy(RetryPolicy::SkipUnresolved);
            }
            cmd_resolve(&provider, &config, &data).await?;
        }
        Commands::Classify {
            data,
            service_url,
            tracking_suffix,
        } => {
            let config = config
                .with_inspection_url(service_url)
                .with_tracking_suffix(tracking_suffix);
            cmd_classify(&provider, &config, &data).await?;
        }
        Commands::Replay {
            input,
            output,
            failed,
            target_url,
        } => {
            let config = config.with_replay_target_url(target_url);
            cmd_replay(&provider, &config, &input, &output, &failed).await?;
        }
        Commands::All { url, data } => {
            cmd_scrape(&provider, &config, &url, &data).await?;
            cmd_resolve(&provider, &config, &data).await?;
            cmd_classify(&provider, &config, &data).await?;
        }
    }

    Ok(())
}

async fn cmd_scrape(
    provider: &CdpSessionProvider,
    config: &PipelineConfig,
    url: &str,
    data: &Path,
) -> Result<()> {
    let scraper = ListingScraper::new(ListingExtractor::new()?, config.clone());
    let store = JsonStore::<Record>::new(data);

    let session = provider.connect(SessionMode::Fresh).await?;
    let result = scraper.scrape(&session, url, &store, &TracingReporter).await;
    session.shutdown().await;

    print_report(&result?.report, &[data])
}

async fn cmd_resolve(
    provider: &CdpSessionProvider,
    config: &PipelineConfig,
    data: &Path,
) -> Result<()> {
    let resolver = LinkResolver::new(config.clone());
    let store = existing_listing(data)?;

    let session = provider.connect(SessionMode::Fresh).await?;
    let result = resolver.run(&session, &store, &TracingReporter).await;
    session.shutdown().await;

    print_report(&result?.report, &[data])
}

async fn cmd_classify(
    provider: &CdpSessionProvider,
    config: &PipelineConfig,
    data: &Path,
) -> Result<()> {
    let classifier = TechnologyClassifier::new(BuiltWithParser::new()?, config.clone());
    let store = existing_listing(data)?;

    let session = provider.connect(SessionMode::Attach).await?;
    let result = classifier.run(&session, &store, &TracingReporter).await;
    session.shutdown().await;

    print_report(&result?.report, &[data])
}

async fn cmd_replay(
    provider: &CdpSessionProvider,
    config: &PipelineConfig,
    input: &Path,
    output: &Path,
    failed: &Path,
) -> Result<()> {
    let inputs = JsonStore::<ReplayEntry>::new(input);
    if !inputs.exists() {
        bail!("Replay input not found: {}", input.display());
    }
    let entries = inputs
        .load()
        .with_context(|| format!("Failed to read replay input {}", input.display()))?;
    let pipeline = ReplayPipeline::new(config.clone());
    let output_store = JsonStore::new(output);
    let failed_store = JsonStore::new(failed);

    let pending = pipeline.pending(&entries, &output_store)?;
    tracing::info!(
        total = entries.len(),
        pending = pending.len(),
        "Loaded replay input"
    );
    if pending.is_empty() {
        println!("Nothing to replay: every entry is already in {}", output.display());
        return Ok(());
    }

    let session = provider.connect(SessionMode::Attach).await?;
    let result = pipeline
        .run(&session, &entries, &output_store, &failed_store, &TracingReporter)
        .await;
    session.shutdown().await;

    print_report(&result?.report, &[output, failed])
}

fn existing_listing(data: &Path) -> Result<JsonStore<Record>> {
    if !data.exists() {
        bail!(
            "Listing document not found: {} (run `stackhunt scrape` first)",
            data.display()
        );
    }
    Ok(JsonStore::new(data))
}

/// Prints the stage summary to stdout, naming the documents it wrote.
fn print_report(report: &StageReport, documents: &[&Path]) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    for path in documents {
        println!("Saved to {}", path.display());
    }
    Ok(())
}

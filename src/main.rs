use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use proxy_broker::{
    health, service_info, Broker, BrokerConfig, FindRequest, GrabRequest,
    ProviderRegistry, ProxyRecord,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Find and check public proxies
#[derive(Parser)]
#[command(name = "proxy-broker")]
#[command(version, about = "Find and check public proxies")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Find proxies and check that they work
    Find {
        /// Protocol types (HTTP, HTTPS, SOCKS4, SOCKS5, CONNECT:80, CONNECT:25)
        #[arg(short, long, value_delimiter = ',', required = true)]
        types: Vec<String>,
        /// ISO alpha-2 country codes
        #[arg(short, long, value_delimiter = ',')]
        countries: Vec<String>,
        /// Maximum number of proxies to return
        #[arg(short, long, default_value = "10")]
        limit: i64,
        /// Use POST for judge requests
        #[arg(long)]
        post: bool,
        /// Only accept high-anonymity proxies
        #[arg(long)]
        strict: bool,
        /// DNSBL zones to screen hosts against
        #[arg(long, value_delimiter = ',')]
        dnsbl: Vec<String>,
        /// Overall budget in seconds
        #[arg(long, default_value = "8")]
        timeout: i64,
        /// Number of checks in flight at once
        #[arg(short = 'n', long, default_value = "200")]
        concurrency: usize,
        #[command(flatten)]
        sources: SourceArgs,
    },
    /// Collect proxies without checking them
    Grab {
        /// ISO alpha-2 country codes
        #[arg(short, long, value_delimiter = ',')]
        countries: Vec<String>,
        /// Maximum number of proxies to return
        #[arg(short, long, default_value = "10")]
        limit: i64,
        /// Budget in seconds
        #[arg(long, default_value = "8")]
        timeout: u64,
        #[command(flatten)]
        sources: SourceArgs,
    },
    /// List the configured providers
    Providers {
        /// File with extra text-list URLs (one per line)
        #[arg(short = 'f', long)]
        sources_file: Option<PathBuf>,
    },
    /// Print service metadata and health
    Info,
}

#[derive(clap::Args)]
struct SourceArgs {
    /// GeoLite2 Country/City database
    #[arg(long)]
    mmdb: Option<PathBuf>,
    /// File with extra text-list URLs (one per line)
    #[arg(short = 'f', long)]
    sources_file: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Find {
            types,
            countries,
            limit,
            post,
            strict,
            dnsbl,
            timeout,
            concurrency,
            sources,
        } => {
            let mut request = FindRequest::new(types)
                .with_limit(limit)
                .with_post(post)
                .with_strict(strict)
                .with_timeout(timeout);
            if !countries.is_empty() {
                request = request.with_countries(countries);
            }
            if !dnsbl.is_empty() {
                request = request.with_dnsbl(dnsbl);
            }

            let config = base_config(&sources).with_max_concurrent_checks(concurrency);
            let broker = build_broker(&sources, config)?;
            let records = broker.find(&request).await?;
            print_records(&records, sources.format)?;
        }
        Commands::Grab {
            countries,
            limit,
            timeout,
            sources,
        } => {
            let mut request = GrabRequest::new().with_limit(limit);
            if !countries.is_empty() {
                request = request.with_countries(countries);
            }

            let config = base_config(&sources).with_grab_timeout(Duration::from_secs(timeout));
            let broker = build_broker(&sources, config)?;
            let records = broker.grab(&request).await?;
            print_records(&records, sources.format)?;
        }
        Commands::Providers { sources_file } => {
            let registry = load_registry(sources_file.as_ref())?;
            println!("{} providers:", registry.len());
            for provider in registry.providers() {
                println!("  {:<24} {}", provider.name(), provider.url());
            }
        }
        Commands::Info => {
            let info = serde_json::json!({
                "info": service_info(),
                "health": health(),
            });
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose { "proxy_broker=debug" } else { "proxy_broker=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn base_config(sources: &SourceArgs) -> BrokerConfig {
    let config = BrokerConfig::new();
    match &sources.mmdb {
        Some(path) => config.with_mmdb_path(path.clone()),
        None => config,
    }
}

fn build_broker(sources: &SourceArgs, config: BrokerConfig) -> Result<Broker> {
    let registry = load_registry(sources.sources_file.as_ref())?;
    Ok(Broker::with_config(registry, config)?)
}

/// Built-in providers, plus any listed in the sources file
fn load_registry(sources_file: Option<&PathBuf>) -> Result<ProviderRegistry> {
    let mut registry = ProviderRegistry::default();
    if let Some(path) = sources_file {
        let added = registry
            .extend_from_file(path)
            .with_context(|| format!("failed to load sources from {:?}", path))?;
        tracing::info!(added, "loaded extra providers");
    }
    Ok(registry)
}

fn print_records(records: &[ProxyRecord], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(records)?),
        OutputFormat::Text => {
            if records.is_empty() {
                println!("No proxies found.");
            }
            for record in records {
                println!("{}", record);
            }
        }
    }
    Ok(())
}

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use proxy_sieve::{
    proxy::crawler::HttpSourceProvider, CheckerConfig, Config, EndpointParser, GeoSource,
    NegativeCachePolicy, ProxyCrawler, SqliteBackend, ValidationPipeline,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// A cached, bounded-concurrency validator for candidate proxy endpoints
#[derive(Parser)]
#[command(name = "proxy-sieve")]
#[command(about = "A cached, bounded-concurrency validator for candidate proxy endpoints")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log filter, overridden by RUST_LOG
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Args)]
struct SourceArgs {
    /// URL of a raw candidate list (can specify multiple)
    #[arg(short, long)]
    source: Vec<String>,
    /// File containing source URLs (one URL per line)
    #[arg(short = 'f', long)]
    source_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch sources, validate every endpoint and write the reports
    Run {
        #[command(flatten)]
        sources: SourceArgs,
        /// SQLite URL of the verdict cache (in-memory when omitted)
        #[arg(long)]
        cache: Option<String>,
        /// Number of endpoints validated concurrently
        #[arg(short = 'n', long, default_value = "5")]
        concurrency: usize,
        /// Probe timeout in seconds
        #[arg(long, default_value = "30")]
        timeout: u64,
        /// URL fetched through each candidate
        #[arg(long, default_value = "https://cf-clearance.pages.dev")]
        test_url: String,
        /// Response fragment marking a blocked request
        #[arg(long, default_value = "Just a moment...")]
        block_marker: String,
        /// Probe endpoints again even if they are cached as invalid
        #[arg(long)]
        reprobe_invalid: bool,
        /// ip-api compatible service used for enrichment
        #[arg(long, default_value = "http://ip-api.com/json/")]
        geo_api: String,
        /// Use a local MaxMind City database instead of the geo API
        #[arg(long, conflicts_with = "no_geo")]
        mmdb: Option<PathBuf>,
        /// Skip location enrichment
        #[arg(long)]
        no_geo: bool,
        /// Output file for usable hosts
        #[arg(long, default_value = "pyip.txt")]
        output_txt: PathBuf,
        /// Output file for usable endpoint records
        #[arg(long, default_value = "proxies.json")]
        output_json: PathBuf,
        /// Repeat the run every N hours until interrupted
        #[arg(long)]
        interval_hours: Option<u64>,
    },
    /// Fetch sources and print or save the unique endpoints without probing
    Parse {
        #[command(flatten)]
        sources: SourceArgs,
        /// Local files to parse in addition to the sources
        #[arg(short, long)]
        input: Vec<PathBuf>,
        /// Output file for parsed endpoints
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Maintain the verdict cache
    Cache {
        /// SQLite URL of the verdict cache
        #[arg(long)]
        cache: String,
        /// Delete expired verdicts
        #[arg(long)]
        purge: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Run {
            sources,
            cache,
            concurrency,
            timeout,
            test_url,
            block_marker,
            reprobe_invalid,
            geo_api,
            mmdb,
            no_geo,
            output_txt,
            output_json,
            interval_hours,
        } => {
            let negative_cache = if reprobe_invalid {
                NegativeCachePolicy::Reprobe
            } else {
                NegativeCachePolicy::Suppress
            };
            let checker = CheckerConfig::new()
                .with_concurrency(concurrency)
                .with_timeout(Duration::from_secs(timeout))
                .with_test_url(test_url)
                .with_block_marker(block_marker)
                .with_negative_cache(negative_cache);
            let geo = match (mmdb, no_geo) {
                (_, true) => GeoSource::Disabled,
                (Some(path), false) => GeoSource::Mmdb { path },
                (None, false) => GeoSource::IpApi { base_url: geo_api },
            };
            let config = Config::new()
                .with_checker(checker)
                .with_sources(resolve_sources(&sources)?)
                .with_cache_url(cache)
                .with_geo(geo)
                .with_outputs(output_txt, output_json);

            run(config, interval_hours).await?;
        }
        Commands::Parse {
            sources,
            input,
            output,
        } => {
            let urls = resolve_sources(&sources)?;
            let crawler = ProxyCrawler::new(Arc::new(HttpSourceProvider::new()?));
            let mut endpoints = crawler.collect_endpoints(&urls).await;

            for path in &input {
                let parsed = EndpointParser::parse_file(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                info!("Parsed {} endpoints from {}", parsed.len(), path.display());
                endpoints.extend(parsed);
            }
            // sources and files may overlap
            let endpoints = EndpointParser::dedup(endpoints);

            println!("Total unique endpoints: {}", endpoints.len());
            if let Some(output_path) = output {
                EndpointParser::save_to_file(&endpoints, &output_path)?;
                println!("Saved endpoints to {:?}", output_path);
            } else {
                for endpoint in &endpoints {
                    println!("{}", endpoint);
                }
            }
        }
        Commands::Cache { cache, purge } => {
            let backend = SqliteBackend::connect(&cache)
                .await
                .with_context(|| format!("opening cache {}", cache))?;
            if purge {
                let removed = backend.purge_expired().await?;
                println!("Removed {} expired verdicts", removed);
            }
            println!("{} verdicts stored", backend.count().await?);
        }
    }

    Ok(())
}

async fn run(config: Config, interval_hours: Option<u64>) -> Result<()> {
    if config.sources.is_empty() {
        warn!("No sources configured; nothing will be validated");
    }

    let pipeline = ValidationPipeline::from_config(&config).await?;

    loop {
        let report = pipeline.run(&config.sources).await;
        println!(
            "Usable endpoints: {} of {}",
            report.valid_count(),
            report.progress.total
        );

        // a failed write is reported but never discards the next run
        if let Err(e) = report.write_hosts(&config.output_txt) {
            error!("{:#}", e);
        } else {
            println!("Saved hosts to {:?}", config.output_txt);
        }
        if let Err(e) = report.write_json(&config.output_json) {
            error!("{:#}", e);
        } else {
            println!("Saved records to {:?}", config.output_json);
        }

        let Some(hours) = interval_hours else {
            return Ok(());
        };
        info!("Next run in {} hours", hours);
        tokio::select! {
            _ = tokio::time::sleep(run_interval(hours)) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping");
                return Ok(());
            }
        }
    }
}

/// Pause between runs, saturating for absurdly large hour counts
fn run_interval(hours: u64) -> Duration {
    Duration::from_secs(hours.saturating_mul(3600))
}

fn resolve_sources(args: &SourceArgs) -> Result<Vec<String>> {
    let mut urls = args.source.clone();
    if let Some(file_path) = &args.source_file {
        let listed = ProxyCrawler::load_source_list(file_path)
            .with_context(|| format!("reading {}", file_path.display()))?;
        info!("Loaded {} source URLs from {}", listed.len(), file_path.display());
        urls.extend(listed);
    }
    if urls.iter().any(|u| !u.starts_with("http")) {
        bail!("Source URLs must start with http:// or https://");
    }
    Ok(urls)
}

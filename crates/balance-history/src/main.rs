use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use balance_history::addresses::AddressBook;
use balance_history::cache::{Cache, LAST_RUN_KEY};
use balance_history::chains::Chain;
use balance_history::config::{Config, FileConfig, Overrides};
use balance_history::constants;
use balance_history::denoms::{DenomRegistry, DenomSource};
use balance_history::history::{
    ConsoleProgress, HistoryContext, NoProgress, Progress, build_history, estimate_duration, process_single_tx,
};
use balance_history::http::new_http_client;
use balance_history::indexer::{IndexerApi, LcdDenomSource, MintscanClient};
use balance_history::ledger::DateRange;
use balance_history::reports::{format_decimal, generate_all_reports, print_summary, render_table};
use balance_history::{HistoryError, Warnings};

#[derive(Parser)]
#[command(
    name = "balance-history",
    version,
    about = "Reconstructs per-denomination balance history for Cosmos wallets"
)]
struct Cli {
    /// Path to config.toml (optional)
    #[arg(long, global = true, default_value = constants::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Chain (ticker or registry name); inferred from the wallet prefix if omitted
    #[arg(long, global = true)]
    chain: Option<Chain>,

    /// Mintscan API key
    #[arg(long, global = true, env = "MINTSCAN_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Skip reading and writing the SQLite cache
    #[arg(long, global = true)]
    no_cache: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the balance table for a wallet
    History {
        wallet: String,

        /// First day of the range (YYYY-MM-DD, inclusive)
        #[arg(long)]
        start_date: Option<NaiveDate>,

        /// Last day of the range (YYYY-MM-DD, inclusive)
        #[arg(long)]
        end_date: Option<NaiveDate>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,

        /// Forward-fill blank cells in the CSV output
        #[arg(long)]
        fill: bool,

        /// Directory for CSV output (default from config)
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Suppress progress lines
        #[arg(long)]
        quiet: bool,
    },

    /// Show the balance deltas of a single transaction
    Tx { wallet: String, tx_id: String },

    /// Estimate how long a history run will take
    Estimate {
        wallet: String,
        #[arg(long)]
        start_date: Option<NaiveDate>,
        #[arg(long)]
        end_date: Option<NaiveDate>,
    },

    /// Check that the wallet exists on chain
    Exists { wallet: String },

    /// Show cache statistics
    CacheStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Csv,
    All,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let file_config = FileConfig::load_or_default(&cli.config)?;

    let wallet = match &cli.command {
        Commands::History { wallet, .. }
        | Commands::Tx { wallet, .. }
        | Commands::Estimate { wallet, .. }
        | Commands::Exists { wallet } => Some(wallet.clone()),
        Commands::CacheStats => None,
    };

    if matches!(cli.command, Commands::CacheStats) {
        let cache = Cache::open(&file_config.cache.path).await?;
        println!("Cache: {}", file_config.cache.path.display());
        println!("  {}", cache.stats().await?);
        return Ok(());
    }

    let config = Config::from_file(
        &file_config,
        Overrides {
            chain: cli.chain,
            mintscan_api_key: cli.api_key.clone(),
            no_cache: cli.no_cache,
            wallet: wallet.as_deref(),
        },
    )?;

    let client = new_http_client();
    let api = MintscanClient::new(&config, client.clone());

    match cli.command {
        Commands::History {
            wallet,
            start_date,
            end_date,
            format,
            fill,
            output_dir,
            quiet,
        } => {
            let range = DateRange::from_dates(start_date, end_date)?;
            let source: Arc<dyn DenomSource> = Arc::new(LcdDenomSource::new(&config, client));
            let options = HistoryOptions {
                range,
                format,
                forward_fill: fill || config.forward_fill,
                output_dir: output_dir.unwrap_or_else(|| config.output_dir.clone()),
                quiet,
            };
            run_history(&config, &api, source, &wallet, options).await?;
        }
        Commands::Tx { wallet, tx_id } => {
            let source: Arc<dyn DenomSource> = Arc::new(LcdDenomSource::new(&config, client));
            run_single_tx(&config, &api, source, &wallet, &tx_id).await?;
        }
        Commands::Estimate {
            wallet,
            start_date,
            end_date,
        } => {
            let range = DateRange::from_dates(start_date, end_date)?;
            let seconds = estimate_duration(&api, &wallet, &range)
                .await
                .context("Failed to estimate duration")?;
            println!("Estimated duration for {} {}: ~{:.0}s", wallet, range, seconds);
        }
        Commands::Exists { wallet } => {
            let exists = api
                .account_exists(&wallet)
                .await
                .context("Failed to query account")?;
            if exists {
                println!("✓ {} exists on {}", wallet, config.chain);
            } else {
                println!("✗ {} not found on {}", wallet, config.chain);
            }
        }
        Commands::CacheStats => {}
    }

    Ok(())
}

struct HistoryOptions {
    range: DateRange,
    format: OutputFormat,
    forward_fill: bool,
    output_dir: PathBuf,
    quiet: bool,
}

async fn run_history(
    config: &Config,
    api: &dyn IndexerApi,
    source: Arc<dyn DenomSource>,
    wallet: &str,
    options: HistoryOptions,
) -> Result<()> {
    let mut startup_warnings = Warnings::new();
    let registry = DenomRegistry::new(Some(source));
    registry.preload([config.chain.native_denom_info()]).await;
    let mut book = AddressBook::new(wallet, config);

    let cache = open_cache(config, &mut startup_warnings).await;
    if let Some(cache) = &cache {
        load_from_cache(cache, &registry, &mut book, wallet, &mut startup_warnings).await;
    }

    let progress: Box<dyn Progress> = if options.quiet {
        Box::new(NoProgress)
    } else {
        Box::new(ConsoleProgress::new())
    };
    let ctx = HistoryContext {
        api,
        registry: &registry,
        config,
        progress: progress.as_ref(),
    };

    if !options.quiet {
        eprintln!("Balance history for {} ({}) {}", wallet, config.chain, options.range);
    }
    let mut report = build_history(&ctx, &mut book, wallet, options.range)
        .await
        .context("Balance history failed; no report written")?;
    report.warnings.extend(startup_warnings);

    if let Some(cache) = &cache
        && let Err(e) = save_to_cache(cache, &registry, &book, wallet).await
    {
        report.warnings.push(HistoryError::CacheUnavailable {
            reason: format!("write-back failed: {:#}", e),
        });
    }

    if matches!(options.format, OutputFormat::Table | OutputFormat::All) {
        println!("{}", render_table(&report.output.rows, &report.output.tickers));
    }
    if matches!(options.format, OutputFormat::Csv | OutputFormat::All) {
        generate_all_reports(&options.output_dir, &report, options.forward_fill)
            .context("Failed to write CSV reports")?;
    }

    if !options.quiet {
        print_summary(&report);
    }

    Ok(())
}

async fn run_single_tx(
    config: &Config,
    api: &dyn IndexerApi,
    source: Arc<dyn DenomSource>,
    wallet: &str,
    tx_id: &str,
) -> Result<()> {
    let registry = DenomRegistry::new(Some(source));
    registry.preload([config.chain.native_denom_info()]).await;
    let mut book = AddressBook::new(wallet, config);
    let ctx = HistoryContext {
        api,
        registry: &registry,
        config,
        progress: &NoProgress,
    };

    let Some(tx) = process_single_tx(&ctx, &mut book, wallet, tx_id)
        .await
        .context("Failed to process transaction")?
    else {
        println!("Transaction {} not found on {}", tx_id, config.chain);
        return Ok(());
    };

    println!(
        "{}  {}",
        tx.tx_id,
        tx.timestamp.format(constants::TIMESTAMP_FORMAT)
    );
    if tx.deltas.is_empty() {
        println!("  (no balance change for {})", wallet);
    }
    for delta in &tx.deltas {
        println!(
            "  {:<12} {:>28}  {}",
            delta.denom,
            format_decimal(&delta.signed_amount),
            delta.kind
        );
    }
    for transfer in &tx.cross_chain {
        println!(
            "  {:<12} {:>28}  cross-chain with {}",
            transfer.ticker,
            format_decimal(&transfer.signed_amount),
            book.label(&transfer.counterparty)
        );
    }
    for warning in tx.warnings.iter() {
        eprintln!("  ⚠️  {}", warning);
    }

    Ok(())
}

/// Open the cache, or record why it is unavailable and continue cold
async fn open_cache(config: &Config, warnings: &mut Warnings) -> Option<Cache> {
    if !config.cache_enabled {
        return None;
    }
    match Cache::open(&config.cache_path).await {
        Ok(cache) => Some(cache),
        Err(e) => {
            warnings.push(HistoryError::CacheUnavailable {
                reason: format!("{:#}", e),
            });
            None
        }
    }
}

async fn load_from_cache(
    cache: &Cache,
    registry: &DenomRegistry,
    book: &mut AddressBook,
    wallet: &str,
    warnings: &mut Warnings,
) {
    match cache.get_denoms().await {
        Ok(denoms) => registry.preload(denoms).await,
        Err(e) => warnings.push(HistoryError::CacheUnavailable {
            reason: format!("reading denoms: {:#}", e),
        }),
    }
    match cache.get_address_classes(wallet).await {
        Ok(entries) => book.load(entries),
        Err(e) => warnings.push(HistoryError::CacheUnavailable {
            reason: format!("reading address classes: {:#}", e),
        }),
    }
}

async fn save_to_cache(cache: &Cache, registry: &DenomRegistry, book: &AddressBook, wallet: &str) -> Result<()> {
    cache.store_denoms(&registry.snapshot().await).await?;
    cache.store_address_classes(wallet, &book.entries()).await?;
    cache
        .set_metadata(LAST_RUN_KEY, &Utc::now().format(constants::TIMESTAMP_FORMAT).to_string())
        .await?;
    Ok(())
}

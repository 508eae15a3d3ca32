//! Configuration for the balance history tool
//!
//! `config.toml` is optional; every field has a default. The runtime [`Config`]
//! is built once per run and passed by reference to each component.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::chains::Chain;
use crate::constants;

// =============================================================================
// File-based Configuration (config.toml)
// =============================================================================

/// Configuration loaded from config.toml
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub chain: Option<String>,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub addresses: AddressesConfig,
}

/// Remote endpoints and credentials
#[derive(Debug, Default, Deserialize)]
pub struct ApiConfig {
    /// Mintscan API key (also read from MINTSCAN_API_KEY)
    #[serde(default)]
    pub mintscan_api_key: Option<String>,
    /// Override for the Mintscan API base URL
    #[serde(default)]
    pub mintscan_base: Option<String>,
    /// Override for the chain REST (LCD) endpoint
    #[serde(default)]
    pub rest_url: Option<String>,
}

/// Page fetching behaviour
#[derive(Debug, Deserialize)]
pub struct FetchConfig {
    /// Concurrent page-fetch workers (default: 4)
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Retries per request on transient failures (default: 3)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Abort if the range holds more transactions than this
    #[serde(default)]
    pub max_txs: Option<usize>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_retries: default_max_retries(),
            max_txs: None,
        }
    }
}

/// How transaction fees appear in the delta stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeePolicy {
    /// Fee folded into the transaction's per-denom delta
    #[default]
    Inline,
    /// Fee emitted as its own delta at the transaction timestamp
    Separate,
}

/// Output settings
#[derive(Debug, Deserialize)]
pub struct ReportConfig {
    #[serde(default)]
    pub fee_policy: FeePolicy,
    /// Carry the last known value into blank CSV cells
    #[serde(default)]
    pub forward_fill: bool,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            fee_policy: FeePolicy::default(),
            forward_fill: false,
            output_dir: default_output_dir(),
        }
    }
}

/// SQLite cache for denoms and address classes
#[derive(Debug, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_cache_path(),
        }
    }
}

/// Address bookkeeping hints
#[derive(Debug, Default, Deserialize)]
pub struct AddressesConfig {
    /// Other accounts owned by the same person (any chain)
    #[serde(default)]
    pub self_addresses: Vec<String>,
    /// Known counterparties: address -> label
    #[serde(default)]
    pub known: HashMap<String, String>,
}

fn default_true() -> bool {
    true
}

fn default_workers() -> usize {
    constants::DEFAULT_WORKERS
}

fn default_max_retries() -> u32 {
    constants::DEFAULT_MAX_RETRIES
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(constants::DEFAULT_OUTPUT_DIR)
}

fn default_cache_path() -> PathBuf {
    PathBuf::from(constants::DEFAULT_CACHE_PATH)
}

impl FileConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Load the file if present, otherwise fall back to defaults
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).with_context(|| {
            "Failed to parse config.toml. Check for:\n\
             - Invalid TOML syntax (missing quotes, brackets, etc.)\n\
             - Incorrect data types (e.g. fetch.workers must be a number)\n\
             - Unknown fee_policy (expected \"inline\" or \"separate\")"
        })
    }
}

// =============================================================================
// Runtime Configuration
// =============================================================================

/// Values supplied on the command line that take precedence over the file
#[derive(Debug, Default)]
pub struct Overrides<'a> {
    pub chain: Option<Chain>,
    pub mintscan_api_key: Option<String>,
    pub no_cache: bool,
    /// Wallet address, used to infer the chain when nothing else names it
    pub wallet: Option<&'a str>,
}

/// Immutable per-run configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub chain: Chain,
    pub mintscan_base: String,
    pub mintscan_api_key: Option<String>,
    pub rest_url: String,
    pub workers: usize,
    pub max_retries: u32,
    pub max_txs: Option<usize>,
    pub fee_policy: FeePolicy,
    pub forward_fill: bool,
    pub output_dir: PathBuf,
    pub cache_enabled: bool,
    pub cache_path: PathBuf,
    pub self_addresses: Vec<String>,
    pub known_addresses: HashMap<String, String>,
}

impl Config {
    /// Create config from file config and command-line overrides
    pub fn from_file(file_config: &FileConfig, overrides: Overrides) -> Result<Self> {
        // Chain: CLI flag, then config file, then wallet prefix
        let chain = match (overrides.chain, file_config.chain.as_deref()) {
            (Some(chain), _) => chain,
            (None, Some(name)) => name.parse::<Chain>().context("Invalid chain in config.toml")?,
            (None, None) => overrides
                .wallet
                .and_then(Chain::from_address)
                .ok_or_else(|| anyhow::anyhow!("Cannot infer chain; pass --chain or set `chain` in config.toml"))?,
        };

        if file_config.fetch.workers == 0 {
            anyhow::bail!("fetch.workers must be at least 1");
        }

        Ok(Self {
            chain,
            mintscan_base: file_config
                .api
                .mintscan_base
                .clone()
                .unwrap_or_else(|| constants::MINTSCAN_API_BASE.to_string()),
            mintscan_api_key: overrides
                .mintscan_api_key
                .or_else(|| file_config.api.mintscan_api_key.clone()),
            rest_url: file_config
                .api
                .rest_url
                .clone()
                .unwrap_or_else(|| chain.default_rest_url()),
            workers: file_config.fetch.workers,
            max_retries: file_config.fetch.max_retries,
            max_txs: file_config.fetch.max_txs,
            fee_policy: file_config.report.fee_policy,
            forward_fill: file_config.report.forward_fill,
            output_dir: file_config.report.output_dir.clone(),
            cache_enabled: file_config.cache.enabled && !overrides.no_cache,
            cache_path: file_config.cache.path.clone(),
            self_addresses: file_config.addresses.self_addresses.clone(),
            known_addresses: file_config.addresses.known.clone(),
        })
    }

    /// Defaults for a chain (no file, no overrides)
    pub fn for_chain(chain: Chain) -> Self {
        Self {
            chain,
            mintscan_base: constants::MINTSCAN_API_BASE.to_string(),
            mintscan_api_key: None,
            rest_url: chain.default_rest_url(),
            workers: constants::DEFAULT_WORKERS,
            max_retries: constants::DEFAULT_MAX_RETRIES,
            max_txs: None,
            fee_policy: FeePolicy::default(),
            forward_fill: false,
            output_dir: default_output_dir(),
            cache_enabled: true,
            cache_path: default_cache_path(),
            self_addresses: Vec::new(),
            known_addresses: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let file = FileConfig::parse("").unwrap();
        let config = Config::from_file(
            &file,
            Overrides {
                wallet: Some("akash10vx09tg27lg4dtkv4r09s2glz3mme62u4wzxrz"),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(config.chain, Chain::Akash);
        assert_eq!(config.workers, constants::DEFAULT_WORKERS);
        assert_eq!(config.max_retries, constants::DEFAULT_MAX_RETRIES);
        assert_eq!(config.fee_policy, FeePolicy::Inline);
        assert_eq!(config.rest_url, "https://rest.cosmos.directory/akash");
        assert!(config.cache_enabled);
    }

    #[test]
    fn test_full_file() {
        let file = FileConfig::parse(
            r#"
            chain = "osmosis"

            [api]
            mintscan_api_key = "file-key"
            rest_url = "https://lcd.example.org"

            [fetch]
            workers = 8
            max_retries = 5
            max_txs = 5000

            [report]
            fee_policy = "separate"
            forward_fill = true
            output_dir = "out"

            [cache]
            enabled = false

            [addresses]
            self_addresses = ["cosmos1rv52shjza8lv7pv4avr24nqpqmq4z90yz0j2f0"]

            [addresses.known]
            "osmo1zg69v7ys40x77y352eqeskl5ry4ubmz7zx8s3a" = "Exchange"
            "#,
        )
        .unwrap();
        let config = Config::from_file(&file, Overrides::default()).unwrap();

        assert_eq!(config.chain, Chain::Osmosis);
        assert_eq!(config.mintscan_api_key.as_deref(), Some("file-key"));
        assert_eq!(config.rest_url, "https://lcd.example.org");
        assert_eq!(config.workers, 8);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.max_txs, Some(5000));
        assert_eq!(config.fee_policy, FeePolicy::Separate);
        assert!(config.forward_fill);
        assert_eq!(config.output_dir, PathBuf::from("out"));
        assert!(!config.cache_enabled);
        assert_eq!(config.self_addresses.len(), 1);
        assert_eq!(config.known_addresses.len(), 1);
    }

    #[test]
    fn test_overrides_take_precedence() {
        let file = FileConfig::parse("chain = \"juno\"\n[api]\nmintscan_api_key = \"file-key\"").unwrap();
        let config = Config::from_file(
            &file,
            Overrides {
                chain: Some(Chain::Stride),
                mintscan_api_key: Some("cli-key".to_string()),
                no_cache: true,
                wallet: None,
            },
        )
        .unwrap();

        assert_eq!(config.chain, Chain::Stride);
        assert_eq!(config.mintscan_api_key.as_deref(), Some("cli-key"));
        assert!(!config.cache_enabled);
    }

    #[test]
    fn test_chain_cannot_be_inferred() {
        let file = FileConfig::default();
        assert!(Config::from_file(&file, Overrides::default()).is_err());
    }

    #[test]
    fn test_rejects_zero_workers_and_bad_policy() {
        let file = FileConfig::parse("chain = \"ATOM\"\n[fetch]\nworkers = 0").unwrap();
        assert!(Config::from_file(&file, Overrides::default()).is_err());

        assert!(FileConfig::parse("[report]\nfee_policy = \"later\"").is_err());
    }
}

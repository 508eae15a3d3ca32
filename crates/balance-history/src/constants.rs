//! Endpoints, limits and output naming shared across the crate

// =============================================================================
// Remote APIs
// =============================================================================

/// Mintscan indexer (transaction search)
pub const MINTSCAN_API_BASE: &str = "https://apis.mintscan.io/v1";

/// Public REST (LCD) proxy; the chain registry name is appended
pub const REST_DIRECTORY_BASE: &str = "https://rest.cosmos.directory";

/// Header used by Cosmos SDK REST servers for historical queries
pub const BLOCK_HEIGHT_HEADER: &str = "x-cosmos-block-height";

/// Transactions requested per Mintscan page
pub const MINTSCAN_PAGE_SIZE: u32 = 20;

/// Per-request timeout for all HTTP calls
pub const HTTP_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// Fetch tuning
// =============================================================================

/// Default number of concurrent page-fetch workers
pub const DEFAULT_WORKERS: usize = 4;

/// Default retry count for transient HTTP failures
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Rough wall-clock cost of one page, used for run-time estimates
pub const SECONDS_PER_PAGE: f64 = 1.5;

// =============================================================================
// Files & formatting
// =============================================================================

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";
pub const DEFAULT_CACHE_PATH: &str = "data/cache.sqlite";
pub const DEFAULT_OUTPUT_DIR: &str = "_reports";

/// Display format for row timestamps (UTC)
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Transaction id used for the synthetic genesis allocation entry
pub const GENESIS_TX_ID: &str = "genesis";

//! Run orchestration: seed, fetch, normalize, replay
//!
//! Pages are fetched concurrently (one cursor chain per time window) into a
//! single buffer. Only once every page has arrived are transactions sorted,
//! normalized and fed to the ledger by this task alone, so a failed fetch
//! never yields a partial table.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::HashSet;
use std::io::Write;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::addresses::AddressBook;
use crate::chains::Chain;
use crate::config::Config;
use crate::constants;
use crate::denoms::DenomRegistry;
use crate::error::{HistoryError, HistoryResult, Warnings};
use crate::indexer::IndexerApi;
use crate::ledger::{DateRange, Ledger, LedgerOutput};
use crate::normalizer::{DeltaKind, NormalizedDelta, NormalizedTx, Normalizer};
use crate::transactions::RawTransaction;

// =============================================================================
// Progress reporting
// =============================================================================

pub trait Progress: Send + Sync {
    fn message(&self, msg: &str);

    fn set_estimate(&self, _pages: u64) {}

    fn page_done(&self, _txs: usize) {}
}

/// Progress lines on stderr; stdout is left to the table
pub struct ConsoleProgress {
    out: Mutex<Box<dyn Write + Send>>,
    estimate: AtomicU64,
    pages: AtomicU64,
}

impl ConsoleProgress {
    pub fn new() -> Self {
        Self::with_writer(Box::new(std::io::stderr()))
    }

    pub fn with_writer(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
            estimate: AtomicU64::new(0),
            pages: AtomicU64::new(0),
        }
    }

    fn line(&self, text: std::fmt::Arguments<'_>) {
        if let Ok(mut out) = self.out.lock()
            && let Err(e) = writeln!(out, "{}", text)
        {
            tracing::debug!("progress output failed: {}", e);
        }
    }
}

impl Default for ConsoleProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl Progress for ConsoleProgress {
    fn message(&self, msg: &str) {
        self.line(format_args!("  {}", msg));
    }

    fn set_estimate(&self, pages: u64) {
        self.estimate.store(pages, Ordering::Relaxed);
        self.line(format_args!(
            "    Estimated {} page(s), ~{:.0}s",
            pages,
            pages as f64 * constants::SECONDS_PER_PAGE
        ));
    }

    fn page_done(&self, txs: usize) {
        let done = self.pages.fetch_add(1, Ordering::Relaxed) + 1;
        let estimate = self.estimate.load(Ordering::Relaxed);
        if estimate > 0 {
            self.line(format_args!("    Page {}/{} ({} txs)", done, estimate.max(done), txs));
        } else {
            self.line(format_args!("    Page {} ({} txs)", done, txs));
        }
    }
}

/// Silent progress (tests, `--quiet`)
pub struct NoProgress;

impl Progress for NoProgress {
    fn message(&self, _msg: &str) {}
}

// =============================================================================
// Report
// =============================================================================

/// Everything produced by one successful run
#[derive(Debug)]
pub struct HistoryReport {
    pub wallet: String,
    pub chain: Chain,
    pub range: DateRange,
    pub output: LedgerOutput,
    /// Normalized transactions in replay order (genesis entry included)
    pub transactions: Vec<NormalizedTx>,
    pub warnings: Warnings,
    /// Unique transactions fetched for the range
    pub fetched: usize,
}

/// Shared inputs of a run
pub struct HistoryContext<'a> {
    pub api: &'a dyn IndexerApi,
    pub registry: &'a DenomRegistry,
    pub config: &'a Config,
    pub progress: &'a dyn Progress,
}

// =============================================================================
// Operations
// =============================================================================

/// Expected wall-clock seconds for a full run over `range`
pub async fn estimate_duration(api: &dyn IndexerApi, wallet: &str, range: &DateRange) -> HistoryResult<f64> {
    let pages = api.get_pages_count(wallet, range).await?;
    Ok(pages as f64 * constants::SECONDS_PER_PAGE)
}

/// Fetch every transaction in `range`, deduplicated and sorted ascending
pub async fn fetch_all(
    ctx: &HistoryContext<'_>,
    wallet: &str,
    range: &DateRange,
) -> HistoryResult<(Vec<RawTransaction>, Warnings)> {
    let workers = ctx.config.workers.max(1);
    let windows = range.split(workers);
    let seen = AtomicUsize::new(0);

    let results: Vec<(Vec<RawTransaction>, Vec<HistoryError>)> = stream::iter(windows)
        .map(|window| fetch_window(ctx, wallet, window, &seen))
        .buffer_unordered(workers)
        .try_collect()
        .await?;

    let mut warnings = Warnings::new();
    let mut ids = HashSet::new();
    let mut transactions = Vec::new();
    for (txs, rejected) in results {
        for err in rejected {
            warnings.push(err);
        }
        for tx in txs {
            if ids.insert(tx.id.clone()) {
                transactions.push(tx);
            }
        }
    }

    if let Some(limit) = ctx.config.max_txs
        && transactions.len() > limit
    {
        return Err(HistoryError::TooManyTransactions {
            count: transactions.len(),
            limit,
        });
    }

    transactions.sort_by(|a, b| (a.timestamp, a.height, &a.id).cmp(&(b.timestamp, b.height, &b.id)));
    Ok((transactions, warnings))
}

/// Walk one window's cursor chain to the end
async fn fetch_window(
    ctx: &HistoryContext<'_>,
    wallet: &str,
    window: DateRange,
    seen: &AtomicUsize,
) -> HistoryResult<(Vec<RawTransaction>, Vec<HistoryError>)> {
    let mut transactions = Vec::new();
    let mut rejected = Vec::new();
    let mut cursor: Option<String> = None;

    loop {
        let page = ctx.api.get_txs_page(wallet, &window, cursor.as_deref()).await?;
        let count = page.transactions.len();
        ctx.progress.page_done(count);

        let total = seen.fetch_add(count, Ordering::Relaxed) + count;
        if let Some(limit) = ctx.config.max_txs
            && total > limit
        {
            return Err(HistoryError::TooManyTransactions { count: total, limit });
        }

        transactions.extend(page.transactions);
        rejected.extend(page.rejected);

        match page.next_cursor {
            Some(next) if cursor.as_deref() != Some(next.as_str()) => cursor = Some(next),
            _ => break,
        }
    }

    Ok((transactions, rejected))
}

/// Reconstruct the balance history of `wallet` over `range`
pub async fn build_history(
    ctx: &HistoryContext<'_>,
    book: &mut AddressBook,
    wallet: &str,
    range: DateRange,
) -> HistoryResult<HistoryReport> {
    let chain = ctx.config.chain;
    let mut warnings = Warnings::new();
    let mut ledger = Ledger::new(range);
    let mut normalized = Vec::new();

    // Seed from the last transaction before the range
    if let Some(start) = range.start {
        ctx.progress.message("Fetching opening balance...");
        let raw = ctx
            .api
            .get_balance_at(wallet, start)
            .await
            .map_err(|e| seed_error(wallet, start, e))?;

        let mut denoms: Vec<(String, u128)> = raw.into_iter().collect();
        denoms.sort();
        let mut seed = Vec::with_capacity(denoms.len());
        for (denom, amount) in denoms {
            seed.push(display_amount(ctx.registry, &denom, amount, &mut warnings).await);
        }
        ledger.seed(seed);
    }

    // Genesis allocation is a synthetic first transaction
    if let Some(genesis) = chain.genesis_time()
        && range.contains(genesis)
    {
        ctx.progress.message("Fetching genesis allocation...");
        if let Some(coins) = ctx.api.get_genesis_allocation(wallet).await? {
            let mut tx = NormalizedTx {
                tx_id: constants::GENESIS_TX_ID.to_string(),
                timestamp: genesis,
                deltas: Vec::new(),
                cross_chain: Vec::new(),
                warnings: Warnings::new(),
            };
            for coin in coins {
                let (ticker, value) = display_amount(ctx.registry, &coin.denom, coin.amount, &mut warnings).await;
                tx.deltas.push(NormalizedDelta::new(genesis, &ticker, value, DeltaKind::Movement));
            }
            ledger.push_tx(&tx);
            normalized.push(tx);
        }
    }

    match ctx.api.get_pages_count(wallet, &range).await {
        Ok(pages) => ctx.progress.set_estimate(pages),
        Err(e) => tracing::debug!("page count unavailable: {}", e),
    }

    let (transactions, fetch_warnings) = fetch_all(ctx, wallet, &range).await?;
    warnings.extend(fetch_warnings);
    let fetched = transactions.len();

    ctx.progress
        .message(&format!("Processing {} transactions...", fetched));
    let normalizer = Normalizer::new(wallet, ctx.registry, ctx.config.fee_policy);
    for raw in &transactions {
        let mut tx = normalizer.normalize(raw, book).await;
        warnings.extend(std::mem::take(&mut tx.warnings));
        if ledger.push_tx(&tx) {
            normalized.push(tx);
        }
    }

    Ok(HistoryReport {
        wallet: wallet.to_string(),
        chain,
        range,
        output: ledger.finish(),
        transactions: normalized,
        warnings,
        fetched,
    })
}

/// Fetch and normalize a single transaction
pub async fn process_single_tx(
    ctx: &HistoryContext<'_>,
    book: &mut AddressBook,
    wallet: &str,
    tx_id: &str,
) -> HistoryResult<Option<NormalizedTx>> {
    let Some(raw) = ctx.api.get_tx(tx_id).await? else {
        return Ok(None);
    };
    let normalizer = Normalizer::new(wallet, ctx.registry, ctx.config.fee_policy);
    Ok(Some(normalizer.normalize(&raw, book).await))
}

fn seed_error(wallet: &str, before: DateTime<Utc>, err: HistoryError) -> HistoryError {
    match err {
        HistoryError::SeedBalanceUnavailable { .. } => err,
        other => HistoryError::SeedBalanceUnavailable {
            wallet: wallet.to_string(),
            before,
            reason: other.to_string(),
        },
    }
}

/// Ticker and scaled value of a base-unit balance
async fn display_amount(
    registry: &DenomRegistry,
    denom: &str,
    amount: u128,
    warnings: &mut Warnings,
) -> (String, BigDecimal) {
    let info = registry.resolve_or_raw(denom, warnings).await;
    let value = info.scale(amount);
    (info.ticker, value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_console_progress_writes_to_its_own_stream() {
        let buf = SharedBuf::default();
        let progress = ConsoleProgress::with_writer(Box::new(buf.clone()));

        progress.message("Fetching opening balance...");
        progress.set_estimate(2);
        progress.page_done(50);
        progress.page_done(50);
        progress.page_done(3);

        let text = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "  Fetching opening balance...",
                "    Estimated 2 page(s), ~3s",
                "    Page 1/2 (50 txs)",
                "    Page 2/2 (50 txs)",
                "    Page 3/3 (3 txs)",
            ]
        );
    }
}

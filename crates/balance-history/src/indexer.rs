//! Indexer access: Mintscan transaction search plus chain REST (LCD) queries
//!
//! All requests go through [`RestClient::get_json`], which retries transient
//! failures (429, 5xx, transport errors) with exponential backoff. A 404 is an
//! answer, not a failure. A 200 whose body is not JSON is final.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::sleep;

use crate::chains::Chain;
use crate::config::Config;
use crate::constants;
use crate::denoms::{DenomSource, known_denom};
use crate::error::{HistoryError, HistoryResult};
use crate::ledger::DateRange;
use crate::transactions::{Coin, RawTransaction, parse_lcd_tx, parse_mintscan_elem};

// =============================================================================
// Trait
// =============================================================================

/// One page of a wallet's transaction search
#[derive(Debug, Default)]
pub struct TxPage {
    pub transactions: Vec<RawTransaction>,
    /// Records that failed the parse boundary
    pub rejected: Vec<HistoryError>,
    pub next_cursor: Option<String>,
}

#[async_trait]
pub trait IndexerApi: Send + Sync {
    /// Transactions inside `window`, one page per call. `cursor` is the
    /// previous page's `next_cursor`.
    async fn get_txs_page(&self, wallet: &str, window: &DateRange, cursor: Option<&str>) -> HistoryResult<TxPage>;

    /// Base-unit balances as of the last transaction strictly before `before`
    async fn get_balance_at(&self, wallet: &str, before: DateTime<Utc>) -> HistoryResult<HashMap<String, u128>>;

    /// Number of pages the search for `range` spans
    async fn get_pages_count(&self, wallet: &str, range: &DateRange) -> HistoryResult<u64>;

    async fn get_tx(&self, tx_id: &str) -> HistoryResult<Option<RawTransaction>>;

    async fn account_exists(&self, wallet: &str) -> HistoryResult<bool>;

    /// Balance allocated in the genesis file, for chains that launched with one
    async fn get_genesis_allocation(&self, _wallet: &str) -> HistoryResult<Option<Vec<Coin>>> {
        Ok(None)
    }
}

// =============================================================================
// Retrying JSON client
// =============================================================================

#[derive(Clone)]
pub struct RestClient {
    client: Client,
    max_retries: u32,
}

impl RestClient {
    pub fn new(client: Client, max_retries: u32) -> Self {
        Self { client, max_retries }
    }

    /// GET a JSON body. `Ok(None)` on 404.
    pub async fn get_json(
        &self,
        url: Url,
        headers: &[(&str, String)],
        what: &str,
    ) -> HistoryResult<Option<serde_json::Value>> {
        let mut last_error = String::from("no attempt made");
        let mut attempts = 0;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(2u64.pow(attempt));
                sleep(delay).await;
            }
            attempts += 1;

            let mut request = self.client.get(url.clone()).header("Accept", "application/json");
            for (name, value) in headers {
                request = request.header(*name, value);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        match response.text().await {
                            Ok(text) => match serde_json::from_str(&text) {
                                Ok(body) => return Ok(Some(body)),
                                Err(e) => {
                                    last_error = format!("parse error: {}", e);
                                    break;
                                }
                            },
                            Err(e) => last_error = format!("body read failed: {}", e),
                        }
                    } else if status == StatusCode::NOT_FOUND {
                        return Ok(None);
                    } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                        last_error = format!("status {}", status);
                        tracing::debug!("{} returned {} (attempt {})", what, status, attempts);
                    } else {
                        last_error = format!("status {}", status);
                        break;
                    }
                }
                Err(e) => {
                    last_error = format!("request failed: {}", e);
                }
            }
        }

        Err(HistoryError::UpstreamFetch {
            what: what.to_string(),
            attempts,
            reason: last_error,
        })
    }
}

fn build_url(base: &str, params: &[(&str, String)], what: &str) -> HistoryResult<Url> {
    Url::parse_with_params(base, params).map_err(|e| HistoryError::UpstreamFetch {
        what: what.to_string(),
        attempts: 0,
        reason: format!("invalid url {}: {}", base, e),
    })
}

// =============================================================================
// Mintscan + LCD
// =============================================================================

#[derive(Debug, Deserialize)]
struct MintscanPageJson {
    #[serde(default)]
    transactions: Vec<serde_json::Value>,
    #[serde(default)]
    pagination: Option<MintscanPagination>,
}

#[derive(Debug, Deserialize)]
struct MintscanPagination {
    #[serde(rename = "searchAfter", default)]
    search_after: Option<String>,
    #[serde(rename = "totalCount", default)]
    total_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct BalancesJson {
    #[serde(default)]
    balances: Vec<BalanceCoinJson>,
}

#[derive(Debug, Deserialize)]
struct BalanceCoinJson {
    denom: String,
    amount: String,
}

pub struct MintscanClient {
    rest: RestClient,
    chain: Chain,
    mintscan_base: String,
    api_key: Option<String>,
    rest_url: String,
    page_size: u32,
}

impl MintscanClient {
    pub fn new(config: &Config, client: Client) -> Self {
        Self {
            rest: RestClient::new(client, config.max_retries),
            chain: config.chain,
            mintscan_base: config.mintscan_base.trim_end_matches('/').to_string(),
            api_key: config.mintscan_api_key.clone(),
            rest_url: config.rest_url.trim_end_matches('/').to_string(),
            page_size: constants::MINTSCAN_PAGE_SIZE,
        }
    }

    fn auth_headers(&self) -> Vec<(&'static str, String)> {
        match &self.api_key {
            Some(key) => vec![("Authorization", format!("Bearer {}", key))],
            None => Vec::new(),
        }
    }

    async fn search(
        &self,
        wallet: &str,
        window: &DateRange,
        cursor: Option<&str>,
        take: u32,
    ) -> HistoryResult<MintscanPageJson> {
        let what = format!("transactions page for {}", wallet);
        let base = format!(
            "{}/{}/accounts/{}/transactions",
            self.mintscan_base,
            self.chain.mintscan_network(),
            wallet
        );

        let mut params = vec![("take", take.to_string())];
        if let Some(start) = window.start {
            params.push(("fromDateTime", start.format("%Y-%m-%dT%H:%M:%SZ").to_string()));
        }
        if let Some(end) = window.end {
            params.push(("toDateTime", end.format("%Y-%m-%dT%H:%M:%SZ").to_string()));
        }
        if let Some(cursor) = cursor {
            params.push(("searchAfter", cursor.to_string()));
        }

        let url = build_url(&base, &params, &what)?;
        let Some(body) = self.rest.get_json(url, &self.auth_headers(), &what).await? else {
            return Ok(MintscanPageJson {
                transactions: Vec::new(),
                pagination: None,
            });
        };

        serde_json::from_value(body).map_err(|e| HistoryError::UpstreamFetch {
            what,
            attempts: 1,
            reason: format!("unexpected response shape: {}", e),
        })
    }

    /// Bank balances at a block height (`x-cosmos-block-height`)
    async fn balances_at_height(&self, wallet: &str, height: u64) -> Result<HashMap<String, u128>, String> {
        let what = format!("balances of {} at height {}", wallet, height);
        let base = format!("{}/cosmos/bank/v1beta1/balances/{}", self.rest_url, wallet);
        let url = build_url(&base, &[("pagination.limit", "1000".to_string())], &what).map_err(|e| e.to_string())?;
        let headers = [(constants::BLOCK_HEIGHT_HEADER, height.to_string())];

        let body = match self.rest.get_json(url, &headers, &what).await {
            Ok(Some(body)) => body,
            Ok(None) => return Ok(HashMap::new()),
            Err(e) => return Err(e.to_string()),
        };
        let parsed: BalancesJson = serde_json::from_value(body).map_err(|e| format!("unexpected response shape: {}", e))?;

        let mut balances = HashMap::new();
        for coin in parsed.balances {
            let amount = coin
                .amount
                .parse::<u128>()
                .map_err(|e| format!("bad amount '{}' for {}: {}", coin.amount, coin.denom, e))?;
            *balances.entry(coin.denom).or_insert(0) += amount;
        }
        Ok(balances)
    }
}

#[async_trait]
impl IndexerApi for MintscanClient {
    async fn get_txs_page(&self, wallet: &str, window: &DateRange, cursor: Option<&str>) -> HistoryResult<TxPage> {
        let page = self.search(wallet, window, cursor, self.page_size).await?;

        let next_cursor = if page.transactions.is_empty() {
            None
        } else {
            page.pagination.and_then(|p| p.search_after)
        };

        let mut out = TxPage {
            next_cursor,
            ..Default::default()
        };
        for elem in page.transactions {
            match parse_mintscan_elem(elem) {
                // Windows are half-open; the search bounds may be inclusive
                Ok(tx) if window.contains(tx.timestamp) => out.transactions.push(tx),
                Ok(_) => {}
                Err(e) => out.rejected.push(e),
            }
        }

        tracing::debug!(
            "page for {} {}: {} txs, {} rejected",
            wallet,
            window,
            out.transactions.len(),
            out.rejected.len()
        );
        Ok(out)
    }

    async fn get_balance_at(&self, wallet: &str, before: DateTime<Utc>) -> HistoryResult<HashMap<String, u128>> {
        let unavailable = |reason: String| HistoryError::SeedBalanceUnavailable {
            wallet: wallet.to_string(),
            before,
            reason,
        };

        let window = DateRange {
            start: None,
            end: Some(before),
        };
        let page = self
            .search(wallet, &window, None, self.page_size)
            .await
            .map_err(|e| unavailable(e.to_string()))?;

        // Newest transaction strictly before the range start
        let last = page
            .transactions
            .into_iter()
            .filter_map(|elem| parse_mintscan_elem(elem).ok())
            .filter(|tx| tx.timestamp < before)
            .max_by_key(|tx| (tx.timestamp, tx.height));

        let Some(last) = last else {
            // No activity before the range: everything starts at zero
            return Ok(HashMap::new());
        };

        self.balances_at_height(wallet, last.height).await.map_err(unavailable)
    }

    async fn get_pages_count(&self, wallet: &str, range: &DateRange) -> HistoryResult<u64> {
        let first = self.search(wallet, range, None, self.page_size).await?;
        let page_size = u64::from(self.page_size);

        if let Some(total) = first.pagination.as_ref().and_then(|p| p.total_count) {
            return Ok(total.div_ceil(page_size).max(1));
        }

        // No total reported: walk the cursor chain
        let mut pages = 1;
        let mut cursor = first.pagination.and_then(|p| p.search_after);
        let mut last_len = first.transactions.len();
        while let Some(c) = cursor.take() {
            if last_len == 0 {
                break;
            }
            let page = self.search(wallet, range, Some(&c), self.page_size).await?;
            last_len = page.transactions.len();
            if last_len == 0 {
                break;
            }
            pages += 1;
            cursor = page.pagination.and_then(|p| p.search_after);
        }
        Ok(pages)
    }

    async fn get_tx(&self, tx_id: &str) -> HistoryResult<Option<RawTransaction>> {
        let what = format!("transaction {}", tx_id);
        let url = build_url(&format!("{}/cosmos/tx/v1beta1/txs/{}", self.rest_url, tx_id), &[], &what)?;

        match self.rest.get_json(url, &[], &what).await? {
            Some(body) => parse_lcd_tx(body).map(Some),
            None => Ok(None),
        }
    }

    async fn account_exists(&self, wallet: &str) -> HistoryResult<bool> {
        let what = format!("account {}", wallet);
        let url = build_url(&format!("{}/cosmos/auth/v1beta1/accounts/{}", self.rest_url, wallet), &[], &what)?;

        Ok(self.rest.get_json(url, &[], &what).await?.is_some())
    }

    async fn get_genesis_allocation(&self, wallet: &str) -> HistoryResult<Option<Vec<Coin>>> {
        if self.chain.genesis_time().is_none() {
            return Ok(None);
        }

        // The state at height 1 is the genesis allocation
        let balances = self
            .balances_at_height(wallet, 1)
            .await
            .map_err(|reason| HistoryError::UpstreamFetch {
                what: format!("genesis allocation of {}", wallet),
                attempts: 1,
                reason,
            })?;

        let mut coins: Vec<Coin> = balances
            .into_iter()
            .filter(|(_, amount)| *amount > 0)
            .map(|(denom, amount)| Coin { denom, amount })
            .collect();
        coins.sort_by(|a, b| a.denom.cmp(&b.denom));

        Ok((!coins.is_empty()).then_some(coins))
    }
}

// =============================================================================
// Denom metadata from chain REST
// =============================================================================

#[derive(Debug, Deserialize)]
struct DenomTraceJson {
    denom_trace: DenomTrace,
}

#[derive(Debug, Deserialize)]
struct DenomTrace {
    #[serde(default)]
    base_denom: String,
}

#[derive(Debug, Deserialize)]
struct DenomMetadataJson {
    metadata: DenomMetadata,
}

#[derive(Debug, Deserialize)]
struct DenomMetadata {
    #[serde(default)]
    display: String,
    #[serde(default)]
    symbol: String,
    #[serde(default)]
    denom_units: Vec<DenomUnit>,
}

#[derive(Debug, Deserialize)]
struct DenomUnit {
    denom: String,
    #[serde(default)]
    exponent: u32,
}

impl DenomMetadata {
    fn ticker_and_exponent(&self) -> Option<(String, u32)> {
        let ticker = if !self.symbol.is_empty() {
            self.symbol.clone()
        } else if !self.display.is_empty() {
            self.display.to_uppercase()
        } else {
            return None;
        };

        let exponent = self
            .denom_units
            .iter()
            .find(|u| u.denom == self.display)
            .map(|u| u.exponent)
            .or_else(|| self.denom_units.iter().map(|u| u.exponent).max())
            .unwrap_or(0);

        Some((ticker, exponent))
    }
}

/// Resolves IBC hashes through denom traces and everything else through bank
/// denom metadata
pub struct LcdDenomSource {
    rest: RestClient,
    rest_url: String,
}

impl LcdDenomSource {
    pub fn new(config: &Config, client: Client) -> Self {
        Self {
            rest: RestClient::new(client, config.max_retries),
            rest_url: config.rest_url.trim_end_matches('/').to_string(),
        }
    }

    async fn base_denom_of_ibc(&self, hash: &str) -> HistoryResult<Option<String>> {
        let what = format!("denom trace {}", hash);
        let url = build_url(
            &format!("{}/ibc/apps/transfer/v1/denom_traces/{}", self.rest_url, hash),
            &[],
            &what,
        )?;

        let Some(body) = self.rest.get_json(url, &[], &what).await? else {
            return Ok(None);
        };
        Ok(serde_json::from_value::<DenomTraceJson>(body)
            .ok()
            .map(|t| t.denom_trace.base_denom)
            .filter(|b| !b.is_empty()))
    }

    async fn metadata(&self, denom_id: &str) -> HistoryResult<Option<(String, u32)>> {
        let what = format!("denom metadata {}", denom_id);
        let url = build_url(
            &format!("{}/cosmos/bank/v1beta1/denoms_metadata_by_query_string", self.rest_url),
            &[("denom", denom_id.to_string())],
            &what,
        )?;

        let Some(body) = self.rest.get_json(url, &[], &what).await? else {
            return Ok(None);
        };
        Ok(serde_json::from_value::<DenomMetadataJson>(body)
            .ok()
            .and_then(|m| m.metadata.ticker_and_exponent()))
    }
}

#[async_trait]
impl DenomSource for LcdDenomSource {
    async fn lookup_denom(&self, denom_id: &str) -> HistoryResult<Option<(String, u32)>> {
        if let Some(hash) = denom_id.strip_prefix("ibc/")
            && let Some(base) = self.base_denom_of_ibc(hash).await?
            && let Some(info) = known_denom(&base)
        {
            return Ok(Some((info.ticker, info.exponent)));
        }

        self.metadata(denom_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_metadata_prefers_symbol_and_display_exponent() {
        let meta: DenomMetadataJson = serde_json::from_value(json!({
            "metadata": {
                "base": "factory/osmo1abc/milk",
                "display": "milk",
                "symbol": "MILK",
                "denom_units": [
                    { "denom": "factory/osmo1abc/milk", "exponent": 0 },
                    { "denom": "milk", "exponent": 6 }
                ]
            }
        }))
        .unwrap();

        assert_eq!(meta.metadata.ticker_and_exponent(), Some(("MILK".to_string(), 6)));
    }

    #[test]
    fn test_metadata_falls_back_to_display() {
        let meta: DenomMetadataJson = serde_json::from_value(json!({
            "metadata": {
                "display": "tia",
                "denom_units": [{ "denom": "utia", "exponent": 0 }, { "denom": "TIA", "exponent": 6 }]
            }
        }))
        .unwrap();

        assert_eq!(meta.metadata.ticker_and_exponent(), Some(("TIA".to_string(), 6)));

        let empty: DenomMetadataJson = serde_json::from_value(json!({ "metadata": {} })).unwrap();
        assert_eq!(empty.metadata.ticker_and_exponent(), None);
    }

    #[test]
    fn test_build_url_encodes_params() {
        let url = build_url(
            "https://rest.cosmos.directory/osmosis/cosmos/bank/v1beta1/denoms_metadata_by_query_string",
            &[("denom", "factory/osmo1abc/WOSMO".to_string())],
            "test",
        )
        .unwrap();

        assert_eq!(url.query(), Some("denom=factory%2Fosmo1abc%2FWOSMO"));
        assert!(build_url("not a url", &[], "test").is_err());
    }

    #[test]
    fn test_mintscan_page_shape() {
        let page: MintscanPageJson = serde_json::from_value(json!({
            "transactions": [{}, {}],
            "pagination": { "searchAfter": "1702295246000|4889011", "totalCount": 41 }
        }))
        .unwrap();

        assert_eq!(page.transactions.len(), 2);
        let pagination = page.pagination.unwrap();
        assert_eq!(pagination.search_after.as_deref(), Some("1702295246000|4889011"));
        assert_eq!(pagination.total_count.map(|t| t.div_ceil(20)), Some(3));
    }

    /// Serve `response` to every connection on a local port; returns the URL and a hit counter
    async fn serve(response: &'static str) -> (Url, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (Url::parse(&format!("http://{}/txs", addr)).unwrap(), hits)
    }

    fn local_client(max_retries: u32) -> RestClient {
        RestClient::new(Client::builder().no_proxy().build().unwrap(), max_retries)
    }

    #[tokio::test]
    async fn test_undecodable_success_body_is_not_retried() {
        let (url, hits) = serve(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 9\r\nConnection: close\r\n\r\nnot json!",
        )
        .await;

        let err = local_client(3).get_json(url, &[], "page").await.unwrap_err();

        match err {
            HistoryError::UpstreamFetch { attempts, reason, .. } => {
                assert_eq!(attempts, 1);
                assert!(reason.starts_with("parse error"), "{}", reason);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_server_error_is_retried() {
        let (url, hits) = serve("HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n").await;

        let err = local_client(1).get_json(url, &[], "page").await.unwrap_err();

        assert!(matches!(err, HistoryError::UpstreamFetch { attempts: 2, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}

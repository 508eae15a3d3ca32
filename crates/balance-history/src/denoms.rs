//! Denomination registry: chain-native denom ids to display tickers
//!
//! Resolution order is memo (seeded from the cache and the chain's native asset),
//! then the static table of well-known base denoms, then an external
//! [`DenomSource`]. Anything still unresolved is shown under its raw id with
//! exponent 0 so the asset is never dropped from the report.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use bigdecimal::num_bigint::BigInt;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, LazyLock};
use tokio::sync::RwLock;

use crate::error::{HistoryError, HistoryResult, Warnings};

/// Resolved display metadata for a denom
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenomInfo {
    pub denom_id: String,
    pub ticker: String,
    pub exponent: u32,
}

impl DenomInfo {
    pub fn new(denom_id: &str, ticker: &str, exponent: u32) -> Self {
        Self {
            denom_id: denom_id.to_string(),
            ticker: ticker.to_string(),
            exponent,
        }
    }

    /// Fallback for unresolvable denoms: raw id as ticker, no scaling
    pub fn raw(denom_id: &str) -> Self {
        Self::new(denom_id, denom_id, 0)
    }

    /// Convert a signed raw on-chain amount into display units, exactly
    pub fn scale(&self, raw: impl Into<BigInt>) -> BigDecimal {
        BigDecimal::new(raw.into(), i64::from(self.exponent))
    }
}

/// External chain-metadata lookup used on registry misses
#[async_trait]
pub trait DenomSource: Send + Sync {
    /// `Ok(None)` means the source has no entry for the denom
    async fn lookup_denom(&self, denom_id: &str) -> HistoryResult<Option<(String, u32)>>;
}

/// Well-known base denoms across the supported chains
/// Sources: chain registry asset lists
static KNOWN_DENOMS: LazyLock<HashMap<&'static str, (&'static str, u32)>> = LazyLock::new(|| {
    let mut map = HashMap::new();

    // Native staking assets
    add_denom(&mut map, "aarch", "ARCH", 18);
    add_denom(&mut map, "uakt", "AKT", 6);
    add_denom(&mut map, "uatom", "ATOM", 6);
    add_denom(&mut map, "ubtsg", "BTSG", 6);
    add_denom(&mut map, "ucmdx", "CMDX", 6);
    add_denom(&mut map, "aevmos", "EVMOS", 18);
    add_denom(&mut map, "inj", "INJ", 18);
    add_denom(&mut map, "ujuno", "JUNO", 6);
    add_denom(&mut map, "uluna", "LUNA", 6);
    add_denom(&mut map, "untrn", "NTRN", 6);
    add_denom(&mut map, "uosmo", "OSMO", 6);
    add_denom(&mut map, "uscrt", "SCRT", 6);
    add_denom(&mut map, "usomm", "SOMM", 6);
    add_denom(&mut map, "ustars", "STARS", 6);
    add_denom(&mut map, "ustrd", "STRD", 6);
    add_denom(&mut map, "utia", "TIA", 6);
    add_denom(&mut map, "uumee", "UMEE", 6);

    // Stablecoins
    add_denom(&mut map, "uusdc", "USDC", 6);

    // Stride liquid staking tokens
    add_denom(&mut map, "stuatom", "stATOM", 6);
    add_denom(&mut map, "stucmdx", "stCMDX", 6);
    add_denom(&mut map, "staevmos", "stEVMOS", 18);
    add_denom(&mut map, "stinj", "stINJ", 18);
    add_denom(&mut map, "stujuno", "stJUNO", 6);
    add_denom(&mut map, "stuluna", "stLUNA", 6);
    add_denom(&mut map, "stuosmo", "stOSMO", 6);
    add_denom(&mut map, "stusomm", "stSOMM", 6);
    add_denom(&mut map, "stustars", "stSTARS", 6);
    add_denom(&mut map, "stuumee", "stUMEE", 6);
    add_denom(&mut map, "stutia", "stTIA", 6);

    map
});

fn add_denom(
    map: &mut HashMap<&'static str, (&'static str, u32)>,
    denom: &'static str,
    ticker: &'static str,
    exponent: u32,
) {
    map.insert(denom, (ticker, exponent));
}

/// Look up a base denom in the static table
pub fn known_denom(denom_id: &str) -> Option<DenomInfo> {
    KNOWN_DENOMS
        .get(denom_id)
        .map(|(ticker, exponent)| DenomInfo::new(denom_id, ticker, *exponent))
}

/// Base denom at the end of an IBC path (`transfer/channel-0/uatom` -> `uatom`).
/// Factory denoms (`factory/<creator>/<sub>`) are returned unchanged.
pub fn base_of_path(denom: &str) -> &str {
    if denom.starts_with("factory/") || !denom.contains('/') {
        return denom;
    }
    denom.rsplit('/').next().unwrap_or(denom)
}

/// Memoizing, concurrency-safe denom resolver
pub struct DenomRegistry {
    source: Option<Arc<dyn DenomSource>>,
    resolved: RwLock<HashMap<String, DenomInfo>>,
    misses: RwLock<HashSet<String>>,
}

impl DenomRegistry {
    pub fn new(source: Option<Arc<dyn DenomSource>>) -> Self {
        Self {
            source,
            resolved: RwLock::new(HashMap::new()),
            misses: RwLock::new(HashSet::new()),
        }
    }

    /// Seed the memo with previously resolved entries (cache, native asset)
    pub async fn preload(&self, infos: impl IntoIterator<Item = DenomInfo>) {
        let mut resolved = self.resolved.write().await;
        for info in infos {
            resolved.entry(info.denom_id.clone()).or_insert(info);
        }
    }

    /// Resolve a denom, consulting the external source on a memo miss
    pub async fn resolve(&self, denom_id: &str) -> HistoryResult<DenomInfo> {
        if let Some(info) = self.resolved.read().await.get(denom_id) {
            return Ok(info.clone());
        }

        let unknown = || HistoryError::UnknownDenom {
            denom: denom_id.to_string(),
        };

        if self.misses.read().await.contains(denom_id) {
            return Err(unknown());
        }

        let found = match known_denom(denom_id) {
            Some(info) => Some(info),
            None => self.lookup_external(denom_id).await,
        };

        match found {
            Some(info) => {
                self.resolved
                    .write()
                    .await
                    .insert(denom_id.to_string(), info.clone());
                Ok(info)
            }
            None => {
                self.misses.write().await.insert(denom_id.to_string());
                Err(unknown())
            }
        }
    }

    /// Resolve, falling back to the raw denom id (exponent 0).
    /// Warns only the first time a denom misses.
    pub async fn resolve_or_raw(&self, denom_id: &str, warnings: &mut Warnings) -> DenomInfo {
        if self.misses.read().await.contains(denom_id) {
            return DenomInfo::raw(denom_id);
        }
        match self.resolve(denom_id).await {
            Ok(info) => info,
            Err(err) => {
                warnings.push(err);
                DenomInfo::raw(denom_id)
            }
        }
    }

    /// All entries resolved so far, sorted by denom id (for cache write-back)
    pub async fn snapshot(&self) -> Vec<DenomInfo> {
        let mut infos: Vec<DenomInfo> = self.resolved.read().await.values().cloned().collect();
        infos.sort_by(|a, b| a.denom_id.cmp(&b.denom_id));
        infos
    }

    async fn lookup_external(&self, denom_id: &str) -> Option<DenomInfo> {
        let source = self.source.as_ref()?;
        match source.lookup_denom(denom_id).await {
            Ok(Some((ticker, exponent))) => Some(DenomInfo::new(denom_id, &ticker, exponent)),
            Ok(None) => None,
            Err(e) => {
                // Treated as a miss: the caller falls back to the raw id
                tracing::warn!("denom lookup for {} failed: {}", denom_id, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DenomSource for CountingSource {
        async fn lookup_denom(&self, denom_id: &str) -> HistoryResult<Option<(String, u32)>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if denom_id == "ibc/27394FB092D2ECCD56123C74F36E4C1F926001CEADA9CA97EA622B25F41E5EB2" {
                Ok(Some(("ATOM".to_string(), 6)))
            } else {
                Ok(None)
            }
        }
    }

    fn dec(s: &str) -> BigDecimal {
        s.parse().unwrap()
    }

    #[test]
    fn test_scale_applies_exponent() {
        let arch = DenomInfo::new("aarch", "ARCH", 18);
        assert_eq!(arch.scale(150_088_123_545_861_830_000i128), dec("150.08812354586183"));
        assert_eq!(arch.scale(-1), dec("-0.000000000000000001"));

        let raw = DenomInfo::raw("factory/osmo1xyz/WOSMO");
        assert_eq!(raw.scale(2_000_000), dec("2000000"));
    }

    #[test]
    fn test_scale_keeps_every_digit_of_large_amounts() {
        let arch = DenomInfo::new("aarch", "ARCH", 18);
        assert_eq!(
            arch.scale(u128::MAX),
            dec("340282366920938463463.374607431768211455")
        );

        let raw = DenomInfo::raw("factory/osmo1abc/MEME");
        assert_eq!(
            raw.scale(1_000_000_000_000_000_000_000_000_000_000u128),
            dec("1000000000000000000000000000000")
        );

        let wide_exponent = DenomInfo::new("weird", "WEIRD", 40);
        assert_eq!(wide_exponent.scale(1), dec("0.0000000000000000000000000000000000000001"));
    }

    #[test]
    fn test_base_of_path() {
        assert_eq!(base_of_path("transfer/channel-0/uatom"), "uatom");
        assert_eq!(base_of_path("uosmo"), "uosmo");
        assert_eq!(base_of_path("factory/osmo1abc/WOSMO"), "factory/osmo1abc/WOSMO");
    }

    #[tokio::test]
    async fn test_resolve_static_table_without_source() {
        let registry = DenomRegistry::new(None);
        let info = registry.resolve("stuatom").await.unwrap();
        assert_eq!(info.ticker, "stATOM");
        assert_eq!(info.exponent, 6);
    }

    #[tokio::test]
    async fn test_resolve_memoizes_hits_and_misses() {
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
        });
        let registry = DenomRegistry::new(Some(source.clone()));
        let atom = "ibc/27394FB092D2ECCD56123C74F36E4C1F926001CEADA9CA97EA622B25F41E5EB2";

        assert_eq!(registry.resolve(atom).await.unwrap().ticker, "ATOM");
        assert_eq!(registry.resolve(atom).await.unwrap().ticker, "ATOM");
        assert!(registry.resolve("ibc/FFFF").await.is_err());
        assert!(registry.resolve("ibc/FFFF").await.is_err());

        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_resolve_or_raw_falls_back_with_warning() {
        let registry = DenomRegistry::new(None);
        let mut warnings = Warnings::new();
        let denom = "factory/osmo1pfyxruwvtwk00y8z06dh2lqjdj82ldvy74wzm3/WOSMO";

        let info = registry.resolve_or_raw(denom, &mut warnings).await;

        assert_eq!(info, DenomInfo::raw(denom));
        assert_eq!(warnings.len(), 1);

        // Second miss is silent
        let again = registry.resolve_or_raw(denom, &mut warnings).await;
        assert_eq!(again, DenomInfo::raw(denom));
        assert_eq!(warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_preload_wins_over_lookup() {
        let registry = DenomRegistry::new(None);
        registry
            .preload([DenomInfo::new("ibc/ABCD", "USDC", 6)])
            .await;

        assert_eq!(registry.resolve("ibc/ABCD").await.unwrap().ticker, "USDC");
        assert_eq!(registry.snapshot().await.len(), 1);
    }
}

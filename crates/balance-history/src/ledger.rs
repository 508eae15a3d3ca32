//! Balance ledger: ordered replay of deltas into per-ticker running balances
//!
//! Deltas are grouped by exact timestamp and replayed in ascending order. Each
//! group is applied atomically and produces at most one row; the finished rows
//! are returned newest first. Interim state is never observable: `finish`
//! consumes the ledger.

use anyhow::Result;
use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::collections::{BTreeMap, HashSet};

use crate::constants;
use crate::normalizer::{NormalizedDelta, NormalizedTx};

// =============================================================================
// Date range
// =============================================================================

/// Half-open UTC interval `[start, end)`; either side may be open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DateRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Inclusive calendar dates: `end_date` covers the whole day
    pub fn from_dates(start_date: Option<NaiveDate>, end_date: Option<NaiveDate>) -> Result<Self> {
        if let (Some(s), Some(e)) = (start_date, end_date)
            && s > e
        {
            anyhow::bail!("start date {} is after end date {}", s, e);
        }

        let midnight = |d: NaiveDate| d.and_hms_opt(0, 0, 0).map(|t| t.and_utc());
        Ok(Self {
            start: start_date.and_then(midnight),
            end: end_date.and_then(|d| midnight(d + Duration::days(1))),
        })
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start.is_none_or(|s| ts >= s) && self.end.is_none_or(|e| ts < e)
    }

    /// Split into `n` disjoint windows covering the same interval.
    /// An interval open on either side is returned whole.
    pub fn split(&self, n: usize) -> Vec<DateRange> {
        let (Some(start), Some(end)) = (self.start, self.end) else {
            return vec![*self];
        };
        let total = (end - start).num_seconds();
        let n = n.max(1) as i64;
        if total < n {
            return vec![*self];
        }

        let step = total / n;
        (0..n)
            .map(|i| {
                let window_start = start + Duration::seconds(step * i);
                let window_end = if i == n - 1 {
                    end
                } else {
                    start + Duration::seconds(step * (i + 1))
                };
                DateRange {
                    start: Some(window_start),
                    end: Some(window_end),
                }
            })
            .collect()
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fmt = |ts: Option<DateTime<Utc>>| {
            ts.map(|t| t.format(constants::TIMESTAMP_FORMAT).to_string())
                .unwrap_or_else(|| "..".to_string())
        };
        write!(f, "[{}, {})", fmt(self.start), fmt(self.end))
    }
}

// =============================================================================
// Ledger
// =============================================================================

/// Snapshot of running balances immediately after one timestamp group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceRow {
    pub timestamp: DateTime<Utc>,
    pub balances: BTreeMap<String, BigDecimal>,
}

impl BalanceRow {
    pub fn get(&self, ticker: &str) -> Option<&BigDecimal> {
        self.balances.get(ticker)
    }
}

#[derive(Debug, Clone, Default)]
pub struct LedgerOutput {
    /// Newest first
    pub rows: Vec<BalanceRow>,
    /// Column order: seeded tickers, then first appearance in replay order
    pub tickers: Vec<String>,
    pub final_balances: BTreeMap<String, BigDecimal>,
    pub out_of_range: usize,
    pub duplicates: usize,
}

#[derive(Debug, Default)]
pub struct Ledger {
    range: DateRange,
    seed: BTreeMap<String, BigDecimal>,
    groups: BTreeMap<DateTime<Utc>, Vec<NormalizedDelta>>,
    seen_txs: HashSet<String>,
    out_of_range: usize,
    duplicates: usize,
}

impl Ledger {
    pub fn new(range: DateRange) -> Self {
        Self {
            range,
            ..Default::default()
        }
    }

    /// Opening balances at the range start. Zero amounts are ignored.
    pub fn seed(&mut self, balances: impl IntoIterator<Item = (String, BigDecimal)>) {
        for (ticker, amount) in balances {
            *self.seed.entry(ticker).or_default() += amount;
        }
        self.seed.retain(|_, amount| !amount.is_zero());
    }

    pub fn push(&mut self, delta: NormalizedDelta) {
        if !self.range.contains(delta.timestamp) {
            self.out_of_range += 1;
            return;
        }
        self.groups.entry(delta.timestamp).or_default().push(delta);
    }

    pub fn extend(&mut self, deltas: impl IntoIterator<Item = NormalizedDelta>) {
        for delta in deltas {
            self.push(delta);
        }
    }

    /// Add a normalized transaction once. Returns false for a repeated tx id.
    pub fn push_tx(&mut self, tx: &NormalizedTx) -> bool {
        if !self.seen_txs.insert(tx.tx_id.clone()) {
            self.duplicates += 1;
            return false;
        }
        self.extend(tx.deltas.iter().cloned());
        true
    }

    pub fn finish(self) -> LedgerOutput {
        let mut running: BTreeMap<String, BigDecimal> = BTreeMap::new();
        let mut tickers: Vec<String> = Vec::new();

        for (ticker, amount) in self.seed {
            tickers.push(ticker.clone());
            running.insert(ticker, amount);
        }

        let mut rows = Vec::with_capacity(self.groups.len());
        for (timestamp, deltas) in self.groups {
            let mut net: BTreeMap<String, BigDecimal> = BTreeMap::new();
            for delta in deltas {
                *net.entry(delta.denom).or_default() += delta.signed_amount;
            }
            net.retain(|_, amount| !amount.is_zero());
            if net.is_empty() {
                continue;
            }

            // BTreeMap iteration keeps new tickers within a group in sorted order
            for (ticker, amount) in net {
                if !running.contains_key(&ticker) {
                    tickers.push(ticker.clone());
                }
                *running.entry(ticker).or_default() += amount;
            }

            rows.push(BalanceRow {
                timestamp,
                balances: running.clone(),
            });
        }

        rows.reverse();

        LedgerOutput {
            rows,
            tickers,
            final_balances: running,
            out_of_range: self.out_of_range,
            duplicates: self.duplicates,
        }
    }
}

/// Replay deltas with no range, no seed and no dedup
pub fn ingest_all(deltas: impl IntoIterator<Item = NormalizedDelta>) -> Vec<BalanceRow> {
    let mut ledger = Ledger::new(DateRange::unbounded());
    ledger.extend(deltas);
    ledger.finish().rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::denoms::DenomInfo;
    use crate::error::Warnings;
    use crate::normalizer::DeltaKind;
    use chrono::TimeZone;

    fn ts(day: u32, secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 0, 0, secs).unwrap()
    }

    fn dec(s: &str) -> BigDecimal {
        s.parse().unwrap()
    }

    fn delta(at: DateTime<Utc>, denom: &str, amount: BigDecimal) -> NormalizedDelta {
        NormalizedDelta::new(at, denom, amount, DeltaKind::Movement)
    }

    fn sample() -> Vec<NormalizedDelta> {
        vec![
            delta(ts(1, 0), "ATOM", dec("10")),
            delta(ts(2, 0), "ATOM", dec("-2.5")),
            delta(ts(2, 0), "OSMO", dec("100")),
            delta(ts(3, 0), "OSMO", dec("-0.000001")),
            delta(ts(5, 0), "ATOM", dec("1.25")),
        ]
    }

    #[test]
    fn test_rows_are_descending_running_balances() {
        let rows = ingest_all(sample());

        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].timestamp, ts(5, 0));
        assert_eq!(rows[0].get("ATOM"), Some(&dec("8.75")));
        assert_eq!(rows[0].get("OSMO"), Some(&dec("99.999999")));
        assert_eq!(rows[3].get("ATOM"), Some(&dec("10")));
        assert_eq!(rows[3].get("OSMO"), None);
    }

    #[test]
    fn test_monotonic_consistency() {
        let deltas = sample();
        let rows = ingest_all(deltas.clone());

        // Oldest to newest: each row is the previous row plus its group's deltas
        let ascending: Vec<&BalanceRow> = rows.iter().rev().collect();
        for pair in ascending.windows(2) {
            let (prev, next) = (pair[0], pair[1]);
            let mut expected = prev.balances.clone();
            for d in deltas.iter().filter(|d| d.timestamp == next.timestamp) {
                *expected.entry(d.denom.clone()).or_default() += &d.signed_amount;
            }
            assert_eq!(next.balances, expected);
        }
    }

    #[test]
    fn test_order_invariance() {
        let forward = ingest_all(sample());

        let mut reversed = sample();
        reversed.reverse();
        assert_eq!(ingest_all(reversed), forward);

        let mut rotated = sample();
        rotated.rotate_left(2);
        assert_eq!(ingest_all(rotated), forward);
    }

    #[test]
    fn test_same_timestamp_is_one_atomic_row() {
        let at = ts(7, 30);
        let rows = ingest_all(vec![
            delta(at, "ATOM", dec("1")),
            delta(at, "ATOM", dec("2")),
            delta(at, "TIA", dec("3")),
        ]);

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("ATOM"), Some(&dec("3")));
        assert_eq!(rows[0].get("TIA"), Some(&dec("3")));
    }

    #[test]
    fn test_zero_effect_group_emits_no_row() {
        let rows = ingest_all(vec![
            delta(ts(1, 0), "ATOM", dec("5")),
            delta(ts(2, 0), "ATOM", dec("1")),
            delta(ts(2, 0), "ATOM", dec("-1")),
            delta(ts(3, 0), "ATOM", dec("0")),
        ]);

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].timestamp, ts(1, 0));
    }

    #[test]
    fn test_decimal_precision() {
        let deltas = (0..10_000).map(|i| delta(ts(1, 0) + Duration::seconds(i), "ATOM", dec("0.1")));
        let rows = ingest_all(deltas);

        assert_eq!(rows.len(), 10_000);
        assert_eq!(rows[0].get("ATOM"), Some(&dec("1000.0")));
    }

    #[test]
    fn test_sums_past_u96_do_not_overflow() {
        let meme = DenomInfo::raw("factory/osmo1abc/MEME");
        let amount = meme.scale(60_000_000_000_000_000_000_000_000_000u128);
        let rows = ingest_all(vec![
            delta(ts(1, 0), &meme.ticker, amount.clone()),
            delta(ts(2, 0), &meme.ticker, amount),
        ]);

        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[0].get(&meme.ticker),
            Some(&dec("120000000000000000000000000000"))
        );
    }

    #[test]
    fn test_large_18_decimal_balance_keeps_last_digit() {
        let arch = DenomInfo::new("aarch", "ARCH", 18);
        let half = arch.scale(50_000_000_000_000_000_000_000_000_001u128);
        assert_eq!(half, dec("50000000000.000000000000000001"));

        let rows = ingest_all(vec![
            delta(ts(1, 0), "ARCH", half.clone()),
            delta(ts(2, 0), "ARCH", half),
            delta(ts(3, 0), "ARCH", arch.scale(-1)),
        ]);

        assert_eq!(rows[2].get("ARCH"), Some(&dec("50000000000.000000000000000001")));
        assert_eq!(rows[1].get("ARCH"), Some(&dec("100000000000.000000000000000002")));
        assert_eq!(rows[0].get("ARCH"), Some(&dec("100000000000.000000000000000001")));
    }

    #[test]
    fn test_seed_emits_no_row_and_orders_columns() {
        let mut ledger = Ledger::new(DateRange::unbounded());
        ledger.seed([
            ("OSMO".to_string(), dec("1")),
            ("ATOM".to_string(), dec("2")),
            ("JUNO".to_string(), dec("0")),
        ]);
        ledger.push(delta(ts(1, 0), "TIA", dec("4")));

        let out = ledger.finish();

        assert_eq!(out.rows.len(), 1);
        assert_eq!(out.tickers, vec!["ATOM", "OSMO", "TIA"]);
        assert_eq!(out.rows[0].get("ATOM"), Some(&dec("2")));
        assert_eq!(out.rows[0].get("JUNO"), None);
    }

    #[test]
    fn test_seed_only_produces_no_rows() {
        let mut ledger = Ledger::new(DateRange::unbounded());
        ledger.seed([("ATOM".to_string(), dec("2"))]);
        let out = ledger.finish();

        assert!(out.rows.is_empty());
        assert_eq!(out.final_balances.get("ATOM"), Some(&dec("2")));
    }

    #[test]
    fn test_range_filter_and_dedup() {
        let range = DateRange::from_dates(NaiveDate::from_ymd_opt(2024, 1, 2), NaiveDate::from_ymd_opt(2024, 1, 3))
            .unwrap();
        let mut ledger = Ledger::new(range);

        let tx = NormalizedTx {
            tx_id: "A".to_string(),
            timestamp: ts(3, 59),
            deltas: vec![delta(ts(3, 59), "ATOM", dec("1"))],
            cross_chain: Vec::new(),
            warnings: Warnings::new(),
        };
        assert!(ledger.push_tx(&tx));
        assert!(!ledger.push_tx(&tx));
        ledger.push(delta(ts(1, 0), "ATOM", dec("1")));
        ledger.push(delta(ts(4, 0), "ATOM", dec("1")));

        let out = ledger.finish();
        assert_eq!(out.rows.len(), 1);
        assert_eq!(out.duplicates, 1);
        assert_eq!(out.out_of_range, 2);
    }

    #[test]
    fn test_date_range_bounds_and_split() {
        let range = DateRange::from_dates(NaiveDate::from_ymd_opt(2023, 12, 10), NaiveDate::from_ymd_opt(2024, 1, 20))
            .unwrap();
        assert!(range.contains(Utc.with_ymd_and_hms(2023, 12, 10, 0, 0, 0).unwrap()));
        assert!(range.contains(Utc.with_ymd_and_hms(2024, 1, 20, 23, 59, 59).unwrap()));
        assert!(!range.contains(Utc.with_ymd_and_hms(2024, 1, 21, 0, 0, 0).unwrap()));

        let windows = range.split(4);
        assert_eq!(windows.len(), 4);
        assert_eq!(windows[0].start, range.start);
        assert_eq!(windows[3].end, range.end);
        for pair in windows.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }

        assert_eq!(DateRange::unbounded().split(4).len(), 1);
        assert!(DateRange::from_dates(NaiveDate::from_ymd_opt(2024, 2, 1), NaiveDate::from_ymd_opt(2024, 1, 1)).is_err());
    }
}

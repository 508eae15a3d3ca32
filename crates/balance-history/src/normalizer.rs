//! Transaction normalizer: one raw transaction -> wallet-relative balance deltas
//!
//! Amounts are summed per denom in base units first, then resolved and scaled,
//! so a transaction yields at most one delta per ticker (per kind when fees are
//! kept separate). Failed transactions yield nothing.

use bigdecimal::num_bigint::BigInt;
use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::addresses::{AddressBook, AddressClass};
use crate::config::FeePolicy;
use crate::denoms::{DenomRegistry, base_of_path};
use crate::error::{HistoryError, Warnings};
use crate::transactions::RawTransaction;

/// Origin of a delta within its transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DeltaKind {
    Movement,
    Fee,
}

impl std::fmt::Display for DeltaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeltaKind::Movement => write!(f, "movement"),
            DeltaKind::Fee => write!(f, "fee"),
        }
    }
}

/// Signed, exponent-scaled change of one asset (+ received, - sent)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedDelta {
    pub timestamp: DateTime<Utc>,
    pub denom: String,
    pub signed_amount: BigDecimal,
    pub kind: DeltaKind,
}

impl NormalizedDelta {
    pub fn new(timestamp: DateTime<Utc>, denom: &str, signed_amount: BigDecimal, kind: DeltaKind) -> Self {
        Self {
            timestamp,
            denom: denom.to_string(),
            signed_amount,
            kind,
        }
    }
}

/// IBC transfer between the wallet and one of its own accounts on another chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrossChainTransfer {
    pub counterparty: String,
    pub ticker: String,
    pub signed_amount: BigDecimal,
}

/// Result of normalizing one transaction
#[derive(Debug, Clone)]
pub struct NormalizedTx {
    pub tx_id: String,
    pub timestamp: DateTime<Utc>,
    pub deltas: Vec<NormalizedDelta>,
    pub cross_chain: Vec<CrossChainTransfer>,
    pub warnings: Warnings,
}

/// Per-run normalizer bound to the tracked wallet
pub struct Normalizer<'a> {
    wallet: &'a str,
    registry: &'a DenomRegistry,
    fee_policy: FeePolicy,
}

impl<'a> Normalizer<'a> {
    pub fn new(wallet: &'a str, registry: &'a DenomRegistry, fee_policy: FeePolicy) -> Self {
        Self {
            wallet,
            registry,
            fee_policy,
        }
    }

    pub async fn normalize(&self, tx: &RawTransaction, book: &mut AddressBook) -> NormalizedTx {
        let mut out = NormalizedTx {
            tx_id: tx.id.clone(),
            timestamp: tx.timestamp,
            deltas: Vec::new(),
            cross_chain: Vec::new(),
            warnings: Warnings::new(),
        };

        if tx.failed {
            tracing::debug!("skipping failed transaction {}", tx.id);
            return out;
        }

        for reason in &tx.malformed {
            out.warnings.push(HistoryError::MalformedEntry {
                tx_id: tx.id.clone(),
                reason: reason.clone(),
            });
        }

        // Base-unit sums keyed by (denom id, kind), in first-seen order
        let mut sums: Vec<(String, DeltaKind, BigInt)> = Vec::new();

        for movement in &tx.movements {
            let sent = movement.sender == self.wallet;
            let received = movement.receiver == self.wallet;
            if !sent && !received {
                continue;
            }

            let amount = BigInt::from(movement.amount);
            if sent && !received {
                book.observe(&movement.receiver);
                add_sum(&mut sums, &movement.denom, DeltaKind::Movement, -amount);
            } else if received && !sent {
                book.observe(&movement.sender);
                add_sum(&mut sums, &movement.denom, DeltaKind::Movement, amount);
            }
        }

        if let Some(fee) = &tx.fee
            && fee.payer.as_deref() == Some(self.wallet)
        {
            let kind = match self.fee_policy {
                FeePolicy::Inline => DeltaKind::Movement,
                FeePolicy::Separate => DeltaKind::Fee,
            };
            for coin in &fee.coins {
                add_sum(&mut sums, &coin.denom, kind, -BigInt::from(coin.amount));
            }
        }

        for (denom_id, kind, raw) in sums {
            if raw.is_zero() {
                continue;
            }
            let info = self.registry.resolve_or_raw(&denom_id, &mut out.warnings).await;
            let amount = info.scale(raw);
            merge_delta(&mut out.deltas, tx.timestamp, &info.ticker, kind, amount);
        }
        out.deltas.retain(|d| !d.signed_amount.is_zero());

        for transfer in &tx.ibc_transfers {
            let (counterparty, outgoing) = if transfer.sender == self.wallet {
                (&transfer.receiver, true)
            } else if transfer.receiver == self.wallet {
                (&transfer.sender, false)
            } else {
                continue;
            };

            if book.observe(counterparty) != AddressClass::SelfAccount {
                continue;
            }

            let raw = BigInt::from(transfer.amount);
            let info = self
                .registry
                .resolve_or_raw(base_of_path(&transfer.denom), &mut out.warnings)
                .await;
            let signed_amount = info.scale(if outgoing { -raw } else { raw });
            out.cross_chain.push(CrossChainTransfer {
                counterparty: counterparty.clone(),
                ticker: info.ticker,
                signed_amount,
            });
        }

        out
    }
}

fn add_sum(sums: &mut Vec<(String, DeltaKind, BigInt)>, denom: &str, kind: DeltaKind, amount: BigInt) {
    match sums.iter_mut().find(|(d, k, _)| d == denom && *k == kind) {
        Some((_, _, total)) => *total += amount,
        None => sums.push((denom.to_string(), kind, amount)),
    }
}

/// Denoms resolving to the same ticker (e.g. two IBC paths of ATOM) share one delta
fn merge_delta(
    deltas: &mut Vec<NormalizedDelta>,
    timestamp: DateTime<Utc>,
    ticker: &str,
    kind: DeltaKind,
    amount: BigDecimal,
) {
    match deltas.iter_mut().find(|d| d.denom == ticker && d.kind == kind) {
        Some(existing) => existing.signed_amount += amount,
        None => deltas.push(NormalizedDelta::new(timestamp, ticker, amount, kind)),
    }
}

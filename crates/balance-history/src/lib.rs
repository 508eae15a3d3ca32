//! Historical per-denomination balance reconstruction for Cosmos wallets
//!
//! Transactions are pulled from an indexer ([`indexer::IndexerApi`]), normalized
//! into wallet-relative deltas ([`normalizer`]) and replayed by the
//! [`ledger::Ledger`] into a descending table of running balances.

pub mod addresses;
pub mod cache;
pub mod chains;
pub mod config;
pub mod constants;
pub mod denoms;
pub mod error;
pub mod history;
pub mod http;
pub mod indexer;
pub mod ledger;
pub mod normalizer;
pub mod reports;
pub mod transactions;

pub use error::{HistoryError, HistoryResult, Warnings};

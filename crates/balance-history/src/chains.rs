//! Supported Cosmos chains and their native asset metadata

use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::constants;
use crate::denoms::DenomInfo;

/// Chains the balance history can be computed for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Chain {
    Akash,
    Archway,
    Celestia,
    CosmosHub,
    Evmos,
    Juno,
    Osmosis,
    Stride,
}

impl Chain {
    pub const ALL: [Chain; 8] = [
        Chain::Akash,
        Chain::Archway,
        Chain::Celestia,
        Chain::CosmosHub,
        Chain::Evmos,
        Chain::Juno,
        Chain::Osmosis,
        Chain::Stride,
    ];

    /// Display ticker of the native asset
    pub fn ticker(self) -> &'static str {
        match self {
            Chain::Akash => "AKT",
            Chain::Archway => "ARCH",
            Chain::Celestia => "TIA",
            Chain::CosmosHub => "ATOM",
            Chain::Evmos => "EVMOS",
            Chain::Juno => "JUNO",
            Chain::Osmosis => "OSMO",
            Chain::Stride => "STRD",
        }
    }

    /// On-chain base denom of the native asset (also the fee denom)
    pub fn native_denom(self) -> &'static str {
        match self {
            Chain::Akash => "uakt",
            Chain::Archway => "aarch",
            Chain::Celestia => "utia",
            Chain::CosmosHub => "uatom",
            Chain::Evmos => "aevmos",
            Chain::Juno => "ujuno",
            Chain::Osmosis => "uosmo",
            Chain::Stride => "ustrd",
        }
    }

    pub fn exponent(self) -> u32 {
        match self {
            Chain::Archway | Chain::Evmos => 18,
            _ => 6,
        }
    }

    /// Human-readable part of account addresses
    pub fn bech32_prefix(self) -> &'static str {
        match self {
            Chain::Akash => "akash",
            Chain::Archway => "archway",
            Chain::Celestia => "celestia",
            Chain::CosmosHub => "cosmos",
            Chain::Evmos => "evmos",
            Chain::Juno => "juno",
            Chain::Osmosis => "osmo",
            Chain::Stride => "stride",
        }
    }

    /// Network segment in Mintscan API paths
    pub fn mintscan_network(self) -> &'static str {
        match self {
            Chain::CosmosHub => "cosmos",
            _ => self.registry_name(),
        }
    }

    /// Chain registry name (used by the REST proxy)
    pub fn registry_name(self) -> &'static str {
        match self {
            Chain::Akash => "akash",
            Chain::Archway => "archway",
            Chain::Celestia => "celestia",
            Chain::CosmosHub => "cosmoshub",
            Chain::Evmos => "evmos",
            Chain::Juno => "juno",
            Chain::Osmosis => "osmosis",
            Chain::Stride => "stride",
        }
    }

    /// Default REST (LCD) endpoint
    pub fn default_rest_url(self) -> String {
        format!("{}/{}", constants::REST_DIRECTORY_BASE, self.registry_name())
    }

    /// Genesis time for chains whose genesis allocation is reported as an airdrop
    pub fn genesis_time(self) -> Option<DateTime<Utc>> {
        match self {
            Chain::Celestia => Utc.with_ymd_and_hms(2023, 10, 31, 14, 0, 0).single(),
            _ => None,
        }
    }

    pub fn native_denom_info(self) -> DenomInfo {
        DenomInfo::new(self.native_denom(), self.ticker(), self.exponent())
    }

    /// Infer the chain from an account address prefix
    pub fn from_address(address: &str) -> Option<Chain> {
        let (prefix, _) = address.rsplit_once('1')?;
        Chain::ALL.into_iter().find(|c| c.bech32_prefix() == prefix)
    }
}

impl std::fmt::Display for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.ticker())
    }
}

impl FromStr for Chain {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        Chain::ALL
            .into_iter()
            .find(|c| {
                c.ticker().eq_ignore_ascii_case(wanted)
                    || c.registry_name().eq_ignore_ascii_case(wanted)
                    || c.mintscan_network().eq_ignore_ascii_case(wanted)
            })
            .ok_or_else(|| {
                let known: Vec<&str> = Chain::ALL.iter().map(|c| c.ticker()).collect();
                anyhow::anyhow!("Unsupported chain '{}' (expected one of {})", s, known.join(", "))
            })
    }
}

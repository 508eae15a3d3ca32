//! Counterparty address classification
//!
//! Every address encountered in a transfer is classified relative to the tracked
//! wallet. Classes only move "up": `Unknown` may become `KnownExternal`, and
//! `SelfAccount` is final. Reclassification never rewrites deltas that were
//! already emitted.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::config::Config;

/// Address classification relative to the tracked wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AddressClass {
    /// Unclassified counterparty
    Unknown,
    /// Module account, exchange, contract, or a configured label
    KnownExternal,
    /// The wallet itself, or the same key on another chain
    SelfAccount,
}

impl std::fmt::Display for AddressClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressClass::Unknown => write!(f, "Unknown"),
            AddressClass::KnownExternal => write!(f, "KnownExternal"),
            AddressClass::SelfAccount => write!(f, "SelfAccount"),
        }
    }
}

impl FromStr for AddressClass {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "Unknown" => Ok(AddressClass::Unknown),
            "KnownExternal" => Ok(AddressClass::KnownExternal),
            "SelfAccount" => Ok(AddressClass::SelfAccount),
            _ => anyhow::bail!("Invalid address class: {}", s),
        }
    }
}

/// Cosmos SDK module accounts, keyed by bech32 payload so they match on every chain.
/// Module addresses derive from the module name only, never from the chain.
static MODULE_ACCOUNTS: LazyLock<HashMap<String, &'static str>> = LazyLock::new(|| {
    let mut map = HashMap::new();

    add_module(&mut map, "cosmos17xpfvakm2amg962yls6f84z3kell8c5lserqta", "Fee Collector");
    add_module(&mut map, "cosmos1jv65s3grqf6v6jl3dp4t6c9t9rk99cd88lyufl", "Distribution");
    add_module(&mut map, "cosmos1fl48vsnmsdzcv85q5d2q4z5ajdha8yu34mf0eh", "Bonded Tokens Pool");
    add_module(&mut map, "cosmos1tygms3xhhs3yv487phx3dw4a95jn7t7lpm470r", "Not Bonded Tokens Pool");
    add_module(&mut map, "cosmos10d07y265gmmuvt4z0w9aw880jnsr700j6zn9kn", "Governance");
    add_module(&mut map, "cosmos1m3h30wlvsf8llruxtpukdvsy0km2kum8g38c8q", "Mint");

    map
});

fn add_module(map: &mut HashMap<String, &'static str>, address: &str, name: &'static str) {
    if let Some(payload) = bech32_payload(address) {
        map.insert(payload.to_string(), name);
    }
}

/// Data part of a bech32 address without prefix and 6-char checksum.
/// Identical for the same key under different chain prefixes.
pub fn bech32_payload(address: &str) -> Option<&str> {
    let (prefix, data) = address.rsplit_once('1')?;
    if prefix.is_empty() || data.len() <= 6 {
        return None;
    }
    Some(&data[..data.len() - 6])
}

/// Name of the module account at this address, on any chain
pub fn module_account_name(address: &str) -> Option<&'static str> {
    bech32_payload(address).and_then(|p| MODULE_ACCOUNTS.get(p).copied())
}

/// Mutable classification map for one tracked wallet
#[derive(Debug, Clone)]
pub struct AddressBook {
    wallet: String,
    wallet_payload: Option<String>,
    classes: HashMap<String, AddressClass>,
    labels: HashMap<String, String>,
}

impl AddressBook {
    pub fn new(wallet: &str, config: &Config) -> Self {
        let mut book = Self {
            wallet: wallet.to_string(),
            wallet_payload: bech32_payload(wallet).map(str::to_string),
            classes: HashMap::new(),
            labels: HashMap::new(),
        };

        book.classes.insert(wallet.to_string(), AddressClass::SelfAccount);
        for address in &config.self_addresses {
            book.mark_self(address);
        }
        for (address, label) in &config.known_addresses {
            book.mark_known_external(address);
            book.labels.insert(address.clone(), label.clone());
        }

        book
    }

    /// Current class of an address without recording it
    pub fn classify(&self, address: &str) -> AddressClass {
        self.classes
            .get(address)
            .copied()
            .unwrap_or_else(|| self.derive(address))
    }

    /// Record an encountered counterparty and return its class
    pub fn observe(&mut self, address: &str) -> AddressClass {
        let derived = self.derive(address);
        let entry = self.classes.entry(address.to_string()).or_insert(derived);
        if derived > *entry {
            *entry = derived;
        }
        *entry
    }

    pub fn mark_self(&mut self, address: &str) {
        self.classes.insert(address.to_string(), AddressClass::SelfAccount);
    }

    /// Upgrade to `KnownExternal`. Returns false if the address is already `SelfAccount`.
    pub fn mark_known_external(&mut self, address: &str) -> bool {
        let entry = self
            .classes
            .entry(address.to_string())
            .or_insert(AddressClass::Unknown);
        match *entry {
            AddressClass::SelfAccount => false,
            _ => {
                *entry = AddressClass::KnownExternal;
                true
            }
        }
    }

    /// Merge persisted classes; never downgrades an existing class
    pub fn load(&mut self, entries: impl IntoIterator<Item = (String, AddressClass)>) {
        for (address, class) in entries {
            let entry = self.classes.entry(address).or_insert(class);
            if class > *entry {
                *entry = class;
            }
        }
    }

    /// Snapshot for persistence, sorted by address
    pub fn entries(&self) -> Vec<(String, AddressClass)> {
        let mut entries: Vec<(String, AddressClass)> =
            self.classes.iter().map(|(a, c)| (a.clone(), *c)).collect();
        entries.sort();
        entries
    }

    /// Human-readable label: configured label, module name, or shortened address
    pub fn label(&self, address: &str) -> String {
        if let Some(label) = self.labels.get(address) {
            return label.clone();
        }
        if let Some(name) = module_account_name(address) {
            return name.to_string();
        }
        shorten_address(address)
    }

    fn derive(&self, address: &str) -> AddressClass {
        if address == self.wallet {
            return AddressClass::SelfAccount;
        }
        let payload = bech32_payload(address);
        if payload.is_some() && payload == self.wallet_payload.as_deref() {
            return AddressClass::SelfAccount;
        }
        if module_account_name(address).is_some() {
            return AddressClass::KnownExternal;
        }
        AddressClass::Unknown
    }
}

/// First 10 and last 4 characters of a long address
pub fn shorten_address(addr: &str) -> String {
    let chars: Vec<char> = addr.chars().collect();
    if chars.len() <= 16 {
        return addr.to_string();
    }
    let head: String = chars[..10].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

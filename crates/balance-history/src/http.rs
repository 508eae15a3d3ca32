//! Shared reqwest client
//!
//! System proxy detection can panic on some macOS setups, so it is skipped
//! there unless a proxy is actually configured. `BALANCE_HISTORY_PROXY`
//! (`on` / `off`) overrides the heuristic.

use reqwest::Client;
use std::time::Duration;

use crate::constants;

const PROXY_ENV_VARS: [&str; 6] = ["HTTP_PROXY", "HTTPS_PROXY", "ALL_PROXY", "http_proxy", "https_proxy", "all_proxy"];

pub fn new_http_client() -> Client {
    let mut builder = Client::builder()
        .timeout(Duration::from_secs(constants::HTTP_TIMEOUT_SECS))
        .user_agent(concat!("balance-history/", env!("CARGO_PKG_VERSION")));

    let override_mode = std::env::var("BALANCE_HISTORY_PROXY").ok();
    let proxy_configured = PROXY_ENV_VARS.iter().any(|key| std::env::var_os(key).is_some());
    if !use_system_proxy(cfg!(target_os = "macos"), override_mode.as_deref(), proxy_configured) {
        builder = builder.no_proxy();
    }

    builder.build().unwrap_or_else(|err| {
        tracing::warn!("custom HTTP client failed to build ({}); using defaults", err);
        Client::new()
    })
}

fn use_system_proxy(macos: bool, override_mode: Option<&str>, proxy_configured: bool) -> bool {
    match override_mode {
        Some("on") => true,
        Some("off") => false,
        _ => !macos || proxy_configured,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_heuristic() {
        assert!(use_system_proxy(false, None, false));
        assert!(!use_system_proxy(true, None, false));
        assert!(use_system_proxy(true, None, true));
        assert!(use_system_proxy(true, Some("on"), false));
        assert!(!use_system_proxy(false, Some("off"), true));
    }
}

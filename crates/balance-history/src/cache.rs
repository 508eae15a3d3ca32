//! SQLite caching for resolved denoms and address classifications
//!
//! Denom metadata never changes once resolved, so it is shared across wallets.
//! Address classes are scoped per tracked wallet. The cache is an accelerator
//! only: callers treat every failure here as a cold start.

use anyhow::{Context, Result};
use sqlx::{FromRow, SqlitePool};
use std::path::Path;

use crate::addresses::AddressClass;
use crate::denoms::DenomInfo;

/// Cache database wrapper
pub struct Cache {
    pool: SqlitePool,
}

/// Row type for denoms query
#[derive(FromRow)]
struct DenomRow {
    denom_id: String,
    ticker: String,
    exponent: i64,
}

/// Row type for address classes query
#[derive(FromRow)]
struct AddressClassRow {
    address: String,
    class: String,
}

impl Cache {
    /// Open or create cache database
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        // SQLx requires the file to exist for SQLite
        if !path.exists() {
            std::fs::File::create(path)?;
        }

        let url = format!("sqlite:{}", path.display());
        let pool = SqlitePool::connect(&url)
            .await
            .context("Failed to open cache database")?;

        // WAL + busy timeout: concurrent runs share one cache file
        sqlx::query("PRAGMA journal_mode=WAL").execute(&pool).await?;
        sqlx::query("PRAGMA busy_timeout=5000").execute(&pool).await?;

        let cache = Self { pool };
        cache.init_schema().await?;

        Ok(cache)
    }

    /// Initialize database schema
    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            "
            -- Resolved denom metadata
            CREATE TABLE IF NOT EXISTS denoms (
                denom_id TEXT PRIMARY KEY,
                ticker TEXT NOT NULL,
                exponent INTEGER NOT NULL,
                fetched_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "
            -- Counterparty classes, one set per tracked wallet
            CREATE TABLE IF NOT EXISTS address_classes (
                scope TEXT NOT NULL,
                address TEXT NOT NULL,
                class TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (scope, address)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "
            CREATE TABLE IF NOT EXISTS metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // =========================================================================
    // Denoms
    // =========================================================================

    pub async fn get_denoms(&self) -> Result<Vec<DenomInfo>> {
        let rows: Vec<DenomRow> = sqlx::query_as("SELECT denom_id, ticker, exponent FROM denoms ORDER BY denom_id")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|r| {
                let exponent = u32::try_from(r.exponent).ok()?;
                Some(DenomInfo {
                    denom_id: r.denom_id,
                    ticker: r.ticker,
                    exponent,
                })
            })
            .collect())
    }

    /// Store resolved denoms (in a transaction for atomicity)
    pub async fn store_denoms(&self, denoms: &[DenomInfo]) -> Result<()> {
        if denoms.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for denom in denoms {
            sqlx::query("INSERT OR REPLACE INTO denoms (denom_id, ticker, exponent) VALUES (?, ?, ?)")
                .bind(&denom.denom_id)
                .bind(&denom.ticker)
                .bind(i64::from(denom.exponent))
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    // =========================================================================
    // Address classes
    // =========================================================================

    pub async fn get_address_classes(&self, scope: &str) -> Result<Vec<(String, AddressClass)>> {
        let rows: Vec<AddressClassRow> =
            sqlx::query_as("SELECT address, class FROM address_classes WHERE scope = ? ORDER BY address")
                .bind(scope)
                .fetch_all(&self.pool)
                .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            match row.class.parse::<AddressClass>() {
                Ok(class) => entries.push((row.address, class)),
                Err(e) => tracing::warn!("ignoring cached class for {}: {}", row.address, e),
            }
        }
        Ok(entries)
    }

    /// Store address classes. Stored classes are never downgraded.
    pub async fn store_address_classes(&self, scope: &str, entries: &[(String, AddressClass)]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for (address, class) in entries {
            sqlx::query(
                "INSERT INTO address_classes (scope, address, class) VALUES (?, ?, ?)
                 ON CONFLICT (scope, address) DO UPDATE SET
                   class = excluded.class,
                   updated_at = datetime('now')
                 WHERE address_classes.class != 'SelfAccount'
                   AND NOT (address_classes.class = 'KnownExternal' AND excluded.class = 'Unknown')",
            )
            .bind(scope)
            .bind(address)
            .bind(class.to_string())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    // =========================================================================
    // Metadata
    // =========================================================================

    pub async fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM metadata WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(v,)| v))
    }

    pub async fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO metadata (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // =========================================================================
    // Utilities
    // =========================================================================

    /// Get cache statistics
    pub async fn stats(&self) -> Result<CacheStats> {
        let denoms: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM denoms")
            .fetch_one(&self.pool)
            .await?;
        let addresses: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM address_classes")
            .fetch_one(&self.pool)
            .await?;
        let wallets: (i64,) = sqlx::query_as("SELECT COUNT(DISTINCT scope) FROM address_classes")
            .fetch_one(&self.pool)
            .await?;

        Ok(CacheStats {
            denoms: denoms.0 as u64,
            addresses: addresses.0 as u64,
            wallets: wallets.0 as u64,
            last_run: self.get_metadata(LAST_RUN_KEY).await?,
        })
    }
}

/// Metadata key holding the timestamp of the last completed run
pub const LAST_RUN_KEY: &str = "last_run";

/// Cache statistics
#[derive(Debug)]
pub struct CacheStats {
    pub denoms: u64,
    pub addresses: u64,
    pub wallets: u64,
    pub last_run: Option<String>,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} denoms, {} addresses across {} wallets, last run: {}",
            self.denoms,
            self.addresses,
            self.wallets,
            self.last_run.as_deref().unwrap_or("never")
        )
    }
}

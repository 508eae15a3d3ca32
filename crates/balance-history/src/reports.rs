//! Report generation (fixed-width table, CSV outputs and console summary)

use anyhow::Result;
use bigdecimal::BigDecimal;
use csv::Writer;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::constants;
use crate::error::HistoryError;
use crate::history::HistoryReport;
use crate::ledger::BalanceRow;
use crate::normalizer::NormalizedTx;

/// Full-precision display form (`150.0800` -> `150.08`)
pub fn format_decimal(value: &BigDecimal) -> String {
    value.normalized().to_plain_string()
}

fn format_timestamp(row: &BalanceRow) -> String {
    row.timestamp.format(constants::TIMESTAMP_FORMAT).to_string()
}

// =============================================================================
// Console table
// =============================================================================

/// Render rows as a fixed-width table: rule, header, rows (as given), rule.
/// Columns are separated by two spaces; cells for tickers a row lacks are blank.
pub fn render_table(rows: &[BalanceRow], tickers: &[String]) -> String {
    let mut header: Vec<String> = vec!["timestamp".to_string()];
    header.extend(tickers.iter().cloned());

    let body: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            let mut cells = vec![format_timestamp(row)];
            cells.extend(
                tickers
                    .iter()
                    .map(|t| row.get(t).map(format_decimal).unwrap_or_default()),
            );
            cells
        })
        .collect();

    let widths: Vec<usize> = (0..header.len())
        .map(|col| {
            body.iter()
                .map(|cells| cells[col].chars().count())
                .chain(std::iter::once(header[col].chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let line = |cells: &[String]| -> String {
        let padded: Vec<String> = cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{:<width$}", cell, width = *width))
            .collect();
        padded.join("  ").trim_end().to_string()
    };
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();

    let mut lines = Vec::with_capacity(body.len() + 3);
    lines.push(line(&rule));
    lines.push(line(&header));
    for cells in &body {
        lines.push(line(cells));
    }
    lines.push(line(&rule));

    lines.join("\n")
}

// =============================================================================
// CSV outputs
// =============================================================================

pub fn balances_filename(ticker: &str, wallet: &str) -> String {
    format!("{}_balances_{}.csv", ticker, wallet)
}

pub fn transactions_filename(ticker: &str, wallet: &str) -> String {
    format!("{}_transactions_{}.csv", ticker, wallet)
}

/// Write the balance table. With `forward_fill`, a blank cell takes the value
/// from the nearest older row that has one.
pub fn write_balances_csv(path: &Path, rows: &[BalanceRow], tickers: &[String], forward_fill: bool) -> Result<()> {
    let mut wtr = Writer::from_path(path)?;

    let mut header = vec!["timestamp"];
    header.extend(tickers.iter().map(String::as_str));
    wtr.write_record(&header)?;

    // Rows are newest first; filling has to run oldest to newest
    let mut filled: Vec<Vec<String>> = Vec::with_capacity(rows.len());
    let mut last_seen: BTreeMap<&str, &BigDecimal> = BTreeMap::new();
    for row in rows.iter().rev() {
        let mut record = vec![format_timestamp(row)];
        for ticker in tickers {
            let cell = match row.get(ticker) {
                Some(value) => {
                    last_seen.insert(ticker, value);
                    format_decimal(value)
                }
                None if forward_fill => last_seen.get(ticker.as_str()).map(|v| format_decimal(v)).unwrap_or_default(),
                None => String::new(),
            };
            record.push(cell);
        }
        filled.push(record);
    }

    for record in filled.iter().rev() {
        wtr.write_record(record)?;
    }

    wtr.flush()?;
    Ok(())
}

/// One line per delta and per cross-chain transfer, oldest first
pub fn write_transactions_csv(path: &Path, txs: &[NormalizedTx]) -> Result<()> {
    let mut wtr = Writer::from_path(path)?;

    wtr.write_record(["tx_id", "timestamp", "ticker", "amount", "kind", "counterparty"])?;

    for tx in txs {
        let timestamp = tx.timestamp.format(constants::TIMESTAMP_FORMAT).to_string();
        for delta in &tx.deltas {
            wtr.write_record([
                tx.tx_id.as_str(),
                &timestamp,
                &delta.denom,
                &format_decimal(&delta.signed_amount),
                &delta.kind.to_string(),
                "",
            ])?;
        }
        for transfer in &tx.cross_chain {
            wtr.write_record([
                tx.tx_id.as_str(),
                &timestamp,
                &transfer.ticker,
                &format_decimal(&transfer.signed_amount),
                "cross_chain",
                &transfer.counterparty,
            ])?;
        }
    }

    wtr.flush()?;
    Ok(())
}

/// Write both CSVs into `output_dir`
pub fn generate_all_reports(output_dir: &Path, report: &HistoryReport, forward_fill: bool) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(output_dir)?;
    let ticker = report.chain.ticker();

    let balances = output_dir.join(balances_filename(ticker, &report.wallet));
    write_balances_csv(&balances, &report.output.rows, &report.output.tickers, forward_fill)?;
    println!("  Generated: {}", balances.display());

    let transactions = output_dir.join(transactions_filename(ticker, &report.wallet));
    write_transactions_csv(&transactions, &report.transactions)?;
    println!("  Generated: {}", transactions.display());

    Ok(vec![balances, transactions])
}

// =============================================================================
// Console summary
// =============================================================================

/// Print summary to console
pub fn print_summary(report: &HistoryReport) {
    let output = &report.output;

    println!("\n============================================================");
    println!("                    BALANCE HISTORY SUMMARY");
    println!("============================================================\n");

    println!("WALLET:");
    println!("  Address:                 {}", report.wallet);
    println!("  Chain:                   {}", report.chain);
    println!("  Range:                   {}", report.range);

    println!("\nACTIVITY:");
    println!("  Transactions fetched:    {:>8}", report.fetched);
    println!("  Balance rows:            {:>8}", output.rows.len());
    println!("  Assets:                  {:>8}", output.tickers.len());
    if output.duplicates > 0 {
        println!("  Duplicates dropped:      {:>8}", output.duplicates);
    }
    if output.out_of_range > 0 {
        println!("  Outside range:           {:>8}", output.out_of_range);
    }

    let cross_chain: usize = report.transactions.iter().map(|t| t.cross_chain.len()).sum();
    if cross_chain > 0 {
        println!("  Cross-chain transfers:   {:>8}", cross_chain);
    }

    if !output.final_balances.is_empty() {
        println!("\nFINAL BALANCES:");
        for ticker in &output.tickers {
            if let Some(value) = output.final_balances.get(ticker) {
                println!("  {:<24} {}", ticker, format_decimal(value));
            }
        }
    }

    if !report.warnings.is_empty() {
        let unknown = report
            .warnings
            .count_where(|e| matches!(e, HistoryError::UnknownDenom { .. }));
        let malformed = report.warnings.count_where(|e| {
            matches!(
                e,
                HistoryError::MalformedTransaction { .. } | HistoryError::MalformedEntry { .. }
            )
        });

        println!("\nWARNINGS: {}", report.warnings.len());
        if unknown > 0 {
            println!("  ⚠️  {} unknown denom(s) shown by raw id", unknown);
        }
        if malformed > 0 {
            println!("  ⚠️  {} malformed transaction(s)/entries skipped", malformed);
        }
        for warning in report.warnings.iter() {
            println!("    - {}", warning);
        }
    }
    println!("============================================================");
}

//! Status command implementation.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};

/// Health response from the server.
#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
    ready: bool,
    state: String,
    pending_writes: usize,
    components: BTreeMap<String, ComponentStatus>,
}

/// Component status from the server.
#[derive(Debug, Deserialize)]
struct ComponentStatus {
    status: String,
    reason: Option<String>,
}

/// Show status and health.
pub async fn run(url: &str) -> Result<()> {
    let base = url.trim_end_matches('/').trim_end_matches("/health");
    println!("Checking health at {}...\n", base);

    let client = reqwest::Client::new();

    match client.get(format!("{}/health", base)).send().await {
        Ok(response) => {
            let status_code = response.status();
            match response.json::<HealthResponse>().await {
                Ok(health) => print_health_status(&health, status_code.as_u16()),
                Err(e) => {
                    println!("Failed to parse health response: {}", e);
                    println!("HTTP Status: {}", status_code);
                }
            }
        }
        Err(e) => {
            println!("Failed to connect to health endpoint: {}", e);
            println!("\nIs the sheetsync server running?");
            println!("Start it with: sheetsync serve --config <path-to-config>");
            return Ok(());
        }
    }

    println!("\n--- Metrics ---");
    match client.get(format!("{}/metrics", base)).send().await {
        Ok(response) => {
            let text = response.text().await.context("Failed to read metrics")?;
            print_metrics(&text);
        }
        Err(e) => {
            println!("Failed to fetch metrics: {}", e);
        }
    }

    Ok(())
}

fn status_tag(status: &str) -> &'static str {
    match status {
        "healthy" => "[OK]",
        "degraded" => "[WARN]",
        "unhealthy" => "[FAIL]",
        _ => "[?]",
    }
}

fn print_health_status(health: &HealthResponse, status_code: u16) {
    println!(
        "{} Overall Status: {} (HTTP {})",
        status_tag(&health.status),
        health.status.to_uppercase(),
        status_code
    );
    println!("State:          {}", health.state);
    println!("Ready:          {}", if health.ready { "yes" } else { "no" });
    println!("Pending writes: {}", health.pending_writes);
    println!();

    if !health.components.is_empty() {
        println!("Components:");
        for (name, component) in &health.components {
            let tag = status_tag(&component.status);
            match &component.reason {
                Some(reason) => println!("  {} {}: {} ({})", tag, name, component.status, reason),
                None => println!("  {} {}: {}", tag, name, component.status),
            }
        }
    }
}

/// Sum sample values by metric name, folding labelled series together.
fn parse_metrics(metrics_text: &str) -> HashMap<&str, f64> {
    let mut values: HashMap<&str, f64> = HashMap::new();

    for line in metrics_text.lines() {
        if line.starts_with('#') || line.is_empty() {
            continue;
        }

        let mut parts = line.split_whitespace();
        let (Some(series), Some(raw)) = (parts.next(), parts.next()) else {
            continue;
        };
        let name = series.split('{').next().unwrap_or(series);
        if let Ok(value) = raw.parse::<f64>() {
            *values.entry(name).or_default() += value;
        }
    }

    values
}

fn print_metrics(metrics_text: &str) {
    let values = parse_metrics(metrics_text);
    if values.is_empty() {
        println!("No metrics available yet.");
        return;
    }

    let rows = [
        ("Table Reads:       ", "sheetsync_reads_total"),
        ("Throttled Reads:   ", "sheetsync_throttled_reads_total"),
        ("Flushes:           ", "sheetsync_flushes_total"),
        ("Flush Failures:    ", "sheetsync_flush_failures_total"),
        ("Cells Written:     ", "sheetsync_cells_written_total"),
        ("Writes Dropped:    ", "sheetsync_writes_dropped_total"),
        ("Writes Undelivered:", "sheetsync_writes_undelivered_total"),
        ("Retries:           ", "sheetsync_retries_total"),
        ("Pending Writes:    ", "sheetsync_pending_writes"),
    ];
    for (label, name) in rows {
        if let Some(v) = values.get(name) {
            println!("{} {}", label, format_number(*v as u64));
        }
    }
}

fn format_number(n: u64) -> String {
    if n >= 1_000_000 {
        format!("{:.2}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.2}K", n as f64 / 1_000.0)
    } else {
        n.to_string()
    }
}

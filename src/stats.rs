//! Database statistics and health overview.
//!
//! Provides a quick summary of what has been harvested: contacts per kind,
//! membership rows, and the last run of each target. Used by
//! `harvester stats` to confirm that scheduled harvests are landing.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};

use contact_harvest_core::store::DirectoryStore;

use crate::config::Config;
use crate::migrate;
use crate::runs;
use crate::sqlite_store::SqliteStore;

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let store = SqliteStore::connect(&config.db).await?;
    let pool = store.pool().await;
    migrate::verify_schema(&pool).await?;

    let counts = store.counts().await?;
    let latest = runs::latest_runs(&pool).await?;
    let now = Utc::now();

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Contact Harvest: database stats");
    println!("===============================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", human_size(db_size));
    println!();
    println!("  Contacts:    {}", counts.contacts());
    println!("    friends:   {}", counts.friends);
    println!("    groups:    {}", counts.groups);
    println!("    officials: {}", counts.officials);
    println!("  Members:     {}", counts.members);

    if !latest.is_empty() {
        println!();
        println!("  Last runs:");
        println!(
            "  {:<10} {:<10} {:>8} {:>8} {:>8} {:>8}   {}",
            "TARGET", "STATUS", "CONTACTS", "GROUPS", "MEMBERS", "SKIPPED", "STARTED"
        );
        println!("  {}", "-".repeat(76));

        for run in &latest {
            println!(
                "  {:<10} {:<10} {:>8} {:>8} {:>8} {:>8}   {}",
                run.target,
                run.status,
                run.contacts_written,
                run.groups_written,
                run.members_written,
                run.skipped,
                run_age(run.started_at, now)
            );
            if let Some(err) = &run.error {
                println!("  {:<10} error: {}", "", err);
            }
        }
    }

    println!();

    store.close().await;
    Ok(())
}

fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit + 1 < UNITS.len() {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}

/// Render a Unix timestamp with a chrono `pattern`, in UTC.
/// `None` when the timestamp is out of range.
pub fn format_epoch(ts: i64, pattern: &str) -> Option<String> {
    DateTime::from_timestamp(ts, 0).map(|dt| dt.format(pattern).to_string())
}

/// Age of `ts` relative to `now` in the largest whole unit ("3h ago").
/// Future timestamps and anything older than a week print as a date.
fn run_age(ts: i64, now: DateTime<Utc>) -> String {
    let absolute = || format_epoch(ts, "%Y-%m-%d %H:%M").unwrap_or_else(|| ts.to_string());
    let Some(started) = DateTime::from_timestamp(ts, 0) else {
        return ts.to_string();
    };
    let age = now.signed_duration_since(started);
    if age < Duration::zero() || age >= Duration::days(7) {
        return absolute();
    }
    match (age.num_days(), age.num_hours(), age.num_minutes()) {
        (0, 0, 0) => "just now".to_string(),
        (0, 0, m) => format!("{}m ago", m),
        (0, h, _) => format!("{}h ago", h),
        (d, _, _) => format!("{}d ago", d),
    }
}

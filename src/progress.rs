//! Harvest progress reporting.
//!
//! Reports observable progress during `harvester sync` so operators see which
//! phase a run is in and how much is left. Progress is emitted on **stderr**
//! so stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event for a harvest run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HarvestProgressEvent {
    /// Paging through the identifier listing. Total unknown.
    Walking { target: String },
    /// Resolving detail records in chunks.
    Resolving {
        target: String,
        identifiers: u64,
        chunks: u64,
    },
    /// Member listing: n groups done out of total.
    Members { target: String, n: u64, total: u64 },
    /// Upserting normalized rows.
    Reconciling { target: String, rows: u64 },
}

/// Reports harvest progress. Implementations write to stderr (human or JSON).
pub trait HarvestProgressReporter: Send + Sync {
    fn report(&self, event: HarvestProgressEvent);
}

/// Human-friendly progress on stderr: "sync groups  members  12 / 340 groups".
pub struct StderrProgress;

fn human_line(event: &HarvestProgressEvent) -> String {
    match event {
        HarvestProgressEvent::Walking { target } => {
            format!("sync {}  walking identifier listing...\n", target)
        }
        HarvestProgressEvent::Resolving {
            target,
            identifiers,
            chunks,
        } => format!(
            "sync {}  resolving  {} identifiers in {} chunks\n",
            target,
            format_number(*identifiers),
            format_number(*chunks)
        ),
        HarvestProgressEvent::Members { target, n, total } => format!(
            "sync {}  members  {} / {} groups\n",
            target,
            format_number(*n),
            format_number(*total)
        ),
        HarvestProgressEvent::Reconciling { target, rows } => format!(
            "sync {}  reconciling  {} rows\n",
            target,
            format_number(*rows)
        ),
    }
}

impl HarvestProgressReporter for StderrProgress {
    fn report(&self, event: HarvestProgressEvent) {
        let line = human_line(&event);
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

fn json_event(event: &HarvestProgressEvent) -> serde_json::Value {
    match event {
        HarvestProgressEvent::Walking { target } => serde_json::json!({
            "event": "progress",
            "target": target,
            "phase": "walking"
        }),
        HarvestProgressEvent::Resolving {
            target,
            identifiers,
            chunks,
        } => serde_json::json!({
            "event": "progress",
            "target": target,
            "phase": "resolving",
            "identifiers": identifiers,
            "chunks": chunks
        }),
        HarvestProgressEvent::Members { target, n, total } => serde_json::json!({
            "event": "progress",
            "target": target,
            "phase": "members",
            "n": n,
            "total": total
        }),
        HarvestProgressEvent::Reconciling { target, rows } => serde_json::json!({
            "event": "progress",
            "target": target,
            "phase": "reconciling",
            "rows": rows
        }),
    }
}

impl HarvestProgressReporter for JsonProgress {
    fn report(&self, event: HarvestProgressEvent) {
        if let Ok(line) = serde_json::to_string(&json_event(&event)) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl HarvestProgressReporter for NoProgress {
    fn report(&self, _event: HarvestProgressEvent) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    /// Human when stderr is a TTY, otherwise off.
    Auto,
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// `Auto` resolved against the current terminal.
    pub fn resolve(self) -> Self {
        match self {
            ProgressMode::Auto => Self::default_for_tty(),
            other => other,
        }
    }

    /// Build a reporter for this mode.
    pub fn reporter(&self) -> Box<dyn HarvestProgressReporter> {
        match self.resolve() {
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
            ProgressMode::Off | ProgressMode::Auto => Box::new(NoProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn human_lines() {
        let line = human_line(&HarvestProgressEvent::Members {
            target: "groups".to_string(),
            n: 12,
            total: 1340,
        });
        assert_eq!(line, "sync groups  members  12 / 1,340 groups\n");
    }

    #[test]
    fn json_events_carry_phase() {
        let v = json_event(&HarvestProgressEvent::Resolving {
            target: "contacts".to_string(),
            identifiers: 45,
            chunks: 3,
        });
        assert_eq!(v["phase"], "resolving");
        assert_eq!(v["chunks"], 3);
        assert_eq!(v["target"], "contacts");
    }

    #[test]
    fn explicit_modes_resolve_to_themselves() {
        assert_eq!(ProgressMode::Json.resolve(), ProgressMode::Json);
        assert_eq!(ProgressMode::Off.resolve(), ProgressMode::Off);
        assert_ne!(ProgressMode::Auto.resolve(), ProgressMode::Auto);
    }
}

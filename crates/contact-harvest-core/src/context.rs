//! Per-run harvest state.
//!
//! A [`HarvestContext`] is created for each run and passed explicitly to the
//! walker and the orchestration; nothing about a run lives in shared state,
//! so runs in tests are isolated from one another.

use std::collections::HashSet;

use chrono::{DateTime, SubsecRound, Utc};

use crate::client::Cursors;

#[derive(Debug, Clone)]
pub struct HarvestContext {
    /// Harvest time stamped on every row written by this run.
    pub started_at: DateTime<Utc>,
    /// Cursors of the most recent listing call.
    pub cursors: Cursors,
    /// Listing calls issued so far.
    pub pages: usize,
    identifiers: Vec<String>,
    seen: HashSet<String>,
}

impl HarvestContext {
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    /// Context with a fixed harvest time, truncated to whole seconds (the
    /// store keeps epoch seconds).
    pub fn starting_at(at: DateTime<Utc>) -> Self {
        Self {
            started_at: at.trunc_subsecs(0),
            cursors: Cursors::default(),
            pages: 0,
            identifiers: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Forget any previous walk: cursors back to zero, no identifiers.
    pub fn reset_walk(&mut self) {
        self.cursors = Cursors::default();
        self.pages = 0;
        self.identifiers.clear();
        self.seen.clear();
    }

    /// Add a page of identifiers, skipping blanks and ones already seen.
    /// Returns how many were new.
    pub fn absorb(&mut self, batch: &[String]) -> usize {
        let before = self.identifiers.len();
        for id in batch {
            let id = id.trim();
            if id.is_empty() || self.seen.contains(id) {
                continue;
            }
            self.seen.insert(id.to_string());
            self.identifiers.push(id.to_string());
        }
        self.identifiers.len() - before
    }

    /// Identifiers in first-seen order.
    pub fn identifiers(&self) -> &[String] {
        &self.identifiers
    }

    pub fn into_identifiers(self) -> Vec<String> {
        self.identifiers
    }
}

impl Default for HarvestContext {
    fn default() -> Self {
        Self::new()
    }
}

//! Batched detail resolution.
//!
//! Identifiers are split into chunks no larger than the remote batching
//! limit and looked up with bounded concurrency. A failed chunk is logged
//! and dropped: its identifiers get no entry in the result, and callers fall
//! back to identifier-only records. Resolution as a whole never fails.

use std::collections::HashMap;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::{DirectoryClient, MAX_DETAIL_BATCH};
use crate::models::RawRecord;
use crate::normalize::extract_identifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Identifiers per lookup call, clamped to `1..=MAX_DETAIL_BATCH`.
    pub chunk_size: usize,
    /// Lookup calls in flight at once.
    pub concurrency: usize,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            chunk_size: MAX_DETAIL_BATCH,
            concurrency: 4,
        }
    }
}

/// Detail records keyed by identifier, plus what went wrong on the way.
#[derive(Debug, Default)]
pub struct ResolvedDetails {
    pub records: HashMap<String, RawRecord>,
    pub chunks: usize,
    pub failed_chunks: usize,
    /// Returned records carrying no identifier.
    pub malformed: usize,
    /// Chunks were left undispatched because the run was cancelled.
    pub cancelled: bool,
}

impl ResolvedDetails {
    pub fn get(&self, identifier: &str) -> Option<&RawRecord> {
        self.records.get(identifier)
    }

    /// Requested identifiers with no detail record.
    pub fn missing<'a>(&self, requested: &'a [String]) -> Vec<&'a str> {
        requested
            .iter()
            .filter(|id| !self.records.contains_key(id.as_str()))
            .map(String::as_str)
            .collect()
    }
}

enum ChunkResult {
    Resolved(Vec<RawRecord>),
    Failed,
    NotDispatched,
}

/// Resolve detail records for `identifiers`.
///
/// The cancellation token is checked before each chunk is dispatched;
/// chunks already in flight complete and their records are kept.
pub async fn resolve_details<C>(
    client: &C,
    identifiers: &[String],
    opts: &ResolveOptions,
    cancel: &CancellationToken,
) -> ResolvedDetails
where
    C: DirectoryClient + ?Sized,
{
    let chunk_size = opts.chunk_size.clamp(1, MAX_DETAIL_BATCH);
    let concurrency = opts.concurrency.max(1);

    let mut resolved = ResolvedDetails {
        chunks: identifiers.len().div_ceil(chunk_size),
        ..ResolvedDetails::default()
    };

    let mut results = stream::iter(identifiers.chunks(chunk_size).enumerate())
        .map(|(index, chunk)| async move {
            if cancel.is_cancelled() {
                return (index, ChunkResult::NotDispatched);
            }
            match client.resolve_detail(chunk).await {
                Ok(records) => (index, ChunkResult::Resolved(records)),
                Err(e) => {
                    warn!(
                        chunk = index + 1,
                        size = chunk.len(),
                        first = chunk.first().map(String::as_str).unwrap_or_default(),
                        error = %e,
                        "detail lookup failed; chunk left unresolved"
                    );
                    (index, ChunkResult::Failed)
                }
            }
        })
        .buffer_unordered(concurrency);

    while let Some((index, result)) = results.next().await {
        match result {
            ChunkResult::Resolved(records) => {
                debug!(chunk = index + 1, records = records.len(), "detail chunk resolved");
                for record in records {
                    match extract_identifier(&record) {
                        Some(id) => {
                            resolved.records.entry(id).or_insert(record);
                        }
                        None => {
                            resolved.malformed += 1;
                            warn!(chunk = index + 1, "detail record without identifier skipped");
                        }
                    }
                }
            }
            ChunkResult::Failed => resolved.failed_chunks += 1,
            ChunkResult::NotDispatched => resolved.cancelled = true,
        }
    }

    resolved
}

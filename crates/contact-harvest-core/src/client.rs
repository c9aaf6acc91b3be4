//! The remote directory, as the engine sees it.
//!
//! [`DirectoryClient`] is the only way the walker, resolver and orchestration
//! talk to the remote API. The HTTP implementation lives in the root crate;
//! tests script their own.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::RawRecord;

/// Largest identifier batch the detail lookup accepts.
pub const MAX_DETAIL_BATCH: usize = 20;

/// Resumption point of the identifier listing.
///
/// The remote paginates friends and groups independently, so a position is
/// a pair of cursors. A fresh walk always starts from `(0, 0)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursors {
    pub contact: i64,
    pub group: i64,
}

impl Cursors {
    pub fn new(contact: i64, group: i64) -> Self {
        Self { contact, group }
    }
}

/// One page of the identifier listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdentifierPage {
    pub identifiers: Vec<String>,
    /// Cursors to send with the next call.
    pub next: Cursors,
}

/// Remote contact directory.
///
/// Calls may fail transiently; callers decide whether a failure is fatal
/// (listing pages) or isolated (detail chunks, member listings).
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Fetch one page of identifiers starting at `cursors`.
    async fn list_identifiers(&self, cursors: Cursors) -> Result<IdentifierPage>;

    /// Look up detail records for at most [`MAX_DETAIL_BATCH`] identifiers.
    /// Records may come back in any order and some may be missing.
    async fn resolve_detail(&self, identifiers: &[String]) -> Result<Vec<RawRecord>>;

    /// Member listing of a group. Entries are bare identifiers, wrapped
    /// identifiers, or member objects.
    async fn list_group_members(&self, group_identifier: &str) -> Result<Vec<Value>>;

    /// Send a plain-text message to `target`.
    async fn send_notification(&self, target: &str, text: &str) -> Result<()>;
}

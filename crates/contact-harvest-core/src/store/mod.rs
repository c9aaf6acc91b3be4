//! Storage abstraction for harvested directory data.
//!
//! The [`DirectoryStore`] trait is everything the reconciler and the
//! read-side commands need from a backend. The SQLite implementation lives
//! in the root crate; [`memory::InMemoryStore`] backs the engine tests.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::models::{ContactKind, ContactRecord, GroupMemberRecord};

/// Selection for [`DirectoryStore::list_contacts`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactFilter {
    pub kind: Option<ContactKind>,
    pub offset: usize,
    /// `None` lists everything after `offset`.
    pub limit: Option<usize>,
}

/// Row counts by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub friends: u64,
    pub groups: u64,
    pub officials: u64,
    pub members: u64,
}

impl StoreCounts {
    pub fn contacts(&self) -> u64 {
        self.friends + self.groups + self.officials
    }
}

/// Abstract storage backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert_contact`](DirectoryStore::upsert_contact) | Insert or overwrite a contact keyed by identifier |
/// | [`upsert_group_member`](DirectoryStore::upsert_group_member) | Insert or overwrite a membership keyed by (group, member) |
/// | [`get_contact`](DirectoryStore::get_contact) | One contact by identifier |
/// | [`list_contacts`](DirectoryStore::list_contacts) | Contacts ordered by display name |
/// | [`list_group_members`](DirectoryStore::list_group_members) | Members of one group |
/// | [`counts`](DirectoryStore::counts) | Row counts per kind |
/// | [`is_disconnect`](DirectoryStore::is_disconnect) / [`reconnect`](DirectoryStore::reconnect) | Connection recovery |
///
/// Each upsert commits on its own. An upsert overwrites every column,
/// `extra` included (replaced, not merged).
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    async fn upsert_contact(&self, contact: &ContactRecord) -> Result<()>;

    /// Fails when the member's group has no contact row.
    async fn upsert_group_member(&self, member: &GroupMemberRecord) -> Result<()>;

    async fn get_contact(&self, identifier: &str) -> Result<Option<ContactRecord>>;

    async fn list_contacts(&self, filter: &ContactFilter) -> Result<Vec<ContactRecord>>;

    /// Members ordered by member identifier.
    async fn list_group_members(&self, group_identifier: &str) -> Result<Vec<GroupMemberRecord>>;

    async fn counts(&self) -> Result<StoreCounts>;

    /// Whether `err`, returned by one of this store's writes, means the
    /// connection was lost rather than the row being refused.
    fn is_disconnect(&self, _err: &anyhow::Error) -> bool {
        false
    }

    /// Re-establish the connection after [`is_disconnect`](Self::is_disconnect).
    async fn reconnect(&self) -> Result<()> {
        Ok(())
    }
}

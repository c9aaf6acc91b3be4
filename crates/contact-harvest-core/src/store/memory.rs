//! In-memory [`DirectoryStore`] implementation for tests.
//!
//! Uses `BTreeMap`s behind `std::sync::RwLock`. Enforces the same
//! constraints as the relational store (membership requires a group row)
//! and can simulate a dropped connection or a refused row, so reconciler
//! recovery paths are testable without a database.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::models::{ContactKind, ContactRecord, GroupMemberRecord};

use super::{ContactFilter, DirectoryStore, StoreCounts};

/// Error returned while the simulated connection is down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disconnected;

impl fmt::Display for Disconnected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("store connection lost")
    }
}

impl std::error::Error for Disconnected {}

pub struct InMemoryStore {
    contacts: RwLock<BTreeMap<String, ContactRecord>>,
    members: RwLock<BTreeMap<(String, String), GroupMemberRecord>>,
    connected: AtomicBool,
    reconnect_succeeds: AtomicBool,
    failing_writes: AtomicUsize,
    rejected: RwLock<HashSet<String>>,
    reconnects: AtomicUsize,
    write_attempts: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            contacts: RwLock::new(BTreeMap::new()),
            members: RwLock::new(BTreeMap::new()),
            connected: AtomicBool::new(true),
            reconnect_succeeds: AtomicBool::new(true),
            failing_writes: AtomicUsize::new(0),
            rejected: RwLock::new(HashSet::new()),
            reconnects: AtomicUsize::new(0),
            write_attempts: AtomicUsize::new(0),
        }
    }

    /// Drop the simulated connection; writes fail until [`reconnect`](DirectoryStore::reconnect).
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Fail the next `n` writes with [`Disconnected`], even after a reconnect.
    pub fn fail_next_writes(&self, n: usize) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    pub fn set_reconnect_succeeds(&self, ok: bool) {
        self.reconnect_succeeds.store(ok, Ordering::SeqCst);
    }

    /// Refuse writes touching `identifier` (as contact or member) with a
    /// non-connection error.
    pub fn reject(&self, identifier: &str) {
        self.rejected.write().unwrap().insert(identifier.to_string());
    }

    pub fn reconnects(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }

    pub fn write_attempts(&self) -> usize {
        self.write_attempts.load(Ordering::SeqCst)
    }

    pub fn contact_snapshot(&self) -> BTreeMap<String, ContactRecord> {
        self.contacts.read().unwrap().clone()
    }

    pub fn member_snapshot(&self) -> BTreeMap<(String, String), GroupMemberRecord> {
        self.members.read().unwrap().clone()
    }

    fn check_write(&self, identifier: &str) -> Result<()> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        if !self.connected.load(Ordering::SeqCst) {
            return Err(Disconnected.into());
        }
        let failing = self.failing_writes.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_writes.store(failing - 1, Ordering::SeqCst);
            self.connected.store(false, Ordering::SeqCst);
            return Err(Disconnected.into());
        }
        if self.rejected.read().unwrap().contains(identifier) {
            bail!("constraint failed: row for '{}' refused", identifier);
        }
        Ok(())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DirectoryStore for InMemoryStore {
    async fn upsert_contact(&self, contact: &ContactRecord) -> Result<()> {
        self.check_write(&contact.identifier)?;
        self.contacts
            .write()
            .unwrap()
            .insert(contact.identifier.clone(), contact.clone());
        Ok(())
    }

    async fn upsert_group_member(&self, member: &GroupMemberRecord) -> Result<()> {
        self.check_write(&member.member_identifier)?;
        if !self
            .contacts
            .read()
            .unwrap()
            .contains_key(&member.group_identifier)
        {
            bail!(
                "FOREIGN KEY constraint failed: group '{}' has no contact row",
                member.group_identifier
            );
        }
        self.members.write().unwrap().insert(
            (
                member.group_identifier.clone(),
                member.member_identifier.clone(),
            ),
            member.clone(),
        );
        Ok(())
    }

    async fn get_contact(&self, identifier: &str) -> Result<Option<ContactRecord>> {
        Ok(self.contacts.read().unwrap().get(identifier).cloned())
    }

    async fn list_contacts(&self, filter: &ContactFilter) -> Result<Vec<ContactRecord>> {
        let mut rows: Vec<ContactRecord> = self
            .contacts
            .read()
            .unwrap()
            .values()
            .filter(|c| filter.kind.map_or(true, |k| c.kind == k))
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            a.display_name
                .to_lowercase()
                .cmp(&b.display_name.to_lowercase())
                .then_with(|| a.identifier.cmp(&b.identifier))
        });
        Ok(rows
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .collect())
    }

    async fn list_group_members(&self, group_identifier: &str) -> Result<Vec<GroupMemberRecord>> {
        Ok(self
            .members
            .read()
            .unwrap()
            .values()
            .filter(|m| m.group_identifier == group_identifier)
            .cloned()
            .collect())
    }

    async fn counts(&self) -> Result<StoreCounts> {
        let mut counts = StoreCounts::default();
        for contact in self.contacts.read().unwrap().values() {
            match contact.kind {
                ContactKind::Friend => counts.friends += 1,
                ContactKind::Group => counts.groups += 1,
                ContactKind::Official => counts.officials += 1,
            }
        }
        counts.members = self.members.read().unwrap().len() as u64;
        Ok(counts)
    }

    fn is_disconnect(&self, err: &anyhow::Error) -> bool {
        err.downcast_ref::<Disconnected>().is_some()
    }

    async fn reconnect(&self) -> Result<()> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        if !self.reconnect_succeeds.load(Ordering::SeqCst) {
            return Err(Disconnected.into());
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn contact(id: &str, name: &str) -> ContactRecord {
        ContactRecord {
            identifier: id.to_string(),
            display_name: name.to_string(),
            remark_name: String::new(),
            alias: String::new(),
            avatar_url: String::new(),
            kind: ContactKind::classify(id),
            region: String::new(),
            last_updated: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            extra: json!({}),
        }
    }

    fn member(group: &str, id: &str) -> GroupMemberRecord {
        GroupMemberRecord {
            group_identifier: group.to_string(),
            member_identifier: id.to_string(),
            display_name: id.to_string(),
            nickname: id.to_string(),
            province: String::new(),
            city: String::new(),
            signature: String::new(),
            avatar_url: String::new(),
            inviter_identifier: None,
            join_time: None,
            last_updated: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            extra: json!({}),
        }
    }

    #[tokio::test]
    async fn member_requires_group_row() {
        let store = InMemoryStore::new();
        assert!(store.upsert_group_member(&member("g@chatroom", "u1")).await.is_err());
        store.upsert_contact(&contact("g@chatroom", "Group")).await.unwrap();
        store.upsert_group_member(&member("g@chatroom", "u1")).await.unwrap();
        assert_eq!(store.list_group_members("g@chatroom").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn list_orders_by_name_case_insensitively() {
        let store = InMemoryStore::new();
        for (id, name) in [("c", "charlie"), ("a", "Alpha"), ("b", "bravo"), ("gh_x", "Zed")] {
            store.upsert_contact(&contact(id, name)).await.unwrap();
        }
        let all = store.list_contacts(&ContactFilter::default()).await.unwrap();
        let names: Vec<&str> = all.iter().map(|c| c.display_name.as_str()).collect();
        assert_eq!(names, vec!["Alpha", "bravo", "charlie", "Zed"]);

        let page = store
            .list_contacts(&ContactFilter {
                kind: Some(ContactKind::Friend),
                offset: 1,
                limit: Some(1),
            })
            .await
            .unwrap();
        assert_eq!(page[0].identifier, "b");
    }

    #[tokio::test]
    async fn disconnect_until_reconnect() {
        let store = InMemoryStore::new();
        store.disconnect();
        let err = store.upsert_contact(&contact("a", "A")).await.unwrap_err();
        assert!(store.is_disconnect(&err));
        store.reconnect().await.unwrap();
        store.upsert_contact(&contact("a", "A")).await.unwrap();
        assert_eq!(store.reconnects(), 1);
    }

    #[tokio::test]
    async fn rejected_rows_are_not_disconnects() {
        let store = InMemoryStore::new();
        store.reject("bad");
        let err = store.upsert_contact(&contact("bad", "B")).await.unwrap_err();
        assert!(!store.is_disconnect(&err));
    }
}

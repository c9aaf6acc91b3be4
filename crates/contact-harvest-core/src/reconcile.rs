//! Idempotent reconciliation of normalized records into a store.
//!
//! Every row is upserted and committed on its own; nothing is transactional
//! across the run, so an interrupted run leaves a valid prefix of committed
//! rows. Applying the same input again converges on the same final state.
//!
//! Write order is contacts, then each group immediately followed by its
//! members, so a membership row never precedes its group row.
//!
//! Per-row failures are outcomes, not errors: a row the store refuses is
//! reported as skipped and the run continues. A lost connection is retried
//! once after [`DirectoryStore::reconnect`]; losing it again is fatal.

use std::collections::{BTreeMap, HashSet};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, warn};

use crate::models::{ContactRecord, GroupMemberRecord, ItemOutcome, SkipReason, SkippedItem};
use crate::store::DirectoryStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileCounts {
    pub contacts_written: usize,
    pub groups_written: usize,
    pub members_written: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub counts: ReconcileCounts,
    pub skipped: Vec<SkippedItem>,
    /// Reconnects performed during the run.
    pub reconnects: usize,
}

#[derive(Clone, Copy)]
enum Row<'a> {
    Contact(&'a ContactRecord),
    Member(&'a GroupMemberRecord),
}

impl Row<'_> {
    fn key(&self) -> String {
        match self {
            Row::Contact(c) => c.identifier.clone(),
            Row::Member(m) => m.key(),
        }
    }

    async fn write<S: DirectoryStore + ?Sized>(&self, store: &S) -> Result<()> {
        match self {
            Row::Contact(c) => store.upsert_contact(c).await,
            Row::Member(m) => store.upsert_group_member(m).await,
        }
    }
}

fn refused(row: Row<'_>, err: &anyhow::Error) -> ItemOutcome {
    warn!(key = %row.key(), error = %err, "store refused row; skipped");
    ItemOutcome::Skipped(SkipReason::StoreRejected(format!("{:#}", err)))
}

/// Write one row, recovering from a single lost connection.
async fn commit<S: DirectoryStore + ?Sized>(
    store: &S,
    row: Row<'_>,
    report: &mut ReconcileReport,
) -> Result<ItemOutcome> {
    let err = match row.write(store).await {
        Ok(()) => return Ok(ItemOutcome::Written),
        Err(e) if store.is_disconnect(&e) => e,
        Err(e) => return Ok(refused(row, &e)),
    };

    warn!(key = %row.key(), error = %err, "store connection lost; reconnecting");
    store
        .reconnect()
        .await
        .with_context(|| format!("reconnecting to store after losing it at {}", row.key()))?;
    report.reconnects += 1;

    match row.write(store).await {
        Ok(()) => Ok(ItemOutcome::Written),
        Err(e) if store.is_disconnect(&e) => Err(e.context(format!(
            "store connection lost again while writing {}",
            row.key()
        ))),
        Err(e) => Ok(refused(row, &e)),
    }
}

fn skip(report: &mut ReconcileReport, key: String, reason: SkipReason) {
    report.skipped.push(SkippedItem { key, reason });
}

/// Upsert `contacts`, then each of `groups` followed by its members from
/// `members_by_group`.
///
/// Members whose group row was not written in this call (refused, or not
/// among `groups`) are skipped with [`SkipReason::GroupNotWritten`].
pub async fn reconcile<S: DirectoryStore + ?Sized>(
    store: &S,
    contacts: &[ContactRecord],
    groups: &[ContactRecord],
    members_by_group: &BTreeMap<String, Vec<GroupMemberRecord>>,
) -> Result<ReconcileReport> {
    let mut report = ReconcileReport::default();

    for contact in contacts {
        match commit(store, Row::Contact(contact), &mut report).await? {
            ItemOutcome::Written => report.counts.contacts_written += 1,
            ItemOutcome::Skipped(reason) => skip(&mut report, contact.identifier.clone(), reason),
        }
    }

    let mut handled = HashSet::new();
    for group in groups {
        handled.insert(group.identifier.as_str());
        let members = members_by_group
            .get(&group.identifier)
            .map(Vec::as_slice)
            .unwrap_or_default();

        match commit(store, Row::Contact(group), &mut report).await? {
            ItemOutcome::Written => report.counts.groups_written += 1,
            ItemOutcome::Skipped(reason) => {
                skip(&mut report, group.identifier.clone(), reason);
                for member in members {
                    skip(&mut report, member.key(), SkipReason::GroupNotWritten);
                }
                continue;
            }
        }

        for member in members {
            match commit(store, Row::Member(member), &mut report).await? {
                ItemOutcome::Written => report.counts.members_written += 1,
                ItemOutcome::Skipped(reason) => skip(&mut report, member.key(), reason),
            }
        }
        debug!(group = %group.identifier, members = members.len(), "group reconciled");
    }

    for (group, members) in members_by_group {
        if handled.contains(group.as_str()) {
            continue;
        }
        warn!(group = %group, members = members.len(), "members for a group with no group row; skipped");
        for member in members {
            skip(&mut report, member.key(), SkipReason::GroupNotWritten);
        }
    }

    Ok(report)
}

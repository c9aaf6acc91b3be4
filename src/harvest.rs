//! Harvest orchestration.
//!
//! Coordinates the full flow for one target: cursor walk → batched detail
//! resolution → normalization → reconciliation into the store.
//!
//! - [`harvest_contacts`] writes every identifier the listing returns
//!   (friends, official accounts and groups).
//! - [`harvest_groups`] writes every group plus its membership, resolving
//!   member details in a second pass.
//!
//! [`run_sync`] is the CLI entry point: it checks the schema, records the
//! run in the ledger, prints the summary and notifies the operator.

use std::collections::{BTreeMap, HashSet};

use anyhow::{Context, Result};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use contact_harvest_core::client::DirectoryClient;
use contact_harvest_core::context::HarvestContext;
use contact_harvest_core::models::{
    ContactKind, ContactRecord, GroupMemberRecord, RawRecord, SkippedItem,
};
use contact_harvest_core::normalize::{embedded_members, member_entries, MemberEntry, Normalizer};
use contact_harvest_core::reconcile::{reconcile, ReconcileCounts, ReconcileReport};
use contact_harvest_core::resolver::{resolve_details, ResolveOptions, ResolvedDetails};
use contact_harvest_core::store::DirectoryStore;
use contact_harvest_core::walker::{walk_all_identifiers, WalkLimits, WalkStatus};

use crate::config::{Config, HarvestConfig};
use crate::http_client::HttpDirectoryClient;
use crate::migrate;
use crate::progress::{HarvestProgressEvent, HarvestProgressReporter, ProgressMode};
use crate::runs::{self, RunStatus};
use crate::sqlite_store::SqliteStore;

/// What a `sync` run harvests.
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum SyncTarget {
    Contacts,
    Groups,
    All,
}

impl SyncTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncTarget::Contacts => "contacts",
            SyncTarget::Groups => "groups",
            SyncTarget::All => "all",
        }
    }

    /// Single targets to run, in order.
    pub fn expand(&self) -> Vec<SyncTarget> {
        match self {
            SyncTarget::All => vec![SyncTarget::Contacts, SyncTarget::Groups],
            single => vec![*single],
        }
    }
}

#[derive(Debug, Clone)]
pub struct HarvestOptions {
    pub walk: WalkLimits,
    pub resolve: ResolveOptions,
    pub normalizer: Normalizer,
    /// Stop before reconciliation and report planned counts only.
    pub dry_run: bool,
}

impl Default for HarvestOptions {
    fn default() -> Self {
        Self {
            walk: WalkLimits::default(),
            resolve: ResolveOptions::default(),
            normalizer: Normalizer::default(),
            dry_run: false,
        }
    }
}

impl HarvestOptions {
    pub fn from_config(harvest: &HarvestConfig, dry_run: bool) -> Self {
        Self {
            walk: harvest.walk_limits(),
            resolve: harvest.resolve_options(),
            normalizer: Normalizer::new(harvest.placeholder_avatar.clone()),
            dry_run,
        }
    }
}

/// Structured result of one harvest run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HarvestSummary {
    pub target: String,
    pub dry_run: bool,
    pub cancelled: bool,
    /// Listing calls made.
    pub pages: usize,
    /// Distinct identifiers the listing returned.
    pub identifiers: usize,
    /// Groups found (group harvests only).
    pub groups: usize,
    pub chunks: usize,
    pub failed_chunks: usize,
    /// Identifiers written without a detail record.
    pub detail_fallbacks: usize,
    /// Groups whose members came from the group's own detail record.
    pub member_listing_fallbacks: usize,
    /// Remote records or member entries with no identifier.
    pub malformed: usize,
    /// Rows handed to reconciliation (or that would be, on a dry run).
    pub planned: ReconcileCounts,
    pub counts: ReconcileCounts,
    pub skipped: Vec<SkippedItem>,
    pub reconnects: usize,
}

impl HarvestSummary {
    fn new(target: SyncTarget, dry_run: bool) -> Self {
        Self {
            target: target.as_str().to_string(),
            dry_run,
            ..Default::default()
        }
    }

    fn absorb_resolution(&mut self, resolved: &ResolvedDetails) {
        self.chunks += resolved.chunks;
        self.failed_chunks += resolved.failed_chunks;
        self.malformed += resolved.malformed;
        if resolved.cancelled {
            self.cancelled = true;
        }
    }

    fn absorb_report(&mut self, report: ReconcileReport) {
        self.counts = report.counts;
        self.skipped = report.skipped;
        self.reconnects = report.reconnects;
    }
}

/// Walk the listing into a fresh context. `None` when cancelled.
async fn walk(
    client: &dyn DirectoryClient,
    opts: &HarvestOptions,
    summary: &mut HarvestSummary,
    cancel: &CancellationToken,
) -> Result<Option<HarvestContext>> {
    let mut ctx = HarvestContext::new();
    let status = walk_all_identifiers(client, &mut ctx, &opts.walk, cancel).await?;
    summary.pages = ctx.pages;
    summary.identifiers = ctx.identifiers().len();
    match status {
        WalkStatus::Complete => Ok(Some(ctx)),
        WalkStatus::Cancelled => {
            summary.cancelled = true;
            Ok(None)
        }
    }
}

/// Harvest every identifier in the listing into `store`.
///
/// Identifiers whose detail could not be resolved are written as fallback
/// records (identifier as display name, placeholder avatar). Group
/// identifiers count towards `groups_written`.
pub async fn harvest_contacts(
    client: &dyn DirectoryClient,
    store: &dyn DirectoryStore,
    opts: &HarvestOptions,
    progress: &dyn HarvestProgressReporter,
    cancel: &CancellationToken,
) -> Result<HarvestSummary> {
    let target = SyncTarget::Contacts;
    let mut summary = HarvestSummary::new(target, opts.dry_run);

    progress.report(HarvestProgressEvent::Walking {
        target: target.as_str().to_string(),
    });
    let Some(ctx) = walk(client, opts, &mut summary, cancel).await? else {
        return Ok(summary);
    };

    let identifiers = ctx.identifiers();
    progress.report(HarvestProgressEvent::Resolving {
        target: target.as_str().to_string(),
        identifiers: identifiers.len() as u64,
        chunks: identifiers
            .len()
            .div_ceil(opts.resolve.chunk_size.max(1)) as u64,
    });
    let details = resolve_details(client, identifiers, &opts.resolve, cancel).await;
    summary.absorb_resolution(&details);
    if summary.cancelled {
        return Ok(summary);
    }

    let mut contacts = Vec::new();
    let mut groups = Vec::new();
    for id in identifiers {
        let record = match details.get(id) {
            Some(raw) => opts.normalizer.contact(id, raw, ctx.started_at),
            None => {
                summary.detail_fallbacks += 1;
                opts.normalizer.fallback_contact(id, ctx.started_at)
            }
        };
        if record.kind == ContactKind::Group {
            groups.push(record);
        } else {
            contacts.push(record);
        }
    }
    if summary.detail_fallbacks > 0 {
        warn!(
            count = summary.detail_fallbacks,
            "identifiers written without detail records"
        );
    }

    summary.planned = ReconcileCounts {
        contacts_written: contacts.len(),
        groups_written: groups.len(),
        members_written: 0,
    };
    if opts.dry_run {
        return Ok(summary);
    }

    progress.report(HarvestProgressEvent::Reconciling {
        target: target.as_str().to_string(),
        rows: (contacts.len() + groups.len()) as u64,
    });
    let report = reconcile(store, &contacts, &groups, &BTreeMap::new()).await?;
    summary.absorb_report(report);

    info!(
        contacts = summary.counts.contacts_written,
        groups = summary.counts.groups_written,
        skipped = summary.skipped.len(),
        "contact harvest complete"
    );
    Ok(summary)
}

/// Member entries for one group: the remote member listing, or the list
/// embedded in the group's own detail record when the listing fails or
/// comes back empty.
async fn group_member_entries(
    client: &dyn DirectoryClient,
    group: &str,
    detail: Option<&RawRecord>,
    summary: &mut HarvestSummary,
) -> Vec<MemberEntry> {
    let listed = match client.list_group_members(group).await {
        Ok(values) => values,
        Err(e) => {
            warn!(group, error = %e, "member listing failed; trying group detail");
            Vec::new()
        }
    };

    let values = if listed.is_empty() {
        match detail.and_then(embedded_members) {
            Some(embedded) => {
                summary.member_listing_fallbacks += 1;
                embedded.to_vec()
            }
            None => Vec::new(),
        }
    } else {
        listed
    };

    let (entries, malformed) = member_entries(&values);
    if malformed > 0 {
        warn!(group, malformed, "member entries without identifier skipped");
    }
    summary.malformed += malformed;
    entries
}

/// Harvest every group in the listing together with its members.
pub async fn harvest_groups(
    client: &dyn DirectoryClient,
    store: &dyn DirectoryStore,
    opts: &HarvestOptions,
    progress: &dyn HarvestProgressReporter,
    cancel: &CancellationToken,
) -> Result<HarvestSummary> {
    let target = SyncTarget::Groups;
    let target_name = target.as_str().to_string();
    let mut summary = HarvestSummary::new(target, opts.dry_run);

    progress.report(HarvestProgressEvent::Walking {
        target: target_name.clone(),
    });
    let Some(ctx) = walk(client, opts, &mut summary, cancel).await? else {
        return Ok(summary);
    };

    let group_ids: Vec<String> = ctx
        .identifiers()
        .iter()
        .filter(|id| ContactKind::classify(id) == ContactKind::Group)
        .cloned()
        .collect();
    summary.groups = group_ids.len();

    progress.report(HarvestProgressEvent::Resolving {
        target: target_name.clone(),
        identifiers: group_ids.len() as u64,
        chunks: group_ids.len().div_ceil(opts.resolve.chunk_size.max(1)) as u64,
    });
    let group_details = resolve_details(client, &group_ids, &opts.resolve, cancel).await;
    summary.absorb_resolution(&group_details);
    if summary.cancelled {
        return Ok(summary);
    }

    // Member listings, one group at a time.
    let mut entries_by_group: Vec<(String, Vec<MemberEntry>)> = Vec::with_capacity(group_ids.len());
    for (i, group) in group_ids.iter().enumerate() {
        if cancel.is_cancelled() {
            summary.cancelled = true;
            return Ok(summary);
        }
        let entries =
            group_member_entries(client, group, group_details.get(group), &mut summary).await;
        entries_by_group.push((group.clone(), entries));
        progress.report(HarvestProgressEvent::Members {
            target: target_name.clone(),
            n: (i + 1) as u64,
            total: group_ids.len() as u64,
        });
    }

    // Second resolution pass over every distinct member.
    let mut seen = HashSet::new();
    let member_ids: Vec<String> = entries_by_group
        .iter()
        .flat_map(|(_, entries)| entries.iter().map(|e| e.identifier.clone()))
        .filter(|id| seen.insert(id.clone()))
        .collect();
    progress.report(HarvestProgressEvent::Resolving {
        target: target_name.clone(),
        identifiers: member_ids.len() as u64,
        chunks: member_ids.len().div_ceil(opts.resolve.chunk_size.max(1)) as u64,
    });
    let member_details = resolve_details(client, &member_ids, &opts.resolve, cancel).await;
    summary.absorb_resolution(&member_details);
    if summary.cancelled {
        return Ok(summary);
    }

    let mut groups: Vec<ContactRecord> = Vec::with_capacity(group_ids.len());
    let mut members_by_group: BTreeMap<String, Vec<GroupMemberRecord>> = BTreeMap::new();
    for (group, entries) in &entries_by_group {
        let record = match group_details.get(group) {
            Some(raw) => opts.normalizer.contact(group, raw, ctx.started_at),
            None => {
                summary.detail_fallbacks += 1;
                opts.normalizer.fallback_contact(group, ctx.started_at)
            }
        };
        groups.push(record);

        let members = entries
            .iter()
            .map(|entry| {
                opts.normalizer.member(
                    group,
                    entry,
                    member_details.get(&entry.identifier),
                    ctx.started_at,
                )
            })
            .collect();
        members_by_group.insert(group.clone(), members);
    }

    let member_rows: usize = members_by_group.values().map(Vec::len).sum();
    summary.planned = ReconcileCounts {
        contacts_written: 0,
        groups_written: groups.len(),
        members_written: member_rows,
    };
    if opts.dry_run {
        return Ok(summary);
    }

    progress.report(HarvestProgressEvent::Reconciling {
        target: target_name,
        rows: (groups.len() + member_rows) as u64,
    });
    let report = reconcile(store, &[], &groups, &members_by_group).await?;
    summary.absorb_report(report);

    info!(
        groups = summary.counts.groups_written,
        members = summary.counts.members_written,
        skipped = summary.skipped.len(),
        "group harvest complete"
    );
    Ok(summary)
}

/// Run one target against the given client and store.
pub async fn harvest(
    target: SyncTarget,
    client: &dyn DirectoryClient,
    store: &dyn DirectoryStore,
    opts: &HarvestOptions,
    progress: &dyn HarvestProgressReporter,
    cancel: &CancellationToken,
) -> Result<HarvestSummary> {
    match target {
        SyncTarget::Contacts => harvest_contacts(client, store, opts, progress, cancel).await,
        SyncTarget::Groups => harvest_groups(client, store, opts, progress, cancel).await,
        SyncTarget::All => anyhow::bail!("'all' must be expanded into single targets"),
    }
}

/// Print a run summary in the CLI's line format.
pub fn print_summary(summary: &HarvestSummary) {
    if summary.dry_run {
        println!("sync {} (dry-run)", summary.target);
    } else {
        println!("sync {}", summary.target);
    }
    println!("  pages: {}", summary.pages);
    println!("  identifiers: {}", summary.identifiers);
    if summary.target == SyncTarget::Groups.as_str() {
        println!("  groups found: {}", summary.groups);
    }
    println!(
        "  detail chunks: {} ({} failed)",
        summary.chunks, summary.failed_chunks
    );
    println!("  detail fallbacks: {}", summary.detail_fallbacks);
    if summary.member_listing_fallbacks > 0 {
        println!(
            "  member lists from group detail: {}",
            summary.member_listing_fallbacks
        );
    }
    if summary.malformed > 0 {
        println!("  malformed records: {}", summary.malformed);
    }

    if summary.dry_run {
        println!("  contacts to write: {}", summary.planned.contacts_written);
        println!("  groups to write: {}", summary.planned.groups_written);
        println!("  members to write: {}", summary.planned.members_written);
    } else {
        println!("  contacts written: {}", summary.counts.contacts_written);
        println!("  groups written: {}", summary.counts.groups_written);
        println!("  members written: {}", summary.counts.members_written);
        println!("  skipped: {}", summary.skipped.len());
        for item in &summary.skipped {
            println!("    {}: {}", item.key, item.reason);
        }
        if summary.reconnects > 0 {
            println!("  reconnects: {}", summary.reconnects);
        }
    }

    println!("{}", if summary.cancelled { "cancelled" } else { "ok" });
}

/// One-line operator notification for a finished run.
pub fn notification_text(target: SyncTarget, outcome: &Result<HarvestSummary>) -> String {
    match outcome {
        Ok(s) if s.cancelled => format!(
            "harvest {} cancelled: {} contacts, {} groups, {} members written before stopping",
            target.as_str(),
            s.counts.contacts_written,
            s.counts.groups_written,
            s.counts.members_written
        ),
        Ok(s) => format!(
            "harvest {} ok: {} contacts, {} groups, {} members written; {} skipped, {} detail chunks failed",
            target.as_str(),
            s.counts.contacts_written,
            s.counts.groups_written,
            s.counts.members_written,
            s.skipped.len(),
            s.failed_chunks
        ),
        Err(e) => format!("harvest {} failed: {:#}", target.as_str(), e),
    }
}

async fn notify_operator(
    client: &dyn DirectoryClient,
    config: &Config,
    target: SyncTarget,
    outcome: &Result<HarvestSummary>,
) {
    let Some(operator) = config.notify.operator.as_deref() else {
        return;
    };
    if outcome.is_ok() && !config.notify.on_success {
        return;
    }
    let text = notification_text(target, outcome);
    if let Err(e) = client.send_notification(operator, &text).await {
        warn!(operator, error = %e, "operator notification failed");
    }
}

/// `harvester sync`: harvest each requested target in turn.
///
/// The store is closed on every exit path once it has been opened.
pub async fn run_sync(
    config: &Config,
    target: SyncTarget,
    dry_run: bool,
    progress: ProgressMode,
    cancel: CancellationToken,
) -> Result<()> {
    let store = SqliteStore::connect(&config.db).await?;
    let outcome = sync_targets(config, &store, target, dry_run, progress, &cancel).await;
    store.close().await;
    outcome
}

async fn sync_targets(
    config: &Config,
    store: &SqliteStore,
    target: SyncTarget,
    dry_run: bool,
    progress: ProgressMode,
    cancel: &CancellationToken,
) -> Result<()> {
    let pool = store.pool().await;
    migrate::verify_schema(&pool)
        .await
        .context("harvesting disabled")?;

    let client = HttpDirectoryClient::new(&config.remote)?;
    let reporter = progress.reporter();
    let opts = HarvestOptions::from_config(&config.harvest, dry_run);

    for single in target.expand() {
        let run_id = if dry_run {
            None
        } else {
            let started_at = chrono::Utc::now().timestamp();
            Some(
                runs::start_run(&pool, single.as_str(), started_at)
                    .await
                    .with_context(|| format!("failed to record {} run start", single.as_str()))?,
            )
        };

        let outcome = harvest(single, &client, store, &opts, reporter.as_ref(), cancel).await;

        if let Some(id) = &run_id {
            let (status, summary, err_text) = match &outcome {
                Ok(s) if s.cancelled => (RunStatus::Cancelled, Some(s), None),
                Ok(s) => (RunStatus::Ok, Some(s), None),
                Err(e) => (RunStatus::Failed, None, Some(format!("{:#}", e))),
            };
            // The store may be the thing that failed; the ledger is best effort.
            if let Err(e) =
                runs::finish_run(&store.pool().await, id, status, summary, err_text.as_deref())
                    .await
            {
                warn!(run = %id, error = %e, "failed to record harvest run");
            }
        }

        if !dry_run {
            notify_operator(&client, config, single, &outcome).await;
        }

        match outcome {
            Ok(summary) => {
                print_summary(&summary);
                if summary.cancelled {
                    break;
                }
            }
            Err(e) => {
                error!(run = single.as_str(), error = %format!("{:#}", e), "harvest failed");
                return Err(e);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use contact_harvest_core::models::SkipReason;

    #[test]
    fn all_expands_in_order() {
        assert_eq!(
            SyncTarget::All.expand(),
            vec![SyncTarget::Contacts, SyncTarget::Groups]
        );
        assert_eq!(SyncTarget::Groups.expand(), vec![SyncTarget::Groups]);
    }

    #[test]
    fn notification_texts() {
        let ok = HarvestSummary {
            target: "contacts".to_string(),
            counts: ReconcileCounts {
                contacts_written: 10,
                groups_written: 2,
                members_written: 0,
            },
            skipped: vec![SkippedItem {
                key: "x".to_string(),
                reason: SkipReason::MissingIdentifier,
            }],
            ..Default::default()
        };
        let text = notification_text(SyncTarget::Contacts, &Ok(ok));
        assert!(text.starts_with("harvest contacts ok: 10 contacts, 2 groups"));
        assert!(text.contains("1 skipped"));

        let failed = notification_text(
            SyncTarget::Groups,
            &Err(anyhow::anyhow!("boom").context("listing page 1 failed")),
        );
        assert_eq!(failed, "harvest groups failed: listing page 1 failed: boom");
    }

    #[test]
    fn options_follow_config() {
        let harvest = HarvestConfig {
            chunk_size: 5,
            concurrency: 2,
            max_pages: 9,
            max_stalled_pages: 1,
            placeholder_avatar: "p.png".to_string(),
        };
        let opts = HarvestOptions::from_config(&harvest, true);
        assert!(opts.dry_run);
        assert_eq!(opts.resolve.chunk_size, 5);
        assert_eq!(opts.walk.max_pages, 9);
        assert_eq!(opts.normalizer.placeholder_avatar(), "p.png");
    }

    #[tokio::test]
    async fn ledger_failure_still_closes_the_database() {
        let tmp = tempfile::TempDir::new().unwrap();
        let db_path = tmp.path().join("directory.sqlite");
        let config = crate::config::parse_config(&format!(
            "[db]\npath = {:?}\n\n[remote]\nbase_url = \"http://127.0.0.1:9\"\naccount = \"wxid_bot\"\n",
            db_path.display().to_string()
        ))
        .unwrap();

        let setup = crate::db::connect(&config.db).await.unwrap();
        migrate::create_schema(&setup).await.unwrap();
        sqlx::query(
            "CREATE TRIGGER reject_runs BEFORE INSERT ON harvest_runs \
             BEGIN SELECT RAISE(ABORT, 'ledger locked'); END",
        )
        .execute(&setup)
        .await
        .unwrap();
        setup.close().await;

        let err = run_sync(
            &config,
            SyncTarget::Contacts,
            false,
            ProgressMode::Off,
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(format!("{:#}", err).contains("ledger locked"));

        // The last connection checkpoints and removes the write-ahead log.
        assert!(!tmp.path().join("directory.sqlite-wal").exists());
    }
}

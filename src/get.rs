//! Read-side commands: one contact by identifier, or a page of contacts.
//!
//! Used by `harvester get` and `harvester list`.

use anyhow::{bail, Result};
use serde::Serialize;

use contact_harvest_core::models::{ContactKind, ContactRecord, GroupMemberRecord};
use contact_harvest_core::store::{ContactFilter, DirectoryStore};

use crate::config::Config;
use crate::migrate;
use crate::stats;
use crate::sqlite_store::SqliteStore;

/// A contact and, for groups, its member rows.
#[derive(Debug, Clone, Serialize)]
pub struct ContactDetail {
    pub contact: ContactRecord,
    pub members: Vec<GroupMemberRecord>,
}

/// Core lookup returning structured data.
pub async fn get_contact(store: &dyn DirectoryStore, identifier: &str) -> Result<ContactDetail> {
    let identifier = identifier.trim();
    let Some(contact) = store.get_contact(identifier).await? else {
        bail!("contact not found: {}", identifier);
    };

    let members = if contact.kind == ContactKind::Group {
        store.list_group_members(identifier).await?
    } else {
        Vec::new()
    };

    Ok(ContactDetail { contact, members })
}

fn or_dash(s: &str) -> &str {
    if s.is_empty() {
        "-"
    } else {
        s
    }
}

/// CLI entry point: look up one contact and print it to stdout.
pub async fn run_get(config: &Config, identifier: &str) -> Result<()> {
    let store = SqliteStore::connect(&config.db).await?;
    migrate::verify_schema(&store.pool().await).await?;
    let result = get_contact(&store, identifier).await;
    store.close().await;
    let ContactDetail { contact, members } = result?;

    println!("--- Contact ---");
    println!("identifier:   {}", contact.identifier);
    println!("kind:         {}", contact.kind);
    println!("display_name: {}", contact.display_name);
    println!("remark_name:  {}", or_dash(&contact.remark_name));
    println!("alias:        {}", or_dash(&contact.alias));
    println!("region:       {}", or_dash(&contact.region));
    println!("avatar_url:   {}", contact.avatar_url);
    println!(
        "last_updated: {}",
        contact.last_updated.format("%Y-%m-%dT%H:%M:%SZ")
    );
    println!("extra:        {}", contact.extra);

    if contact.kind == ContactKind::Group {
        println!();
        println!("--- Members ({}) ---", members.len());
        for m in &members {
            let joined = m
                .join_time
                .and_then(|ts| stats::format_epoch(ts, "%Y-%m-%d"))
                .unwrap_or_else(|| "-".to_string());
            println!(
                "{:<28} {:<24} invited by {:<24} joined {}",
                m.member_identifier,
                m.display_name,
                m.inviter_identifier.as_deref().unwrap_or("-"),
                joined
            );
        }
    }

    Ok(())
}

/// CLI entry point: print a page of contacts ordered by display name.
pub async fn run_list(
    config: &Config,
    kind: Option<ContactKind>,
    limit: Option<usize>,
    offset: usize,
) -> Result<()> {
    let store = SqliteStore::connect(&config.db).await?;
    migrate::verify_schema(&store.pool().await).await?;
    let filter = ContactFilter {
        kind,
        offset,
        limit,
    };
    let contacts = store.list_contacts(&filter).await;
    store.close().await;
    let contacts = contacts?;

    if contacts.is_empty() {
        println!("No contacts found.");
        return Ok(());
    }

    println!("{:<32} {:<9} {:<24} {}", "IDENTIFIER", "KIND", "NAME", "REMARK");
    println!("{}", "-".repeat(80));
    for c in &contacts {
        println!(
            "{:<32} {:<9} {:<24} {}",
            c.identifier,
            c.kind.as_str(),
            c.display_name,
            or_dash(&c.remark_name)
        );
    }
    println!();
    println!("{} contact(s)", contacts.len());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use contact_harvest_core::store::memory::InMemoryStore;
    use serde_json::json;

    fn contact(id: &str) -> ContactRecord {
        ContactRecord {
            identifier: id.to_string(),
            display_name: id.to_string(),
            remark_name: String::new(),
            alias: String::new(),
            avatar_url: String::new(),
            kind: ContactKind::classify(id),
            region: String::new(),
            last_updated: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            extra: json!({}),
        }
    }

    #[tokio::test]
    async fn group_lookup_includes_members() {
        let store = InMemoryStore::new();
        store.upsert_contact(&contact("g@chatroom")).await.unwrap();
        store
            .upsert_group_member(&GroupMemberRecord {
                group_identifier: "g@chatroom".to_string(),
                member_identifier: "wxid_a".to_string(),
                display_name: "A".to_string(),
                nickname: "A".to_string(),
                province: String::new(),
                city: String::new(),
                signature: String::new(),
                avatar_url: String::new(),
                inviter_identifier: None,
                join_time: None,
                last_updated: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
                extra: json!({}),
            })
            .await
            .unwrap();

        let detail = get_contact(&store, " g@chatroom ").await.unwrap();
        assert_eq!(detail.members.len(), 1);
    }

    #[tokio::test]
    async fn unknown_identifier_is_an_error() {
        let store = InMemoryStore::new();
        let err = get_contact(&store, "nobody").await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}

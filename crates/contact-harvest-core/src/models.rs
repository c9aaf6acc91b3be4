//! Core data models shared by the harvest engine and the stores.
//!
//! Remote payloads arrive as loosely-shaped JSON objects ([`RawRecord`]);
//! the normalizer turns them into [`ContactRecord`] and
//! [`GroupMemberRecord`], which are what the stores persist.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A detail record exactly as the remote directory returned it.
pub type RawRecord = Map<String, Value>;

/// Identifier suffix used by group chats.
pub const GROUP_SUFFIX: &str = "@chatroom";

/// Identifier prefix used by official accounts.
pub const OFFICIAL_PREFIX: &str = "gh_";

/// What an identifier refers to.
///
/// Always derived from the identifier's shape via [`ContactKind::classify`],
/// never read from a remote field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactKind {
    Friend,
    Group,
    Official,
}

impl ContactKind {
    /// Classify an identifier: `…@chatroom` is a group, `gh_…` an official
    /// account, anything else a friend.
    pub fn classify(identifier: &str) -> Self {
        if identifier.ends_with(GROUP_SUFFIX) {
            ContactKind::Group
        } else if identifier.starts_with(OFFICIAL_PREFIX) {
            ContactKind::Official
        } else {
            ContactKind::Friend
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContactKind::Friend => "friend",
            ContactKind::Group => "group",
            ContactKind::Official => "official",
        }
    }
}

impl fmt::Display for ContactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContactKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "friend" => Ok(ContactKind::Friend),
            "group" => Ok(ContactKind::Group),
            "official" => Ok(ContactKind::Official),
            other => anyhow::bail!(
                "unknown contact kind: '{}'. Must be friend, group, or official.",
                other
            ),
        }
    }
}

/// Shorthand for [`ContactKind::classify`].
pub fn classify(identifier: &str) -> ContactKind {
    ContactKind::classify(identifier)
}

/// Last-known state of a contact, group, or official account.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContactRecord {
    /// Stable remote handle; primary key in the store.
    pub identifier: String,
    pub display_name: String,
    pub remark_name: String,
    pub alias: String,
    pub avatar_url: String,
    pub kind: ContactKind,
    pub region: String,
    /// Harvest time of the write that produced this row.
    pub last_updated: DateTime<Utc>,
    /// Remote fields the normalizer did not map, kept verbatim.
    pub extra: Value,
}

/// Membership of one identifier in one group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupMemberRecord {
    pub group_identifier: String,
    pub member_identifier: String,
    /// Group-specific display name.
    pub display_name: String,
    pub nickname: String,
    pub province: String,
    pub city: String,
    pub signature: String,
    pub avatar_url: String,
    pub inviter_identifier: Option<String>,
    /// Epoch seconds.
    pub join_time: Option<i64>,
    pub last_updated: DateTime<Utc>,
    pub extra: Value,
}

impl GroupMemberRecord {
    /// `group/member` label used in logs and skip reports.
    pub fn key(&self) -> String {
        format!("{}/{}", self.group_identifier, self.member_identifier)
    }
}

/// Why an item was not written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    /// A remote record carried none of the identifier-bearing fields.
    MissingIdentifier,
    /// The store refused the row for a reason other than connectivity.
    StoreRejected(String),
    /// Member rows whose group row was not written in the same run.
    GroupNotWritten,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::MissingIdentifier => f.write_str("record has no identifier"),
            SkipReason::StoreRejected(msg) => write!(f, "store rejected row: {}", msg),
            SkipReason::GroupNotWritten => f.write_str("group row was not written"),
        }
    }
}

/// Result of handling one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Written,
    Skipped(SkipReason),
}

/// A skipped item and the reason, for the harvest summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedItem {
    pub key: String,
    #[serde(flatten)]
    pub reason: SkipReason,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_by_identifier_shape() {
        assert_eq!(classify("abc@chatroom"), ContactKind::Group);
        assert_eq!(classify("gh_xyz"), ContactKind::Official);
        assert_eq!(classify("wxid_1"), ContactKind::Friend);
    }

    #[test]
    fn classify_edge_shapes() {
        // Suffix wins over prefix.
        assert_eq!(classify("gh_team@chatroom"), ContactKind::Group);
        assert_eq!(classify("chatroom"), ContactKind::Friend);
        assert_eq!(classify("xgh_abc"), ContactKind::Friend);
        assert_eq!(classify("@chatroom.bak"), ContactKind::Friend);
    }

    #[test]
    fn kind_parses_its_own_label() {
        for kind in [ContactKind::Friend, ContactKind::Group, ContactKind::Official] {
            assert_eq!(kind.as_str().parse::<ContactKind>().unwrap(), kind);
        }
        assert_eq!(" Group ".parse::<ContactKind>().unwrap(), ContactKind::Group);
        assert!("bot".parse::<ContactKind>().is_err());
    }

    #[test]
    fn skipped_item_serializes_flat() {
        let item = SkippedItem {
            key: "g1@chatroom/u1".to_string(),
            reason: SkipReason::StoreRejected("constraint".to_string()),
        };
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["key"], "g1@chatroom/u1");
        assert_eq!(json["reason"], "store_rejected");
        assert_eq!(json["detail"], "constraint");
    }
}

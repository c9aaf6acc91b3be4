//! Record normalization.
//!
//! Converts raw remote detail records into [`ContactRecord`] and
//! [`GroupMemberRecord`]. Every logical field is read through an ordered
//! [`Extractor`] table; the first extractor yielding a value wins. Keys that
//! appear in no table are carried into `extra` untouched.
//!
//! Normalization is total: missing fields become empty strings or the
//! documented fallbacks (identifier as display name, placeholder avatar).

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::field::Extractor::{self, Joined, Key};
use crate::field::{first_integer, first_text, FlexibleField, WRAPPER_KEY};
use crate::models::{classify, ContactRecord, GroupMemberRecord, RawRecord};

pub const DEFAULT_PLACEHOLDER_AVATAR: &str = "/static/avatar/default.png";

/// Identifier-bearing fields, in priority order.
pub const IDENTIFIER: &[Extractor] = &[
    Key("UserName"),
    Key("userName"),
    Key("wxid"),
    Key("Wxid"),
];

const NICKNAME: &[Extractor] = &[Key("NickName"), Key("nickname")];
const REMARK: &[Extractor] = &[Key("RemarkName"), Key("remark")];
const ALIAS: &[Extractor] = &[Key("Alias"), Key("alias")];
const AVATAR: &[Extractor] = &[
    Key("SmallHeadImgUrl"),
    Key("BigHeadImgUrl"),
    Key("HeadImgUrl"),
    Key("avatar"),
];
const REGION: &[Extractor] = &[Joined(&["Province", "City"]), Key("region")];

const CONTACT_FIELDS: &[&[Extractor]] = &[IDENTIFIER, NICKNAME, REMARK, ALIAS, AVATAR, REGION];

const MEMBER_DISPLAY_NAME: &[Extractor] = &[Key("DisplayName"), Key("display_name")];
const PROVINCE: &[Extractor] = &[Key("Province"), Key("province")];
const CITY: &[Extractor] = &[Key("City"), Key("city")];
const SIGNATURE: &[Extractor] = &[Key("Signature"), Key("signature")];
const INVITER: &[Extractor] = &[Key("InviterUserName"), Key("inviter")];
const JOIN_TIME: &[Extractor] = &[Key("JoinTime"), Key("join_time")];

const MEMBER_FIELDS: &[&[Extractor]] = &[
    IDENTIFIER,
    NICKNAME,
    MEMBER_DISPLAY_NAME,
    PROVINCE,
    CITY,
    SIGNATURE,
    AVATAR,
    INVITER,
    JOIN_TIME,
];

/// Where a group's own detail record may embed its member list.
const EMBEDDED_MEMBER_PATHS: &[&[&str]] = &[
    &["NewChatroomData", "ChatRoomMember"],
    &["ChatRoomMember"],
    &["MemberList"],
    &["members"],
];

/// First identifier-bearing field of a raw record, trimmed.
pub fn extract_identifier(raw: &RawRecord) -> Option<String> {
    first_text(raw, IDENTIFIER)
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
}

/// Whether a detail value should replace the listing's value for its key:
/// decodable text, or a non-empty array or plain object.
fn carries_value(value: &Value) -> bool {
    match value {
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) if !map.contains_key(WRAPPER_KEY) => !map.is_empty(),
        _ => FlexibleField::decode(Some(value)).text().is_some(),
    }
}

/// Copy every key not read by any of `tables`.
fn unmapped(raw: &RawRecord, tables: &[&[Extractor]]) -> Value {
    let mapped: HashSet<&str> = tables
        .iter()
        .flat_map(|table| table.iter())
        .flat_map(|e| e.keys().iter().copied())
        .collect();

    let extra: RawRecord = raw
        .iter()
        .filter(|(key, _)| !mapped.contains(key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    Value::Object(extra)
}

/// A member as it appeared in a group's member listing.
///
/// `listing` holds whatever fields the listing carried for this member
/// (group display name, inviter, join time); it is empty when the listing
/// only returned bare identifiers.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberEntry {
    pub identifier: String,
    pub listing: RawRecord,
}

/// Decode a member listing whose entries are bare identifiers, wrapped
/// identifiers, or member objects. Duplicates keep their first occurrence.
///
/// Returns the entries and the number of entries with no identifier.
pub fn member_entries(values: &[Value]) -> (Vec<MemberEntry>, usize) {
    let mut seen = HashSet::new();
    let mut entries = Vec::with_capacity(values.len());
    let mut malformed = 0;

    for value in values {
        let entry = match value {
            Value::Object(map) if !map.contains_key(WRAPPER_KEY) => {
                extract_identifier(map).map(|identifier| MemberEntry {
                    identifier,
                    listing: map.clone(),
                })
            }
            other => FlexibleField::decode(Some(other))
                .text()
                .map(|id| id.trim().to_string())
                .map(|identifier| MemberEntry {
                    identifier,
                    listing: RawRecord::new(),
                }),
        };

        match entry {
            Some(entry) => {
                if seen.insert(entry.identifier.clone()) {
                    entries.push(entry);
                }
            }
            None => malformed += 1,
        }
    }

    (entries, malformed)
}

/// Member list embedded in a group's own detail record, if any.
pub fn embedded_members(group_detail: &RawRecord) -> Option<&[Value]> {
    EMBEDDED_MEMBER_PATHS.iter().find_map(|path| {
        let (first, rest) = path.split_first()?;
        let mut node = group_detail.get(*first)?;
        for key in rest {
            node = node.get(*key)?;
        }
        node.as_array()
            .filter(|members| !members.is_empty())
            .map(|members| members.as_slice())
    })
}

/// Maps raw records to canonical records.
#[derive(Debug, Clone)]
pub struct Normalizer {
    placeholder_avatar: String,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(DEFAULT_PLACEHOLDER_AVATAR)
    }
}

impl Normalizer {
    pub fn new(placeholder_avatar: impl Into<String>) -> Self {
        Self {
            placeholder_avatar: placeholder_avatar.into(),
        }
    }

    pub fn placeholder_avatar(&self) -> &str {
        &self.placeholder_avatar
    }

    /// Normalize the detail record resolved for `identifier`.
    ///
    /// `kind` comes from the identifier alone; any type label in the raw
    /// record is ignored and kept in `extra`.
    pub fn contact(&self, identifier: &str, raw: &RawRecord, at: DateTime<Utc>) -> ContactRecord {
        ContactRecord {
            identifier: identifier.to_string(),
            display_name: first_text(raw, NICKNAME).unwrap_or_else(|| identifier.to_string()),
            remark_name: first_text(raw, REMARK).unwrap_or_default(),
            alias: first_text(raw, ALIAS).unwrap_or_default(),
            avatar_url: first_text(raw, AVATAR)
                .unwrap_or_else(|| self.placeholder_avatar.clone()),
            kind: classify(identifier),
            region: first_text(raw, REGION).unwrap_or_default(),
            last_updated: at,
            extra: unmapped(raw, CONTACT_FIELDS),
        }
    }

    /// Record for an identifier whose detail lookup produced nothing.
    pub fn fallback_contact(&self, identifier: &str, at: DateTime<Utc>) -> ContactRecord {
        self.contact(identifier, &RawRecord::new(), at)
    }

    /// Normalize one group member from its listing entry and, when
    /// available, its resolved detail record. Detail fields that carry a
    /// value take precedence over listing fields; blank detail fields only
    /// fill keys the listing lacks.
    pub fn member(
        &self,
        group_identifier: &str,
        entry: &MemberEntry,
        detail: Option<&RawRecord>,
        at: DateTime<Utc>,
    ) -> GroupMemberRecord {
        let mut merged = entry.listing.clone();
        if let Some(detail) = detail {
            for (key, value) in detail {
                if carries_value(value) || !merged.contains_key(key) {
                    merged.insert(key.clone(), value.clone());
                }
            }
        }

        let nickname =
            first_text(&merged, NICKNAME).unwrap_or_else(|| entry.identifier.clone());
        let display_name =
            first_text(&merged, MEMBER_DISPLAY_NAME).unwrap_or_else(|| nickname.clone());

        GroupMemberRecord {
            group_identifier: group_identifier.to_string(),
            member_identifier: entry.identifier.clone(),
            display_name,
            nickname,
            province: first_text(&merged, PROVINCE).unwrap_or_default(),
            city: first_text(&merged, CITY).unwrap_or_default(),
            signature: first_text(&merged, SIGNATURE).unwrap_or_default(),
            avatar_url: first_text(&merged, AVATAR)
                .unwrap_or_else(|| self.placeholder_avatar.clone()),
            inviter_identifier: first_text(&merged, INVITER),
            join_time: first_integer(&merged, JOIN_TIME),
            last_updated: at,
            extra: unmapped(&merged, MEMBER_FIELDS),
        }
    }
}

/// Normalize a self-describing record with the default placeholder.
/// Returns `None` when the record carries no identifier.
pub fn normalize(raw: &RawRecord, at: DateTime<Utc>) -> Option<ContactRecord> {
    let identifier = extract_identifier(raw)?;
    Some(Normalizer::default().contact(&identifier, raw, at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ContactKind;
    use chrono::TimeZone;
    use serde_json::json;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn record(value: Value) -> RawRecord {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn wrapped_nickname_and_verbatim_extra() {
        let raw = record(json!({ "NickName": { "string": "Alice" }, "Foo": "bar" }));
        let contact = Normalizer::default().contact("wxid_alice", &raw, at());
        assert_eq!(contact.display_name, "Alice");
        assert_eq!(contact.extra, json!({ "Foo": "bar" }));
    }

    #[test]
    fn blank_or_marker_nickname_falls_back_to_identifier() {
        let n = Normalizer::default();
        for raw in [
            json!({}),
            json!({ "NickName": "" }),
            json!({ "NickName": {} }),
            json!({ "NickName": "{}" }),
            json!({ "NickName": { "string": "  " } }),
        ] {
            let contact = n.contact("wxid_q", &record(raw), at());
            assert_eq!(contact.display_name, "wxid_q");
        }
    }

    #[test]
    fn avatar_priority_and_placeholder() {
        let n = Normalizer::new("placeholder.png");
        let both = record(json!({ "BigHeadImgUrl": "big", "SmallHeadImgUrl": "small" }));
        let head = record(json!({ "HeadImgUrl": "head", "avatar": "plain" }));
        let plain = record(json!({ "avatar": "plain" }));
        assert_eq!(n.contact("a", &both, at()).avatar_url, "small");
        assert_eq!(n.contact("a", &head, at()).avatar_url, "head");
        assert_eq!(n.contact("a", &plain, at()).avatar_url, "plain");
        assert_eq!(n.fallback_contact("a", at()).avatar_url, "placeholder.png");
    }

    #[test]
    fn region_prefers_province_and_city() {
        let n = Normalizer::default();
        let both = record(json!({ "Province": "Guangdong", "City": "Shenzhen", "region": "CN" }));
        let only_region = record(json!({ "region": "CN" }));
        assert_eq!(n.contact("a", &both, at()).region, "Guangdong Shenzhen");
        assert_eq!(n.contact("a", &only_region, at()).region, "CN");
        assert_eq!(n.fallback_contact("a", at()).region, "");
    }

    #[test]
    fn kind_ignores_remote_labels() {
        let raw = record(json!({ "UserName": "g1@chatroom", "type": "friend" }));
        let contact = Normalizer::default().contact("g1@chatroom", &raw, at());
        assert_eq!(contact.kind, ContactKind::Group);
        assert_eq!(contact.extra, json!({ "type": "friend" }));
    }

    #[test]
    fn mapped_keys_never_reach_extra() {
        let raw = record(json!({
            "UserName": { "string": "wxid_1" },
            "NickName": "Bob",
            "nickname": "bob",
            "RemarkName": "B",
            "Alias": "bobby",
            "BigHeadImgUrl": "big",
            "Province": "P",
            "City": "C",
            "Sex": 1,
            "Labels": { "ids": [1, 2] },
        }));
        let contact = Normalizer::default().contact("wxid_1", &raw, at());
        assert_eq!(contact.remark_name, "B");
        assert_eq!(contact.alias, "bobby");
        assert_eq!(contact.extra, json!({ "Sex": 1, "Labels": { "ids": [1, 2] } }));
    }

    #[test]
    fn extra_keeps_remote_key_order() {
        let raw: RawRecord = serde_json::from_str(
            r#"{"Zeta":1,"UserName":"wxid_1","Alpha":2,"NickName":"Bob","Mid":{"b":1,"a":2}}"#,
        )
        .unwrap();
        let contact = Normalizer::default().contact("wxid_1", &raw, at());
        assert_eq!(
            serde_json::to_string(&contact.extra).unwrap(),
            r#"{"Zeta":1,"Alpha":2,"Mid":{"b":1,"a":2}}"#
        );
    }

    #[test]
    fn normalize_requires_identifier() {
        let with_id = record(json!({ "UserName": { "string": "wxid_7" }, "NickName": "Seven" }));
        let without = record(json!({ "NickName": "Nobody" }));
        let contact = normalize(&with_id, at()).unwrap();
        assert_eq!(contact.identifier, "wxid_7");
        assert_eq!(contact.kind, ContactKind::Friend);
        assert!(normalize(&without, at()).is_none());
    }

    #[test]
    fn identifier_accepts_both_shapes() {
        assert_eq!(
            extract_identifier(&record(json!({ "UserName": { "string": " u1 " } }))).as_deref(),
            Some("u1")
        );
        assert_eq!(
            extract_identifier(&record(json!({ "UserName": {}, "wxid": "u2" }))).as_deref(),
            Some("u2")
        );
        assert_eq!(extract_identifier(&record(json!({ "UserName": "" }))), None);
    }

    #[test]
    fn member_entries_mixed_shapes() {
        let values = vec![
            json!("u1"),
            json!({ "string": "u2" }),
            json!({ "UserName": "u3", "DisplayName": "Three" }),
            json!({ "DisplayName": "ghost" }),
            json!("u1"),
            json!(42),
        ];
        let (entries, malformed) = member_entries(&values);
        let ids: Vec<&str> = entries.iter().map(|e| e.identifier.as_str()).collect();
        // `42` decodes to the text "42".
        assert_eq!(ids, vec!["u1", "u2", "u3", "42"]);
        assert_eq!(malformed, 1);
        assert!(entries[0].listing.is_empty());
        assert_eq!(entries[2].listing["DisplayName"], "Three");
    }

    #[test]
    fn embedded_members_paths() {
        let nested = record(json!({
            "NewChatroomData": { "MemberCount": 1, "ChatRoomMember": [{ "UserName": "u1" }] }
        }));
        let flat = record(json!({ "MemberList": ["u2"] }));
        let empty = record(json!({ "ChatRoomMember": [], "members": ["u3"] }));
        assert_eq!(embedded_members(&nested).unwrap().len(), 1);
        assert_eq!(embedded_members(&flat).unwrap(), &[json!("u2")]);
        assert_eq!(embedded_members(&empty).unwrap(), &[json!("u3")]);
        assert!(embedded_members(&RawRecord::new()).is_none());
    }

    #[test]
    fn member_merges_listing_and_detail() {
        let entry = MemberEntry {
            identifier: "u1".to_string(),
            listing: record(json!({
                "UserName": "u1",
                "DisplayName": "Team Lead",
                "NickName": "old",
                "InviterUserName": "u9",
                "JoinTime": "1700000000",
                "ChatroomMemberFlag": 0,
            })),
        };
        let detail = record(json!({
            "UserName": { "string": "u1" },
            "NickName": { "string": "Uno" },
            "Province": {},
            "City": "Hangzhou",
            "Signature": "hi",
            "SmallHeadImgUrl": "s.png",
        }));
        let member = Normalizer::default().member("g1@chatroom", &entry, Some(&detail), at());
        assert_eq!(member.group_identifier, "g1@chatroom");
        assert_eq!(member.member_identifier, "u1");
        assert_eq!(member.display_name, "Team Lead");
        assert_eq!(member.nickname, "Uno");
        assert_eq!(member.province, "");
        assert_eq!(member.city, "Hangzhou");
        assert_eq!(member.signature, "hi");
        assert_eq!(member.avatar_url, "s.png");
        assert_eq!(member.inviter_identifier.as_deref(), Some("u9"));
        assert_eq!(member.join_time, Some(1_700_000_000));
        assert_eq!(member.extra, json!({ "ChatroomMemberFlag": 0 }));
    }

    #[test]
    fn blank_detail_fields_keep_listing_values() {
        let entry = MemberEntry {
            identifier: "u1".to_string(),
            listing: record(json!({ "NickName": "Ann", "DisplayName": "Lead" })),
        };
        let detail = record(json!({
            "NickName": { "string": "" },
            "DisplayName": "",
            "City": { "string": "Ningbo" },
        }));
        let member = Normalizer::default().member("g1@chatroom", &entry, Some(&detail), at());
        assert_eq!(member.nickname, "Ann");
        assert_eq!(member.display_name, "Lead");
        assert_eq!(member.city, "Ningbo");
    }

    #[test]
    fn member_without_detail_falls_back() {
        let entry = MemberEntry {
            identifier: "u5".to_string(),
            listing: RawRecord::new(),
        };
        let member = Normalizer::new("p.png").member("g@chatroom", &entry, None, at());
        assert_eq!(member.nickname, "u5");
        assert_eq!(member.display_name, "u5");
        assert_eq!(member.avatar_url, "p.png");
        assert_eq!(member.inviter_identifier, None);
        assert_eq!(member.join_time, None);
        assert_eq!(member.extra, json!({}));
    }
}

//! HTTP implementation of [`DirectoryClient`].
//!
//! Every endpoint is a JSON `POST` relative to `[remote].base_url`, carrying
//! the bot account as `Wxid`, and answers with the envelope
//! `{ "Success": bool, "Message": str, "Data": .. }`. A non-2xx status or
//! `Success = false` fails that one call; the engine decides whether the
//! failure is fatal.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use contact_harvest_core::client::{Cursors, DirectoryClient, IdentifierPage};
use contact_harvest_core::field::FlexibleField;
use contact_harvest_core::models::RawRecord;
use contact_harvest_core::normalize::embedded_members;

use crate::config::RemoteConfig;

const LIST_PATH: &str = "/Friend/GetContractList";
const DETAIL_PATH: &str = "/Friend/GetContractDetail";
const MEMBERS_PATH: &str = "/Group/GetChatRoomMemberDetail";
const SEND_TEXT_PATH: &str = "/Msg/SendTxt";

pub struct HttpDirectoryClient {
    client: reqwest::Client,
    base_url: String,
    account: String,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "Success", default)]
    success: bool,
    #[serde(rename = "Message", default)]
    message: Option<String>,
    #[serde(rename = "Data", default)]
    data: Value,
}

impl HttpDirectoryClient {
    pub fn new(remote: &RemoteConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(remote.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: remote.base_url.trim().trim_end_matches('/').to_string(),
            account: remote.account.trim().to_string(),
        })
    }

    async fn call(&self, path: &str, mut body: Value) -> Result<Value> {
        if let Value::Object(map) = &mut body {
            map.insert("Wxid".to_string(), Value::String(self.account.clone()));
        }

        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("POST {} failed", path))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("{} returned HTTP {}: {}", path, status, text.trim());
        }

        let payload: Value = resp
            .json()
            .await
            .with_context(|| format!("{} returned a non-JSON body", path))?;
        debug!(path, "remote call ok");
        unwrap_envelope(path, payload)
    }
}

/// `Data` of a successful envelope.
fn unwrap_envelope(path: &str, payload: Value) -> Result<Value> {
    let envelope: Envelope = serde_json::from_value(payload)
        .with_context(|| format!("{} returned an unexpected response shape", path))?;
    if !envelope.success {
        bail!(
            "{} failed: {}",
            path,
            envelope
                .message
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| "no message".to_string())
        );
    }
    Ok(envelope.data)
}

fn identifier_page(data: &Value, sent: Cursors) -> IdentifierPage {
    let identifiers = data
        .get("ContactUsernameList")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(|v| FlexibleField::decode(Some(v)).text())
                .collect()
        })
        .unwrap_or_default();

    let cursor = |key: &str, fallback: i64| {
        FlexibleField::decode(data.get(key))
            .integer()
            .unwrap_or(fallback)
    };

    IdentifierPage {
        identifiers,
        next: Cursors::new(
            cursor("CurrentWxcontactSeq", sent.contact),
            cursor("CurrentChatroomContactSeq", sent.group),
        ),
    }
}

fn contact_list(data: &Value) -> Vec<RawRecord> {
    data.get("ContactList")
        .and_then(Value::as_array)
        .map(|list| list.iter().filter_map(|v| v.as_object().cloned()).collect())
        .unwrap_or_default()
}

fn member_list(data: &Value) -> Vec<Value> {
    match data {
        Value::Array(list) => list.clone(),
        Value::Object(map) => embedded_members(map).map(<[Value]>::to_vec).unwrap_or_default(),
        _ => Vec::new(),
    }
}

#[async_trait]
impl DirectoryClient for HttpDirectoryClient {
    async fn list_identifiers(&self, cursors: Cursors) -> Result<IdentifierPage> {
        let data = self
            .call(
                LIST_PATH,
                json!({
                    "CurrentWxcontactSeq": cursors.contact,
                    "CurrentChatroomContactSeq": cursors.group,
                }),
            )
            .await?;
        Ok(identifier_page(&data, cursors))
    }

    async fn resolve_detail(&self, identifiers: &[String]) -> Result<Vec<RawRecord>> {
        let data = self
            .call(
                DETAIL_PATH,
                json!({ "Towxids": identifiers.join(","), "ChatRoom": "" }),
            )
            .await?;
        Ok(contact_list(&data))
    }

    async fn list_group_members(&self, group_identifier: &str) -> Result<Vec<Value>> {
        let data = self
            .call(MEMBERS_PATH, json!({ "QID": group_identifier }))
            .await?;
        Ok(member_list(&data))
    }

    async fn send_notification(&self, target: &str, text: &str) -> Result<()> {
        self.call(
            SEND_TEXT_PATH,
            json!({ "ToWxid": target, "Content": text, "Type": 1 }),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_failure_carries_message() {
        let err = unwrap_envelope(
            LIST_PATH,
            json!({ "Success": false, "Message": "not logged in", "Data": null }),
        )
        .unwrap_err();
        assert!(err.to_string().contains("not logged in"));

        let data = unwrap_envelope(LIST_PATH, json!({ "Success": true, "Data": { "a": 1 } })).unwrap();
        assert_eq!(data, json!({ "a": 1 }));
    }

    #[test]
    fn envelope_without_success_flag_fails() {
        assert!(unwrap_envelope(LIST_PATH, json!({ "Data": {} })).is_err());
    }

    #[test]
    fn identifier_page_accepts_wrapped_values() {
        let data = json!({
            "ContactUsernameList": ["wxid_a", { "string": "g1@chatroom" }, {}, ""],
            "CurrentWxcontactSeq": 120,
            "CurrentChatroomContactSeq": { "string": "7" },
        });
        let page = identifier_page(&data, Cursors::default());
        assert_eq!(page.identifiers, vec!["wxid_a", "g1@chatroom"]);
        assert_eq!(page.next, Cursors::new(120, 7));
    }

    #[test]
    fn missing_cursors_repeat_sent_ones() {
        let page = identifier_page(&json!({}), Cursors::new(3, 4));
        assert!(page.identifiers.is_empty());
        assert_eq!(page.next, Cursors::new(3, 4));
    }

    #[test]
    fn contact_list_drops_non_objects() {
        let data = json!({ "ContactList": [{ "UserName": { "string": "a" } }, "junk", null] });
        assert_eq!(contact_list(&data).len(), 1);
        assert!(contact_list(&json!(null)).is_empty());
    }

    #[test]
    fn member_list_shapes() {
        let nested = json!({ "NewChatroomData": { "ChatRoomMember": [{ "UserName": "u1" }] } });
        let flat = json!({ "MemberList": ["u1", "u2"] });
        let bare = json!(["u1", "u2", "u3"]);
        assert_eq!(member_list(&nested).len(), 1);
        assert_eq!(member_list(&flat).len(), 2);
        assert_eq!(member_list(&bare).len(), 3);
        assert!(member_list(&json!({ "ChatroomUserName": "g" })).is_empty());
    }
}

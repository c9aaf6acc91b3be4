//! Pagination cursor walk over the identifier listing.
//!
//! The walk issues listing calls with the current cursor pair until the
//! remote stops making progress: an empty batch, or cursors returned
//! unchanged. Because a misbehaving remote can keep advancing its cursors
//! forever without returning anything new, the walk also enforces a hard
//! page ceiling and a limit on consecutive pages that add no identifiers.
//!
//! Any page failure aborts the walk; a partial listing is never returned.

use anyhow::{bail, Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::client::DirectoryClient;
use crate::context::HarvestContext;

/// Safety ceilings for one walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkLimits {
    /// Maximum listing calls per walk.
    pub max_pages: usize,
    /// Abort after this many consecutive pages with no new identifiers.
    pub max_stalled_pages: usize,
}

impl Default for WalkLimits {
    fn default() -> Self {
        Self {
            max_pages: 10_000,
            max_stalled_pages: 5,
        }
    }
}

/// How a walk ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkStatus {
    /// The remote stopped making progress.
    Complete,
    /// The cancellation token fired between pages. Identifiers gathered so
    /// far remain in the context.
    Cancelled,
}

/// Walk every page of the identifier listing into `ctx`.
///
/// Both cursors restart at zero. On return `ctx.identifiers()` holds the
/// union of every batch, deduplicated in first-seen order, and `ctx.pages`
/// the number of listing calls made.
pub async fn walk_all_identifiers<C>(
    client: &C,
    ctx: &mut HarvestContext,
    limits: &WalkLimits,
    cancel: &CancellationToken,
) -> Result<WalkStatus>
where
    C: DirectoryClient + ?Sized,
{
    ctx.reset_walk();
    let mut stalled = 0usize;

    loop {
        if cancel.is_cancelled() {
            info!(pages = ctx.pages, "identifier walk cancelled");
            return Ok(WalkStatus::Cancelled);
        }
        if ctx.pages >= limits.max_pages {
            bail!(
                "identifier listing did not converge after {} pages (cursors {}/{})",
                ctx.pages,
                ctx.cursors.contact,
                ctx.cursors.group
            );
        }

        let sent = ctx.cursors;
        let page = client.list_identifiers(sent).await.with_context(|| {
            format!(
                "listing page {} failed (cursors {}/{})",
                ctx.pages + 1,
                sent.contact,
                sent.group
            )
        })?;
        ctx.pages += 1;

        let added = ctx.absorb(&page.identifiers);
        ctx.cursors = page.next;
        debug!(
            page = ctx.pages,
            batch = page.identifiers.len(),
            added,
            contact_cursor = page.next.contact,
            group_cursor = page.next.group,
            "listing page"
        );

        if page.identifiers.is_empty() || page.next == sent {
            break;
        }

        if added == 0 {
            stalled += 1;
            if stalled >= limits.max_stalled_pages {
                bail!(
                    "identifier listing made no progress for {} consecutive pages (cursors {}/{})",
                    stalled,
                    ctx.cursors.contact,
                    ctx.cursors.group
                );
            }
        } else {
            stalled = 0;
        }
    }

    info!(
        pages = ctx.pages,
        identifiers = ctx.identifiers().len(),
        "identifier walk complete"
    );
    Ok(WalkStatus::Complete)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Cursors, IdentifierPage};
    use crate::models::RawRecord;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::Mutex;

    /// Serves scripted pages in order and records the cursors it was sent.
    /// Once the script runs out it repeats `tail`.
    struct ScriptedPages {
        pages: Mutex<Vec<Result<IdentifierPage, String>>>,
        tail: IdentifierPage,
        calls: Mutex<Vec<Cursors>>,
        cancel_after: Option<(usize, CancellationToken)>,
    }

    impl ScriptedPages {
        fn new(pages: Vec<Result<IdentifierPage, String>>, tail: IdentifierPage) -> Self {
            Self {
                pages: Mutex::new(pages.into_iter().rev().collect()),
                tail,
                calls: Mutex::new(Vec::new()),
                cancel_after: None,
            }
        }

        fn calls(&self) -> Vec<Cursors> {
            self.calls.lock().unwrap().clone()
        }
    }

    fn page(ids: &[&str], contact: i64, group: i64) -> IdentifierPage {
        IdentifierPage {
            identifiers: ids.iter().map(|s| s.to_string()).collect(),
            next: Cursors::new(contact, group),
        }
    }

    #[async_trait]
    impl DirectoryClient for ScriptedPages {
        async fn list_identifiers(&self, cursors: Cursors) -> Result<IdentifierPage> {
            let n = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(cursors);
                calls.len()
            };
            if let Some((after, token)) = &self.cancel_after {
                if n == *after {
                    token.cancel();
                }
            }
            match self.pages.lock().unwrap().pop() {
                Some(Ok(p)) => Ok(p),
                Some(Err(msg)) => Err(anyhow::anyhow!(msg)),
                None => Ok(self.tail.clone()),
            }
        }

        async fn resolve_detail(&self, _identifiers: &[String]) -> Result<Vec<RawRecord>> {
            Ok(Vec::new())
        }

        async fn list_group_members(&self, _group: &str) -> Result<Vec<Value>> {
            Ok(Vec::new())
        }

        async fn send_notification(&self, _target: &str, _text: &str) -> Result<()> {
            Ok(())
        }
    }

    async fn walk(client: &ScriptedPages, limits: WalkLimits) -> (Result<WalkStatus>, HarvestContext) {
        let mut ctx = HarvestContext::new();
        let status = walk_all_identifiers(client, &mut ctx, &limits, &CancellationToken::new()).await;
        (status, ctx)
    }

    #[tokio::test]
    async fn stops_after_empty_batch() {
        let client = ScriptedPages::new(
            vec![
                Ok(page(&["a", "b"], 2, 0)),
                Ok(page(&["c@chatroom"], 2, 1)),
                Ok(page(&["d"], 3, 1)),
            ],
            page(&[], 9, 9),
        );
        let (status, ctx) = walk(&client, WalkLimits::default()).await;
        assert_eq!(status.unwrap(), WalkStatus::Complete);
        // K = 3 productive pages, one terminating call.
        assert_eq!(client.calls().len(), 4);
        assert_eq!(ctx.pages, 4);
        assert_eq!(ctx.identifiers(), &["a", "b", "c@chatroom", "d"]);
        assert_eq!(
            client.calls(),
            vec![
                Cursors::new(0, 0),
                Cursors::new(2, 0),
                Cursors::new(2, 1),
                Cursors::new(3, 1),
            ]
        );
    }

    #[tokio::test]
    async fn stops_when_cursors_unchanged() {
        // Non-empty batch but no cursor movement still terminates, and the
        // batch is kept.
        let client = ScriptedPages::new(
            vec![Ok(page(&["a"], 5, 0)), Ok(page(&["b"], 5, 0))],
            page(&["never"], 6, 0),
        );
        let (status, ctx) = walk(&client, WalkLimits::default()).await;
        assert_eq!(status.unwrap(), WalkStatus::Complete);
        assert_eq!(client.calls().len(), 2);
        assert_eq!(ctx.identifiers(), &["a", "b"]);
        assert_eq!(ctx.cursors, Cursors::new(5, 0));
    }

    #[tokio::test]
    async fn empty_batch_with_advancing_cursors_terminates() {
        let client = ScriptedPages::new(vec![Ok(page(&[], 100, 100))], page(&["x"], 200, 200));
        let (status, ctx) = walk(&client, WalkLimits::default()).await;
        assert_eq!(status.unwrap(), WalkStatus::Complete);
        assert_eq!(client.calls().len(), 1);
        assert!(ctx.identifiers().is_empty());
    }

    #[tokio::test]
    async fn page_failure_aborts_walk() {
        let client = ScriptedPages::new(
            vec![Ok(page(&["a"], 1, 0)), Err("gateway timeout".to_string())],
            page(&[], 1, 0),
        );
        let (status, _) = walk(&client, WalkLimits::default()).await;
        let err = status.unwrap_err();
        assert!(format!("{:#}", err).contains("gateway timeout"));
        assert_eq!(client.calls().len(), 2);
    }

    #[tokio::test]
    async fn repeating_pages_hit_stall_limit() {
        // Cursors keep advancing but the same identifier comes back.
        let mut script = vec![Ok(page(&["a"], 1, 0))];
        for i in 2..50 {
            script.push(Ok(page(&["a"], i, 0)));
        }
        let client = ScriptedPages::new(script, page(&[], 0, 0));
        let limits = WalkLimits {
            max_pages: 1_000,
            max_stalled_pages: 3,
        };
        let (status, _) = walk(&client, limits).await;
        assert!(status.unwrap_err().to_string().contains("no progress"));
        // One productive page, then three stalled ones.
        assert_eq!(client.calls().len(), 4);
    }

    #[tokio::test]
    async fn page_ceiling_bounds_walk() {
        let script = (1..=20)
            .map(|i| Ok(page(&[format!("id{}", i).as_str()], i, 0)))
            .collect();
        let client = ScriptedPages::new(script, page(&[], 0, 0));
        let limits = WalkLimits {
            max_pages: 5,
            max_stalled_pages: 5,
        };
        let (status, ctx) = walk(&client, limits).await;
        assert!(status.unwrap_err().to_string().contains("did not converge"));
        assert_eq!(client.calls().len(), 5);
        assert_eq!(ctx.identifiers().len(), 5);
    }

    #[tokio::test]
    async fn cancellation_between_pages() {
        let token = CancellationToken::new();
        let script = (1..=10)
            .map(|i| Ok(page(&[format!("id{}", i).as_str()], i, 0)))
            .collect();
        let mut client = ScriptedPages::new(script, page(&[], 0, 0));
        client.cancel_after = Some((2, token.clone()));

        let mut ctx = HarvestContext::new();
        let status = walk_all_identifiers(&client, &mut ctx, &WalkLimits::default(), &token)
            .await
            .unwrap();
        assert_eq!(status, WalkStatus::Cancelled);
        assert_eq!(client.calls().len(), 2);
        assert_eq!(ctx.identifiers(), &["id1", "id2"]);
    }

    #[tokio::test]
    async fn fresh_walk_restarts_from_zero() {
        let client = ScriptedPages::new(vec![Ok(page(&["a"], 3, 3))], page(&[], 3, 3));
        let mut ctx = HarvestContext::new();
        ctx.cursors = Cursors::new(7, 7);
        ctx.absorb(&["stale".to_string()]);
        walk_all_identifiers(&client, &mut ctx, &WalkLimits::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(client.calls()[0], Cursors::new(0, 0));
        assert_eq!(ctx.identifiers(), &["a"]);
    }
}

//! Batches Like/Share engagement on local posts into periodic DM summaries (spec §4.8).

use crate::{
    config::{Data, FederationConfig},
    error::Error,
    fetch::object_id::ObjectId,
    protocol::objects::Person,
    store::{
        bridge_account::BridgeRole,
        engagement_event::{EngagementEvent, EngagementKind},
    },
    AppState,
};
use chrono::Utc;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::{info, warn};

/// Default cycle cadence (spec §4.8: "default 1000 ms after previous cycle end").
const CYCLE_DELAY: Duration = Duration::from_millis(1000);
/// An event is only considered once it is at least this old, so a short burst of near-
/// simultaneous engagement lands in the same DM rather than triggering one per event.
const BATCH_DELAY: chrono::Duration = chrono::Duration::seconds(30);
const MAX_UNNOTIFIED_PER_KIND: i64 = 200;
const PREVIEW_MAX_CHARS: usize = 60;
const MAX_NAMED_ACTORS: usize = 3;

/// Single-task timer loop (spec §5: "EngagementNotifier ... is a single-task timer").
pub struct EngagementNotifier {
    config: FederationConfig<AppState>,
    running: Arc<AtomicBool>,
}

/// One post's accumulated engagement for the current cycle.
#[derive(Default)]
struct PostGroup {
    likes: usize,
    shares: usize,
    actor_ids: Vec<String>,
    activity_ids: Vec<String>,
}

impl PostGroup {
    fn add(&mut self, kind: EngagementKind, event: EngagementEvent) {
        match kind {
            EngagementKind::Like => self.likes += 1,
            EngagementKind::Share => self.shares += 1,
        }
        if !self.actor_ids.contains(&event.ap_actor_id) {
            self.actor_ids.push(event.ap_actor_id);
        }
        self.activity_ids.push(event.activity_id);
    }
}

impl EngagementNotifier {
    pub fn new(config: FederationConfig<AppState>) -> Self {
        EngagementNotifier {
            config,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// A handle the shutdown sequence flips to stop scheduling further cycles (spec §5).
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    pub async fn run(self) {
        while self.running.load(Ordering::SeqCst) {
            if let Err(e) = self.run_cycle().await {
                warn!(error = %e, "engagement notifier cycle failed");
            }
            tokio::time::sleep(CYCLE_DELAY).await;
        }
    }

    async fn run_cycle(&self) -> Result<(), Error> {
        let older_than = Utc::now() - BATCH_DELAY;
        let likes = self
            .config
            .store
            .get_unnotified(EngagementKind::Like, older_than, MAX_UNNOTIFIED_PER_KIND)
            .await?;
        let shares = self
            .config
            .store
            .get_unnotified(EngagementKind::Share, older_than, MAX_UNNOTIFIED_PER_KIND)
            .await?;
        if likes.is_empty() && shares.is_empty() {
            return Ok(());
        }

        let mut post_groups: HashMap<(String, String), PostGroup> = HashMap::new();
        for event in likes {
            let key = (event.post_author_did.clone(), event.post_at_uri.clone());
            post_groups.entry(key).or_default().add(EngagementKind::Like, event);
        }
        for event in shares {
            let key = (event.post_author_did.clone(), event.post_at_uri.clone());
            post_groups.entry(key).or_default().add(EngagementKind::Share, event);
        }

        // Spec §4.8 step 3: "Group by postAuthorDid, then by postAtUri" — one DM per author,
        // folding every one of that author's engaged posts into its per-post section (testable
        // invariant #6: summaries are emitted "at most once per (author, batch window)").
        let mut by_author: HashMap<String, Vec<(String, PostGroup)>> = HashMap::new();
        for ((author_did, post_at_uri), group) in post_groups {
            by_author.entry(author_did).or_default().push((post_at_uri, group));
        }

        let Some(bridge) = self.config.store.get_bridge_account(BridgeRole::Bluesky).await? else {
            warn!("no bluesky bridge account provisioned, dropping this cycle's engagement notifications");
            return Ok(());
        };

        let data = self.config.to_request_data();
        let mut actor_name_cache: HashMap<String, String> = HashMap::new();

        for (author_did, posts) in by_author {
            let mut sections = Vec::with_capacity(posts.len());
            let mut activity_ids = Vec::new();
            for (post_at_uri, group) in &posts {
                let preview = self.post_preview(&author_did, post_at_uri).await.unwrap_or_default();

                let mut names = Vec::with_capacity(group.actor_ids.len());
                for actor_id in &group.actor_ids {
                    if let Some(cached) = actor_name_cache.get(actor_id) {
                        names.push(cached.clone());
                        continue;
                    }
                    let name = resolve_actor_display_name(actor_id, &data).await;
                    actor_name_cache.insert(actor_id.clone(), name.clone());
                    names.push(name);
                }

                sections.push(render_post_section(group.likes, group.shares, &names, &preview));
                activity_ids.extend(group.activity_ids.iter().cloned());
            }

            let message = render_message(&sections);
            let sent = self
                .config
                .bridge_bluesky
                .with_retry(|token| {
                    self.config
                        .chat
                        .send_message(&self.config.settings.app_view.url, &token, &bridge.did, &author_did, &message)
                })
                .await;
            match sent {
                Ok(()) => {
                    self.config.store.mark_notified(&activity_ids).await?;
                    info!(author = %author_did, posts = posts.len(), "sent engagement notification");
                }
                Err(e) => {
                    warn!(error = %e, "engagement DM failed, skipping remaining authors this cycle");
                    break;
                }
            }
        }
        Ok(())
    }

    async fn post_preview(&self, author_did: &str, at_uri: &str) -> Result<String, Error> {
        let (_, collection, rkey) = split_at_uri(at_uri)?;
        let record = self.config.pds.get_record(author_did, collection, rkey).await?;
        let text = record.value.get("text").and_then(|v| v.as_str()).unwrap_or_default();
        Ok(truncate_chars(text, PREVIEW_MAX_CHARS))
    }
}

fn split_at_uri(at_uri: &str) -> Result<(&str, &str, &str), Error> {
    let rest = at_uri.strip_prefix("at://").ok_or_else(|| Error::permanent("malformed atUri"))?;
    let mut parts = rest.splitn(3, '/');
    let repo = parts.next().ok_or_else(|| Error::permanent("malformed atUri"))?;
    let collection = parts.next().ok_or_else(|| Error::permanent("malformed atUri"))?;
    let rkey = parts.next().ok_or_else(|| Error::permanent("malformed atUri"))?;
    Ok((repo, collection, rkey))
}

/// Resolves an AP actor id to a display string via an actor dereference, falling back to a
/// URL-derived label when the dereference fails (spec §4.8 step 4).
async fn resolve_actor_display_name(actor_id: &str, data: &Data<AppState>) -> String {
    if let Ok(object_id) = ObjectId::<Person>::parse(actor_id) {
        if let Ok(person) = object_id.dereference(data).await {
            if let Some(host) = person.id.host_str() {
                return format!("@{}@{host}", person.preferred_username);
            }
        }
    }
    url_derived_fallback(actor_id)
}

fn url_derived_fallback(actor_id: &str) -> String {
    match url::Url::parse(actor_id) {
        Ok(url) => match url.host_str() {
            Some(host) => format!("{host}{}", url.path()),
            None => actor_id.to_string(),
        },
        Err(_) => actor_id.to_string(),
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{truncated}...")
}

/// Renders one post's contribution to an author's digest: its like/repost counts, up to
/// [`MAX_NAMED_ACTORS`] engaging actors, and its truncated preview (spec §4.8 step 4).
fn render_post_section(likes: usize, shares: usize, names: &[String], preview: &str) -> String {
    let mut parts = Vec::new();
    if likes > 0 {
        parts.push(format!("{likes} like{}", if likes == 1 { "" } else { "s" }));
    }
    if shares > 0 {
        parts.push(format!("{shares} repost{}", if shares == 1 { "" } else { "s" }));
    }
    let engagement_summary = parts.join(" and ");

    let named: Vec<&str> = names.iter().take(MAX_NAMED_ACTORS).map(String::as_str).collect();
    let who = if names.len() > MAX_NAMED_ACTORS {
        format!("{} and {} others", named.join(", "), names.len() - MAX_NAMED_ACTORS)
    } else {
        named.join(", ")
    };

    format!("{engagement_summary} from {who} on \"{preview}\"")
}

/// Folds every post section an author accumulated this cycle into the single DM sent to them
/// (spec §4.8 step 4/testable invariant #6: one summary per author per batch window).
fn render_message(sections: &[String]) -> String {
    format!("Your posts received Fediverse engagement:\n\n{}", sections.join("\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_chars_adds_ellipsis_past_limit() {
        let text = "a".repeat(100);
        let truncated = truncate_chars(&text, 60);
        assert_eq!(truncated.chars().count(), 63);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn truncate_chars_is_a_no_op_under_limit() {
        assert_eq!(truncate_chars("short", 60), "short");
    }

    #[test]
    fn render_post_section_mentions_both_counts() {
        let names = vec!["@a@example.com".to_string(), "@b@example.com".to_string()];
        let section = render_post_section(2, 1, &names, "hello world");
        assert!(section.contains("2 likes"));
        assert!(section.contains("1 repost"));
        assert!(section.contains("hello world"));
    }

    #[test]
    fn render_post_section_summarizes_overflow_actors() {
        let names: Vec<String> = (0..5).map(|i| format!("@user{i}@example.com")).collect();
        let section = render_post_section(5, 0, &names, "preview");
        assert!(section.contains("and 2 others"));
    }

    #[test]
    fn render_message_folds_multiple_post_sections_into_one_dm() {
        let sections = vec![
            render_post_section(2, 0, &["@a@example.com".to_string()], "first post"),
            render_post_section(0, 1, &["@b@example.com".to_string()], "second post"),
        ];
        let message = render_message(&sections);
        assert!(message.contains("first post"));
        assert!(message.contains("second post"));
        assert!(message.contains("2 likes"));
        assert!(message.contains("1 repost"));
    }

    #[test]
    fn url_derived_fallback_uses_host_and_path() {
        assert_eq!(
            url_derived_fallback("https://mastodon.social/users/alice"),
            "mastodon.social/users/alice"
        );
    }
}

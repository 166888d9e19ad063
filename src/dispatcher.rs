//! Signed HTTP POST delivery, followers fan-out, shared-inbox coalescing, and the durable retry
//! queue (spec §4.4).

use crate::{
    activity_sending::SendActivityTask, error::Error, protocol::activities::PersonAcceptedActivities,
    protocol::context::WithContext, store::Store, traits::ActivityHandler,
};
use reqwest_middleware::ClientWithMiddleware;
use std::{
    collections::HashMap,
    hash::{Hash, Hasher},
    time::Duration,
};
use tokio::sync::mpsc;
use tracing::{info, warn};
use url::Url;

/// A concrete delivery target: an actor id plus the inbox to reach it at.
#[derive(Debug, Clone)]
pub struct Recipient {
    pub actor_id: String,
    pub inbox: Url,
    pub shared_inbox: Option<Url>,
}

struct WorkItem {
    actor_id: Url,
    private_key: String,
    activity: PersonAcceptedActivities,
    inbox: Url,
    http_signature_compat: bool,
}

/// Worker pool of `N` (default 8), each fed by its own channel; anything that fails delivery is
/// written to the Postgres-backed [`crate::store::outbound_queue`] for retry (spec §4.4, §5).
///
/// Spec §5 "Ordering" requires that activities from one sender to one recipient are delivered in
/// dispatch order. A single channel drained by a pool of racing workers cannot guarantee that (two
/// items for the same inbox could land on different workers and complete out of order under
/// differing latencies), so each inbox is hashed to a fixed worker's own channel instead — a given
/// recipient always lands on the same single-consumer FIFO queue.
pub struct OutboundDispatcher {
    senders: Vec<mpsc::Sender<WorkItem>>,
}

impl OutboundDispatcher {
    pub fn spawn(store: Store, client: ClientWithMiddleware, worker_count: usize) -> Self {
        let worker_count = worker_count.max(1);
        let mut senders = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let (sender, mut receiver) = mpsc::channel::<WorkItem>(1024);
            let store = store.clone();
            let client = client.clone();
            tokio::spawn(async move {
                while let Some(item) = receiver.recv().await {
                    deliver_one(&store, &client, item, worker_id).await;
                }
            });
            senders.push(sender);
        }
        tokio::spawn(retry_loop(store, client));
        OutboundDispatcher { senders }
    }

    /// Picks the fixed worker bucket for a recipient inbox (spec §5: "hashing work items by
    /// recipient into the worker pool and using FIFO per bucket").
    fn bucket_for(&self, inbox: &Url) -> usize {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        inbox.as_str().hash(&mut hasher);
        (hasher.finish() as usize) % self.senders.len()
    }

    /// Enqueues a delivery to a single concrete recipient.
    pub async fn dispatch_targeted(
        &self,
        actor_id: Url,
        private_key: String,
        activity: PersonAcceptedActivities,
        recipients: Vec<Recipient>,
        http_signature_compat: bool,
    ) {
        for inbox in coalesce(recipients) {
            let bucket = self.bucket_for(&inbox);
            let _ = self.senders[bucket]
                .send(WorkItem {
                    actor_id: actor_id.clone(),
                    private_key: private_key.clone(),
                    activity: activity.clone(),
                    inbox,
                    http_signature_compat,
                })
                .await;
        }
    }

    /// Expands `sender_did`'s followers via the Store and dispatches to them, coalescing
    /// deliveries that share an origin's shared inbox (spec §4.4 mode 2).
    pub async fn dispatch_to_followers(
        &self,
        store: &Store,
        sender_did: &str,
        actor_id: Url,
        private_key: String,
        activity: PersonAcceptedActivities,
        http_signature_compat: bool,
    ) -> Result<(), Error> {
        let followers = store.get_all_followers(sender_did).await?;
        let recipients = followers
            .into_iter()
            .map(|f| Recipient {
                actor_id: f.actor_uri,
                inbox: f.actor_inbox.parse().unwrap_or_else(|_| actor_id.clone()),
                shared_inbox: f.actor_shared_inbox.and_then(|s| s.parse().ok()),
            })
            .collect();
        self.dispatch_targeted(actor_id, private_key, activity, recipients, http_signature_compat)
            .await;
        Ok(())
    }
}

/// Distinct actors on the same origin sharing an inbox collapse to one POST to that shared
/// inbox; targeting the same actor twice collapses to one POST (spec §4.4 mode 1).
fn coalesce(recipients: Vec<Recipient>) -> Vec<Url> {
    let mut by_shared_origin: HashMap<String, Url> = HashMap::new();
    let mut by_actor: HashMap<String, Url> = HashMap::new();
    for recipient in recipients {
        if let Some(shared) = recipient.shared_inbox {
            by_shared_origin
                .entry(shared.origin().ascii_serialization())
                .or_insert(shared);
        } else {
            by_actor.entry(recipient.actor_id).or_insert(recipient.inbox);
        }
    }
    by_shared_origin.into_values().chain(by_actor.into_values()).collect()
}

async fn deliver_one(store: &Store, client: &ClientWithMiddleware, item: WorkItem, worker_id: usize) {
    let task = SendActivityTask {
        actor_id: item.actor_id.clone(),
        activity_id: item.activity.id().clone(),
        activity: match serde_json::to_vec(&WithContext::new_default(item.activity.clone())) {
            Ok(bytes) => bytes.into(),
            Err(e) => {
                warn!(%e, "failed to serialize activity for delivery");
                return;
            }
        },
        inbox: item.inbox.clone(),
        private_key: item.private_key.clone(),
        http_signature_compat: item.http_signature_compat,
    };
    match task.sign_and_send(client).await {
        Ok(()) => info!(worker_id, inbox = %item.inbox, "delivered activity"),
        Err(e) => {
            warn!(worker_id, inbox = %item.inbox, error = %e, "delivery failed, queuing for retry");
            let body = String::from_utf8_lossy(&task.activity).to_string();
            let _ = store
                .enqueue_delivery(
                    &task.activity_id.to_string(),
                    item.inbox.as_str(),
                    item.actor_id.as_str(),
                    &item.private_key,
                    &body,
                )
                .await;
        }
    }
}

/// Polls the durable queue for due retries, matching the backoff schedule in
/// [`crate::store::outbound_queue::RETRY_SCHEDULE_SECONDS`].
async fn retry_loop(store: Store, client: ClientWithMiddleware) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        let due = match store.due_deliveries(50).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(%e, "failed to poll outbound queue");
                continue;
            }
        };
        for row in due {
            let actor_id: Url = match row.actor_id.parse() {
                Ok(u) => u,
                Err(_) => continue,
            };
            let inbox: Url = match row.inbox.parse() {
                Ok(u) => u,
                Err(_) => continue,
            };
            let activity_id: Url = match row.activity_id.parse() {
                Ok(u) => u,
                Err(_) => continue,
            };
            let task = SendActivityTask {
                actor_id,
                activity_id,
                activity: row.body.clone().into_bytes().into(),
                inbox,
                private_key: row.private_key.clone(),
                http_signature_compat: false,
            };
            match task.sign_and_send(&client).await {
                Ok(()) => {
                    let _ = store.drop_delivery(row.id).await;
                }
                Err(e) => {
                    warn!(error = %e, inbox = %row.inbox, "retry failed");
                    let _ = store.reschedule_or_drop(row.id, row.attempt_count).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipient(actor: &str, inbox: &str, shared: Option<&str>) -> Recipient {
        Recipient {
            actor_id: actor.to_string(),
            inbox: inbox.parse().unwrap(),
            shared_inbox: shared.map(|s| s.parse().unwrap()),
        }
    }

    #[test]
    fn coalesce_collapses_recipients_sharing_an_inbox_origin() {
        let recipients = vec![
            recipient("https://a.example/users/1", "https://a.example/users/1/inbox", Some("https://a.example/inbox")),
            recipient("https://a.example/users/2", "https://a.example/users/2/inbox", Some("https://a.example/inbox")),
        ];
        let urls = coalesce(recipients);
        assert_eq!(urls.len(), 1);
        assert_eq!(urls[0].as_str(), "https://a.example/inbox");
    }

    #[test]
    fn coalesce_keeps_distinct_origins_and_actors_without_a_shared_inbox() {
        let recipients = vec![
            recipient("https://a.example/users/1", "https://a.example/users/1/inbox", Some("https://a.example/inbox")),
            recipient("https://b.example/users/1", "https://b.example/users/1/inbox", None),
        ];
        let urls = coalesce(recipients);
        assert_eq!(urls.len(), 2);
    }

    #[test]
    fn coalesce_deduplicates_repeated_actor_without_shared_inbox() {
        let recipients = vec![
            recipient("https://a.example/users/1", "https://a.example/users/1/inbox", None),
            recipient("https://a.example/users/1", "https://a.example/users/1/inbox", None),
        ];
        assert_eq!(coalesce(recipients).len(), 1);
    }

    #[tokio::test]
    async fn bucket_for_is_stable_for_the_same_inbox() {
        let client = reqwest_middleware::ClientBuilder::new(reqwest::Client::new()).build();
        let store = crate::store::Store::connect_lazy_for_test();
        let dispatcher = OutboundDispatcher::spawn(store, client, 8);
        let inbox: Url = "https://a.example/users/1/inbox".parse().unwrap();
        let first = dispatcher.bucket_for(&inbox);
        let second = dispatcher.bucket_for(&inbox);
        assert_eq!(first, second);
    }
}

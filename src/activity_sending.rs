//! Outbound delivery of a single signed activity to a single inbox, grounded on the teacher's
//! `activity_sending.rs`. The batching/retry/worker-pool policy around this primitive lives in
//! [`crate::dispatcher`]; this module only knows how to sign and POST one activity once.

use crate::{config::Data, error::Error, http_signatures::sign_request, traits::ActivityHandler};
use bytes::Bytes;
use reqwest_middleware::ClientWithMiddleware;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// AP deliveries get a tighter timeout than the PDS/blob-download calls the shared client is
/// otherwise configured for (spec §5: "per-HTTP-call 15 s for AP deliveries, 30 s for PDS calls").
const AP_DELIVERY_TIMEOUT: Duration = Duration::from_secs(15);

/// A single prepared delivery: one activity, one inbox, one signing key.
pub struct SendActivityTask {
    pub actor_id: Url,
    pub activity_id: Url,
    pub activity: Bytes,
    pub inbox: Url,
    pub private_key: String,
    pub http_signature_compat: bool,
}

impl SendActivityTask {
    /// Builds one [`SendActivityTask`] per distinct inbox, skipping the actor's own inbox
    /// (avoids self-delivery loops) and any inbox that fails local/remote URL verification.
    pub async fn prepare<Activity, T: Clone + Send + Sync>(
        activity: &Activity,
        actor_id: &Url,
        private_key: String,
        inboxes: Vec<Url>,
        data: &Data<T>,
        http_signature_compat: bool,
    ) -> Result<Vec<Self>, Error>
    where
        Activity: ActivityHandler + serde::Serialize,
    {
        let activity_bytes: Bytes = serde_json::to_vec(activity)
            .map_err(Error::from)?
            .into();
        let mut inboxes = inboxes;
        inboxes.sort();
        inboxes.dedup();
        inboxes.retain(|inbox| inbox.as_str() != actor_id.as_str());
        let _ = data;

        let mut tasks = Vec::with_capacity(inboxes.len());
        for inbox in inboxes {
            tasks.push(SendActivityTask {
                actor_id: actor_id.clone(),
                activity_id: activity.id().clone(),
                activity: activity_bytes.clone(),
                inbox,
                private_key: private_key.clone(),
                http_signature_compat,
            });
        }
        Ok(tasks)
    }

    /// Signs and sends this task, returning `Ok` for 2xx and 4xx responses (the latter are
    /// logged but not retried — the receiving server told us, definitively, that it won't
    /// accept this activity) and `Err` for anything else (network failure, 5xx, timeout),
    /// which the caller should schedule for retry.
    pub async fn sign_and_send(&self, client: &ClientWithMiddleware) -> Result<(), Error> {
        let body = String::from_utf8_lossy(&self.activity).to_string();
        let request_builder = client
            .post(self.inbox.as_str())
            .header("content-type", "application/activity+json")
            .timeout(AP_DELIVERY_TIMEOUT);
        let request = sign_request(
            request_builder,
            &self.actor_id,
            body,
            self.private_key.clone(),
            self.http_signature_compat,
        )
        .await?;

        debug!(inbox = %self.inbox, activity = %self.activity_id, "delivering activity");
        let response = client.execute(request).await.map_err(Error::from)?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            warn!(inbox = %self.inbox, %status, %body, "inbox rejected activity, not retrying");
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(Error::transient(format!(
                "delivery to {} failed with {status}: {body}",
                self.inbox
            )))
        }
    }
}

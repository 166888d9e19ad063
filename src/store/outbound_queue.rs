//! `outbound_queue` and `used_nonces` tables: the logically-separate KV store mentioned in
//! spec §6, kept in the same Postgres instance for operational simplicity (SPEC_FULL §4.1).

use super::Store;
use crate::error::Error;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// The fixed backoff schedule from spec §4.4: 1m, 5m, 30m, 2h, 8h, then drop.
pub const RETRY_SCHEDULE_SECONDS: [i64; 5] = [60, 5 * 60, 30 * 60, 2 * 60 * 60, 8 * 60 * 60];

#[derive(Debug, Clone, FromRow)]
pub struct QueuedDelivery {
    pub id: Uuid,
    pub activity_id: String,
    pub inbox: String,
    pub actor_id: String,
    pub private_key: String,
    pub body: String,
    pub attempt_count: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Store {
    /// Enqueues a delivery that failed and must be retried later. The first retry uses
    /// `RETRY_SCHEDULE_SECONDS[0]`, so `attempt_count` starts at 1 to mark that slot consumed;
    /// `reschedule_or_drop` then looks up subsequent failures by that same counter.
    pub async fn enqueue_delivery(
        &self,
        activity_id: &str,
        inbox: &str,
        actor_id: &str,
        private_key: &str,
        body: &str,
    ) -> Result<(), Error> {
        sqlx::query(
            "INSERT INTO outbound_queue (id, activity_id, inbox, actor_id, private_key, body, attempt_count, next_attempt_at, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, 1, now() + make_interval(secs => $7), now())",
        )
        .bind(Uuid::new_v4())
        .bind(activity_id)
        .bind(inbox)
        .bind(actor_id)
        .bind(private_key)
        .bind(body)
        .bind(RETRY_SCHEDULE_SECONDS[0] as f64)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Rows whose `next_attempt_at` has passed, ready to be retried.
    pub async fn due_deliveries(&self, limit: i64) -> Result<Vec<QueuedDelivery>, Error> {
        let rows = sqlx::query_as::<_, QueuedDelivery>(
            "SELECT id, activity_id, inbox, actor_id, private_key, body, attempt_count, next_attempt_at, created_at
             FROM outbound_queue
             WHERE next_attempt_at <= now()
             ORDER BY next_attempt_at ASC
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// Reschedules a failed retry per [`RETRY_SCHEDULE_SECONDS`], or drops the row once the
    /// schedule is exhausted.
    pub async fn reschedule_or_drop(&self, id: Uuid, attempt_count: i32) -> Result<(), Error> {
        match RETRY_SCHEDULE_SECONDS.get(attempt_count as usize) {
            Some(delay) => {
                sqlx::query(
                    "UPDATE outbound_queue
                     SET attempt_count = attempt_count + 1,
                         next_attempt_at = now() + make_interval(secs => $2)
                     WHERE id = $1",
                )
                .bind(id)
                .bind(*delay as f64)
                .execute(self.pool())
                .await?;
            }
            None => {
                self.drop_delivery(id).await?;
            }
        }
        Ok(())
    }

    pub async fn drop_delivery(&self, id: Uuid) -> Result<(), Error> {
        sqlx::query("DELETE FROM outbound_queue WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Records a `Signature` nonce so a captured request cannot be replayed; returns `true` if
    /// the nonce was new. Called from `web/mod.rs::handle_inbox` with
    /// `http_signatures::signature_nonce`'s extracted value.
    pub async fn record_nonce_if_new(&self, nonce: &str) -> Result<bool, Error> {
        let result = sqlx::query(
            "INSERT INTO used_nonces (nonce, seen_at) VALUES ($1, now())
             ON CONFLICT (nonce) DO NOTHING",
        )
        .bind(nonce)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Housekeeping: nonces older than the signature expiry window no longer need to be kept.
    pub async fn prune_old_nonces(&self, older_than_seconds: i64) -> Result<(), Error> {
        sqlx::query("DELETE FROM used_nonces WHERE seen_at < now() - make_interval(secs => $1)")
            .bind(older_than_seconds as f64)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A freshly enqueued row is seeded with `attempt_count = 1` because its `next_attempt_at`
    /// already consumed `RETRY_SCHEDULE_SECONDS[0]`; five total retries (1,5,30,120,480 min)
    /// means the schedule is exhausted once `attempt_count` reaches the array's length.
    #[test]
    fn retry_schedule_has_five_entries_matching_the_initial_attempt_count() {
        assert_eq!(RETRY_SCHEDULE_SECONDS.len(), 5);
        assert_eq!(RETRY_SCHEDULE_SECONDS, [60, 300, 1800, 7200, 28800]);
        // After the row enqueued at attempt_count=1 fails four more times (2,3,4,5), the next
        // lookup at attempt_count=5 is out of range and the row is dropped rather than retried.
        assert!(RETRY_SCHEDULE_SECONDS.get(5_usize).is_none());
        assert!(RETRY_SCHEDULE_SECONDS.get(4_usize).is_some());
    }
}

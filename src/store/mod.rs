//! Durable relational state (spec §3, §4.1). One submodule per entity; all access goes through
//! [`Store`], which owns the connection pool and a small in-process cache of actor rows actively
//! being dereferenced.

pub mod bridge_account;
pub mod engagement_event;
pub mod external_reply;
pub mod follow;
pub mod keypair;
pub mod monitored_post;
pub mod outbound_queue;
pub mod post_mapping;

use crate::error::Error;
use moka::future::Cache;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

/// A page of keyset-paginated rows, matching spec §4.1's "return `limit+1` rows to compute
/// `nextCursor`" contract.
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<chrono::DateTime<chrono::Utc>>,
}

fn split_page<T>(mut rows: Vec<T>, limit: i64, created_at: impl Fn(&T) -> chrono::DateTime<chrono::Utc>) -> Page<T> {
    let next_cursor = if rows.len() as i64 > limit {
        rows.pop();
        rows.last().map(&created_at)
    } else {
        None
    };
    Page {
        items: rows,
        next_cursor,
    }
}

/// Durable relational state. Cheap to clone (wraps a connection pool).
#[derive(Clone)]
pub struct Store {
    pool: PgPool,
    /// Actor id → PEM public key, short-lived so a burst of inbound activities from the same
    /// remote actor doesn't redo the HTTP actor dereference and signature-key parse for every
    /// request (spec §5: HTTP Signature verification is on the hot path of every inbox POST).
    actor_key_cache: Cache<String, String>,
}

impl Store {
    /// Connects to `database_url`, sizing the pool to `max_connections`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .map_err(|e| Error::Fatal(format!("failed to connect to database: {e}")))?;
        Ok(Store {
            pool,
            actor_key_cache: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(Duration::from_secs(300))
                .build(),
        })
    }

    /// Runs embedded migrations. Failure here is [`Error::Fatal`] and aborts startup (§4.1).
    pub async fn migrate(&self) -> Result<(), Error> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Fatal(format!("migration failed: {e}")))
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Closes the connection pool as the final step of the shutdown sequence (spec §5).
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// A pool that defers connecting until first use, for tests that exercise pure
    /// dispatch/caching logic and never actually issue a query against it.
    #[cfg(test)]
    pub(crate) fn connect_lazy_for_test() -> Self {
        let pool = PgPoolOptions::new().connect_lazy("postgres://localhost/test").expect(
            "connect_lazy never touches the network, only parses the connection string",
        );
        Store {
            pool,
            actor_key_cache: Cache::builder().max_capacity(10).build(),
        }
    }

    /// Remembers `actor_id`'s PEM public key for a short time. Purely a cache: a miss always
    /// falls back to a fresh HTTP dereference, and the Store never treats a hit as authoritative
    /// over the remote actor document itself.
    pub(crate) async fn cache_actor_public_key(&self, actor_id: &str, public_key_pem: String) {
        self.actor_key_cache.insert(actor_id.to_string(), public_key_pem).await;
    }

    pub(crate) async fn cached_actor_public_key(&self, actor_id: &str) -> Option<String> {
        self.actor_key_cache.get(actor_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn at(secs: i64) -> chrono::DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn split_page_has_no_next_cursor_when_rows_fit_in_the_limit() {
        let rows = vec![at(3), at(2), at(1)];
        let page = split_page(rows, 3, |t| *t);
        assert_eq!(page.items.len(), 3);
        assert_eq!(page.next_cursor, None);
    }

    #[test]
    fn split_page_pops_the_extra_row_and_cursors_on_the_last_kept_row() {
        let rows = vec![at(4), at(3), at(2), at(1)];
        let page = split_page(rows, 3, |t| *t);
        assert_eq!(page.items, vec![at(4), at(3), at(2)]);
        assert_eq!(page.next_cursor, Some(at(2)));
    }
}

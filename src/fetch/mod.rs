//! Remote object/actor fetching, grounded on the teacher's `fetch` module.

pub mod collection_id;
pub mod object_id;
pub mod webfinger;

use crate::{config::Data, error::Error};
use serde::de::DeserializeOwned;
use std::sync::atomic::Ordering;
use url::Url;

/// Performs a `GET` of `url`, deserializing the response body as `Kind`.
///
/// Enforces the `http_fetch_limit` configured on [`crate::config::FederationConfig`]: each call
/// increments `data`'s request counter, and once the limit is exceeded every further fetch using
/// the same `data` fails with [`Error::RequestLimit`]. This bounds the amount of recursive
/// dereferencing a single incoming activity can trigger (spec §4.2).
pub async fn fetch_object_http<Kind: DeserializeOwned, T: Clone + Send + Sync>(
    url: &Url,
    data: &Data<T>,
) -> Result<Kind, Error> {
    let count = data.request_counter.fetch_add(1, Ordering::SeqCst) + 1;
    if count > data.config.http_fetch_limit {
        return Err(Error::RequestLimit);
    }
    data.config.verify_url_valid(url).await?;

    let response = data
        .config
        .client
        .get(url.as_str())
        .header("accept", "application/activity+json")
        .send()
        .await
        .map_err(Error::from)?;
    if response.status() == reqwest::StatusCode::GONE {
        return Err(Error::ObjectDeleted);
    }
    if response.status() == reqwest::StatusCode::NOT_FOUND {
        return Err(Error::NotFound);
    }
    let response = response.error_for_status().map_err(Error::from)?;
    response.json().await.map_err(Error::from)
}

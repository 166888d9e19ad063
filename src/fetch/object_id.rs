//! Typed wrapper around a remote object's canonical URL, grounded on the teacher's
//! `fetch::object_id::ObjectId`.

use crate::{config::Data, error::Error, fetch::fetch_object_http, traits::Object};
use chrono::{Duration as ChronoDuration, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::marker::PhantomData;
use url::Url;

/// How long a remote actor's cached row is trusted before it is refetched on next use.
const ACTOR_REFETCH_INTERVAL_SECONDS: i64 = 60 * 60 * 24;

/// A strongly-typed object id: `Kind` pins down which local type this URL dereferences into.
#[derive(Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId<Kind> {
    url: Url,
    #[serde(skip)]
    _phantom: PhantomData<Kind>,
}

impl<Kind> Clone for ObjectId<Kind> {
    fn clone(&self) -> Self {
        ObjectId {
            url: self.url.clone(),
            _phantom: PhantomData,
        }
    }
}

impl<Kind> std::fmt::Debug for ObjectId<Kind> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ObjectId({})", self.url)
    }
}

impl<Kind> PartialEq for ObjectId<Kind> {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
    }
}

impl<Kind> ObjectId<Kind> {
    pub fn parse(url: &str) -> Result<Self, url::ParseError> {
        Ok(ObjectId {
            url: Url::parse(url)?,
            _phantom: PhantomData,
        })
    }

    pub fn from(url: Url) -> Self {
        ObjectId {
            url,
            _phantom: PhantomData,
        }
    }

    pub fn inner(&self) -> &Url {
        &self.url
    }

    pub fn into_inner(self) -> Url {
        self.url
    }
}

impl<Kind> ObjectId<Kind>
where
    Kind: Object + Send + 'static,
    Kind::Kind: DeserializeOwned,
    Kind::Error: From<Error>,
{
    /// Returns the local row for this id if one exists and is still fresh, otherwise fetches,
    /// verifies and persists the remote representation.
    pub async fn dereference(
        &self,
        data: &Data<Kind::DataType>,
    ) -> Result<Kind, Kind::Error> {
        if let Some(object) = self.dereference_local(data).await? {
            if !should_refetch_object(object.last_refreshed_at()) {
                return Ok(object);
            }
        }
        self.dereference_from_http(data).await
    }

    /// Storage-only lookup, never performs a network fetch.
    pub async fn dereference_local(
        &self,
        data: &Data<Kind::DataType>,
    ) -> Result<Option<Kind>, Kind::Error> {
        Kind::read_from_id(self.url.clone(), data).await
    }

    /// Forces a network (re)fetch, verifies, and persists the result.
    pub async fn dereference_from_http(
        &self,
        data: &Data<Kind::DataType>,
    ) -> Result<Kind, Kind::Error> {
        let json: Kind::Kind = fetch_object_http(&self.url, data).await?;
        Kind::verify(&json, &self.url, data).await?;
        Kind::from_json(json, data).await
    }
}

/// True when a cached remote row is stale enough to warrant a refetch.
pub fn should_refetch_object(last_refreshed_at: Option<chrono::DateTime<Utc>>) -> bool {
    match last_refreshed_at {
        None => true,
        Some(last) => Utc::now() - last > ChronoDuration::seconds(ACTOR_REFETCH_INTERVAL_SECONDS),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_refetch_object_when_never_fetched() {
        assert!(should_refetch_object(None));
    }

    #[test]
    fn should_refetch_object_when_stale() {
        let last = Utc::now() - ChronoDuration::seconds(ACTOR_REFETCH_INTERVAL_SECONDS + 60);
        assert!(should_refetch_object(Some(last)));
    }

    #[test]
    fn should_not_refetch_object_when_fresh() {
        let last = Utc::now() - ChronoDuration::seconds(60);
        assert!(!should_refetch_object(Some(last)));
    }

    #[test]
    fn object_id_parse_and_inner_round_trip() {
        struct Marker;
        let id: ObjectId<Marker> = ObjectId::parse("https://example.com/users/alice").unwrap();
        assert_eq!(id.inner().as_str(), "https://example.com/users/alice");
        assert_eq!(id.into_inner().as_str(), "https://example.com/users/alice");
    }
}

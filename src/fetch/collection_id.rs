//! Typed wrapper around a remote paginated collection's URL (`followers`, `following`, `outbox`).

use crate::{config::Data, error::Error, fetch::fetch_object_http};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::marker::PhantomData;
use url::Url;

#[derive(Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionId<Kind> {
    url: Url,
    #[serde(skip)]
    _phantom: PhantomData<Kind>,
}

impl<Kind> Clone for CollectionId<Kind> {
    fn clone(&self) -> Self {
        CollectionId {
            url: self.url.clone(),
            _phantom: PhantomData,
        }
    }
}

impl<Kind> CollectionId<Kind> {
    pub fn parse(url: &str) -> Result<Self, url::ParseError> {
        Ok(CollectionId {
            url: Url::parse(url)?,
            _phantom: PhantomData,
        })
    }

    pub fn inner(&self) -> &Url {
        &self.url
    }
}

impl<Kind: DeserializeOwned> CollectionId<Kind> {
    /// Fetches and deserializes the collection (or its first page) over HTTP.
    pub async fn dereference<T: Clone + Send + Sync>(
        &self,
        data: &Data<T>,
    ) -> Result<Kind, Error> {
        fetch_object_http(&self.url, data).await
    }
}

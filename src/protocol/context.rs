//! `@context` wrapper, grounded on the teacher's `protocol::context::WithContext`.

use crate::{config::Data, traits::ActivityHandler};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

/// The JSON-LD contexts every outgoing activity is wrapped in.
pub fn default_context() -> Vec<serde_json::Value> {
    vec![
        serde_json::Value::String("https://www.w3.org/ns/activitystreams".to_string()),
        serde_json::Value::String("https://w3id.org/security/v1".to_string()),
    ]
}

/// Wraps any activity `Kind` with an `@context` field on serialization, and unwraps transparently
/// when delegating to the inner activity's [`ActivityHandler`] implementation.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WithContext<Kind> {
    #[serde(rename = "@context")]
    context: serde_json::Value,
    #[serde(flatten)]
    inner: Kind,
}

impl<Kind> WithContext<Kind> {
    pub fn new(inner: Kind, context: serde_json::Value) -> Self {
        WithContext { context, inner }
    }

    pub fn new_default(inner: Kind) -> Self {
        WithContext {
            context: serde_json::Value::Array(default_context()),
            inner,
        }
    }

    pub fn inner(&self) -> &Kind {
        &self.inner
    }

    pub fn into_inner(self) -> Kind {
        self.inner
    }
}

#[async_trait]
impl<Kind> ActivityHandler for WithContext<Kind>
where
    Kind: ActivityHandler + Send + Sync,
{
    type DataType = Kind::DataType;
    type Error = Kind::Error;

    fn id(&self) -> &Url {
        self.inner.id()
    }

    fn actor(&self) -> &Url {
        self.inner.actor()
    }

    async fn verify(&self, data: &Data<Self::DataType>) -> Result<(), Self::Error> {
        self.inner.verify(data).await
    }

    async fn receive(self, data: &Data<Self::DataType>) -> Result<(), Self::Error> {
        self.inner.receive(data).await
    }
}

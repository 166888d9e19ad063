//! Core traits bridging local storage and the ActivityPub wire format, mirroring the teacher
//! crate's `Object`/`ActivityHandler`/`Actor` split.

use crate::{config::Data, error::Error};
use async_trait::async_trait;
use url::Url;

/// A local or remote object that can be read from storage, converted to/from its `Kind` JSON
/// representation, and periodically refreshed when fetched from a remote instance.
#[async_trait]
pub trait Object: Sized {
    /// Rust struct backing this object's persisted form (e.g. a `PostMapping` row).
    type DataType: Clone + Send + Sync;
    /// Wire representation, typically an ActivityStreams JSON struct.
    type Kind: Send + 'static;
    /// Error returned by the trait's fallible methods.
    type Error: From<Error> + Send;

    /// Timestamp this object was last (re)fetched at, if it is remote. Local objects (and remote
    /// objects never refreshed) return `None`.
    fn last_refreshed_at(&self) -> Option<chrono::DateTime<chrono::Utc>>;

    /// Try to read the object with the given `id` from local storage only.
    async fn read_from_id(
        id: Url,
        data: &Data<Self::DataType>,
    ) -> Result<Option<Self>, Self::Error>;

    /// Convert this object into its outgoing JSON representation.
    async fn into_json(self, data: &Data<Self::DataType>) -> Result<Self::Kind, Self::Error>;

    /// Verify a freshly-fetched/received JSON payload before it is persisted (domain checks,
    /// required-field checks; not signature verification, which happens earlier in the inbox
    /// pipeline).
    async fn verify(
        json: &Self::Kind,
        expected_domain: &Url,
        data: &Data<Self::DataType>,
    ) -> Result<(), Self::Error>;

    /// Convert a verified JSON payload into `Self` and persist it, returning the stored value.
    async fn from_json(
        json: Self::Kind,
        data: &Data<Self::DataType>,
    ) -> Result<Self, Self::Error>;

    /// Mark the object deleted/tombstoned, called on receipt of a `Delete` activity.
    async fn delete(self, _data: &Data<Self::DataType>) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// An incoming or outgoing ActivityPub activity.
#[async_trait]
pub trait ActivityHandler: Send + serde::de::DeserializeOwned + serde::Serialize {
    type DataType: Clone + Send + Sync;
    type Error: From<Error> + Send;

    /// The activity's own id, used for deduplication and as the `Location` of the response.
    fn id(&self) -> &Url;

    /// The actor that authored/is delivering this activity.
    fn actor(&self) -> &Url;

    /// Domain/structure checks performed after signature verification and actor dereferencing,
    /// before `receive` mutates any state.
    async fn verify(&self, data: &Data<Self::DataType>) -> Result<(), Self::Error>;

    /// Apply the activity's effect (state transition, side-effecting dispatch, etc).
    async fn receive(self, data: &Data<Self::DataType>) -> Result<(), Self::Error>;
}

/// An actor capable of receiving activities, i.e. something with an inbox.
pub trait Actor: Object + Send + 'static {
    /// PEM-encoded RSA public key used to verify this actor's HTTP Signatures.
    fn public_key_pem(&self) -> &str;

    /// This actor's personal inbox.
    fn inbox(&self) -> Url;

    /// This actor's shared inbox, if it advertises one.
    fn shared_inbox(&self) -> Option<Url> {
        None
    }

    /// Shared inbox if present, falling back to the personal inbox otherwise — the address
    /// dispatch should prefer when coalescing deliveries to followers on the same instance.
    fn shared_inbox_or_inbox(&self) -> Url {
        self.shared_inbox().unwrap_or_else(|| self.inbox())
    }
}

/// A paginated ActivityStreams collection (`followers`, `following`, `outbox`).
#[async_trait]
pub trait Collection: Sized {
    type DataType: Clone + Send + Sync;
    type Kind: Send + 'static;
    type Error: From<Error> + Send;

    /// Fetch the collection's first page / summary object.
    async fn read(owner: Url, data: &Data<Self::DataType>) -> Result<Self::Kind, Self::Error>;
}

//! Paginated `OrderedCollectionPage` responses served for `/followers`, `/following`, `/outbox`.

use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct OrderedCollectionPage {
    pub id: Url,
    #[serde(rename = "type")]
    pub kind: String,
    pub part_of: Url,
    pub ordered_items: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<Url>,
}

impl OrderedCollectionPage {
    pub fn new(
        id: Url,
        part_of: Url,
        ordered_items: Vec<serde_json::Value>,
        next: Option<Url>,
    ) -> Self {
        OrderedCollectionPage {
            id,
            kind: "OrderedCollectionPage".to_string(),
            part_of,
            ordered_items,
            next,
        }
    }
}

/// Builds the `next` page link for a keyset-paginated collection, matching the
/// `createdAt`-cursor scheme used by the Store (spec §4.1).
pub fn next_page_link(base: &Url, cursor: Option<chrono::DateTime<chrono::Utc>>) -> Option<Url> {
    let cursor = cursor?;
    let mut next = base.clone();
    next.query_pairs_mut()
        .append_pair("cursor", &cursor.to_rfc3339());
    Some(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_page_link_none_without_cursor() {
        let base: Url = "https://bridge.example/users/did:plc:alice/followers".parse().unwrap();
        assert_eq!(next_page_link(&base, None), None);
    }

    #[test]
    fn next_page_link_appends_rfc3339_cursor() {
        let base: Url = "https://bridge.example/users/did:plc:alice/followers".parse().unwrap();
        let cursor = chrono::DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        let next = next_page_link(&base, Some(cursor)).unwrap();
        assert_eq!(
            next.as_str(),
            "https://bridge.example/users/did:plc:alice/followers?cursor=2026-01-01T00%3A00%3A00%2B00%3A00"
        );
    }
}

//! Serde helpers for ActivityStreams's various "one-or-many" and lenient-array fields.

use serde::{Deserialize, Deserializer};

/// Deserializes a field that may be a bare value or an array, always returning a `Vec`.
pub fn deserialize_one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany<T> {
        One(T),
        Many(Vec<T>),
    }
    match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(val) => Ok(vec![val]),
        OneOrMany::Many(vals) => Ok(vals),
    }
}

/// Deserializes a field that may be a bare value or a single-element array, returning the value.
pub fn deserialize_one<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany<T> {
        One(T),
        Many(Vec<T>),
    }
    match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(val) => Ok(val),
        OneOrMany::Many(mut vals) if !vals.is_empty() => Ok(vals.remove(0)),
        OneOrMany::Many(_) => Err(serde::de::Error::custom("expected at least one element")),
    }
}

/// Deserializes a sequence of items that may individually fail to parse, silently dropping the
/// ones that don't, instead of failing the whole field (used for third-party extension objects
/// we neither need nor control, e.g. unrecognized items in a `tag` array).
pub fn deserialize_skip_error<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    let values = Vec::<serde_json::Value>::deserialize(deserializer)?;
    Ok(values
        .into_iter()
        .filter_map(|v| serde_json::from_value(v).ok())
        .collect())
}

/// Deserializes a one-or-many field, keeping only the last element (some implementations emit a
/// single-element array where the spec expects a bare value, or vice versa).
pub fn deserialize_last<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    let mut vals = deserialize_one_or_many(deserializer)?;
    Ok(vals.pop())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct OneOrManyField {
        #[serde(deserialize_with = "deserialize_one_or_many")]
        to: Vec<String>,
    }

    #[test]
    fn one_or_many_accepts_a_bare_value() {
        let parsed: OneOrManyField = serde_json::from_str(r#"{"to": "alice"}"#).unwrap();
        assert_eq!(parsed.to, vec!["alice"]);
    }

    #[test]
    fn one_or_many_accepts_an_array() {
        let parsed: OneOrManyField = serde_json::from_str(r#"{"to": ["alice", "bob"]}"#).unwrap();
        assert_eq!(parsed.to, vec!["alice", "bob"]);
    }

    #[derive(Deserialize)]
    struct OneField {
        #[serde(deserialize_with = "deserialize_one")]
        object: String,
    }

    #[test]
    fn one_accepts_a_bare_value() {
        let parsed: OneField = serde_json::from_str(r#"{"object": "note-1"}"#).unwrap();
        assert_eq!(parsed.object, "note-1");
    }

    #[test]
    fn one_takes_the_first_element_of_an_array() {
        let parsed: OneField = serde_json::from_str(r#"{"object": ["note-1", "note-2"]}"#).unwrap();
        assert_eq!(parsed.object, "note-1");
    }

    #[test]
    fn one_rejects_an_empty_array() {
        let parsed = serde_json::from_str::<OneField>(r#"{"object": []}"#);
        assert!(parsed.is_err());
    }

    #[derive(Deserialize, Default)]
    struct SkipErrorField {
        #[serde(deserialize_with = "deserialize_skip_error", default)]
        tag: Vec<u32>,
    }

    #[test]
    fn skip_error_drops_entries_that_do_not_parse() {
        let parsed: SkipErrorField = serde_json::from_str(r#"{"tag": [1, "oops", 3]}"#).unwrap();
        assert_eq!(parsed.tag, vec![1, 3]);
    }

    #[derive(Deserialize)]
    struct LastField {
        #[serde(deserialize_with = "deserialize_last")]
        language: Option<String>,
    }

    #[test]
    fn last_keeps_the_final_element_of_an_array() {
        let parsed: LastField = serde_json::from_str(r#"{"language": ["en", "fr"]}"#).unwrap();
        assert_eq!(parsed.language, Some("fr".to_string()));
    }

    #[test]
    fn last_accepts_a_bare_value() {
        let parsed: LastField = serde_json::from_str(r#"{"language": "en"}"#).unwrap();
        assert_eq!(parsed.language, Some("en".to_string()));
    }
}

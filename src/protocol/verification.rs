//! Cross-field URL consistency checks required before trusting a fetched/received object.

use crate::error::Error;
use url::Url;

/// Ensures `a` and `b` share a domain — e.g. an actor's id and its inbox must be same-origin.
pub fn verify_domains_match(a: &Url, b: &Url) -> Result<(), Error> {
    if a.domain() == b.domain() {
        Ok(())
    } else {
        Err(Error::UrlVerification("domains do not match"))
    }
}

/// Ensures `a` and `b` are identical once normalized, used to check an activity's claimed actor
/// against the actor that signed the request delivering it.
pub fn verify_urls_match(a: &Url, b: &Url) -> Result<(), Error> {
    if a == b {
        Ok(())
    } else {
        Err(Error::UrlVerification("urls do not match"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domains_match_ignores_path_and_scheme_case() {
        let a: Url = "https://example.com/users/alice".parse().unwrap();
        let b: Url = "https://example.com/inbox".parse().unwrap();
        assert!(verify_domains_match(&a, &b).is_ok());
    }

    #[test]
    fn domains_match_rejects_distinct_hosts() {
        let a: Url = "https://example.com/users/alice".parse().unwrap();
        let b: Url = "https://remote.example/users/bob".parse().unwrap();
        assert!(verify_domains_match(&a, &b).is_err());
    }

    #[test]
    fn urls_match_requires_exact_equality() {
        let a: Url = "https://example.com/users/alice".parse().unwrap();
        let b: Url = "https://example.com/users/alice".parse().unwrap();
        let c: Url = "https://example.com/users/alice/".parse().unwrap();
        assert!(verify_urls_match(&a, &b).is_ok());
        assert!(verify_urls_match(&a, &c).is_err());
    }
}

//! URL normalization for frontier deduplication.

use url::Url;

/// Normalize a URL to its dedup identity: lowercase scheme+host, path with
/// the trailing slash trimmed (except root), query pairs sorted, fragment
/// stripped.
pub fn normalize_url(url: &Url) -> String {
    let mut normalized = url.clone();
    normalized.set_fragment(None);

    // Sort query pairs so parameter order does not defeat dedup.
    let mut pairs: Vec<(String, String)> = normalized
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if pairs.len() > 1 {
        pairs.sort();
        normalized
            .query_pairs_mut()
            .clear()
            .extend_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    }

    let mut s = normalized.to_string();
    // Trim trailing slash for consistency (except the root path).
    if s.ends_with('/') && normalized.path() != "/" {
        s.pop();
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(s: &str) -> String {
        normalize_url(&Url::parse(s).unwrap())
    }

    #[test]
    fn strips_fragment() {
        assert_eq!(
            norm("https://a.test/page#section-1"),
            "https://a.test/page"
        );
    }

    #[test]
    fn sorts_query_pairs() {
        assert_eq!(norm("https://a.test/p?b=2&a=1"), norm("https://a.test/p?a=1&b=2"));
    }

    #[test]
    fn trims_trailing_slash_except_root() {
        assert_eq!(norm("https://a.test/guide/"), "https://a.test/guide");
        assert_eq!(norm("https://a.test/"), "https://a.test/");
    }

    #[test]
    fn host_case_insensitive() {
        assert_eq!(norm("https://A.TEST/p"), norm("https://a.test/p"));
    }
}

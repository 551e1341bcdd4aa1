//! URL canonicalization and trusted-domain matching.

use url::Url;

/// Query parameters that never contribute to the identity of an article.
/// A bare `utm` key and any key starting with `utm_` are stripped as well.
const TRACKING_PARAMS: &[&str] = &[
    "_dt", "fbclid", "gclid", "modal", "ref", "source", "mc_cid", "mc_eid", "cmpid", "ocid",
];

/// Grouping key for an article URL: lower-cased host without `www.`, no
/// default port, no fragment, no trailing slash, tracking parameters removed
/// and the remaining parameters sorted.
///
/// Unparseable input falls back to the trimmed, lower-cased string so it still
/// groups with byte-identical duplicates.
pub fn canonical_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(parsed) = Url::parse(trimmed) else {
        return trimmed.to_lowercase();
    };

    let host = parsed.host_str().unwrap_or_default().to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);

    let mut pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();

    let mut key = format!("{}://{}", parsed.scheme(), host);
    if let Some(port) = parsed.port() {
        key.push_str(&format!(":{port}"));
    }
    key.push_str(parsed.path().trim_end_matches('/'));
    if !pairs.is_empty() {
        let query: Vec<String> = pairs
            .iter()
            .map(|(k, v)| if v.is_empty() { k.clone() } else { format!("{k}={v}") })
            .collect();
        key.push('?');
        key.push_str(&query.join("&"));
    }
    key
}

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key == "utm" || key.starts_with("utm_") || TRACKING_PARAMS.contains(&key.as_str())
}

/// Registrable host of a URL, lower-cased and without `www.`.
pub fn domain_of(raw: &str) -> Option<String> {
    let parsed = Url::parse(raw.trim()).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    Some(host.strip_prefix("www.").unwrap_or(&host).to_string())
}

/// True when the URL's host equals a trusted domain or is a subdomain of one.
pub fn is_trusted_domain(raw: &str, trusted: &[String]) -> bool {
    let Some(host) = domain_of(raw) else {
        return false;
    };
    trusted.iter().any(|t| {
        let t = t.trim().trim_start_matches("www.").to_lowercase();
        !t.is_empty() && (host == t || host.ends_with(&format!(".{t}")))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracking_params_collapse_to_same_key() {
        let a = canonical_url("https://x.com/a?utm=1");
        let b = canonical_url("https://x.com/a?utm=2");
        let c = canonical_url("https://x.com/a");
        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[test]
    fn utm_prefix_requires_underscore() {
        assert_eq!(
            canonical_url("https://x.com/a?utmost=1&utm_medium=email&UTM_Campaign=q3"),
            "https://x.com/a?utmost=1"
        );
    }

    #[test]
    fn host_is_lowercased_and_www_dropped() {
        assert_eq!(
            canonical_url("https://WWW.Example.COM/News/"),
            "https://example.com/News"
        );
    }

    #[test]
    fn identity_params_are_kept_and_sorted() {
        assert_eq!(
            canonical_url("https://example.com/story?b=2&utm_source=x&a=1&fbclid=z"),
            "https://example.com/story?a=1&b=2"
        );
    }

    #[test]
    fn fragment_and_default_port_are_dropped() {
        assert_eq!(
            canonical_url("https://example.com:443/p#section"),
            "https://example.com/p"
        );
        assert_eq!(
            canonical_url("http://example.com:8080/p"),
            "http://example.com:8080/p"
        );
    }

    #[test]
    fn garbage_falls_back_to_lowercase() {
        assert_eq!(canonical_url("  Not A URL "), "not a url");
    }

    #[test]
    fn trusted_domain_matches_subdomains() {
        let trusted = vec!["reuters.com".to_string()];
        assert!(is_trusted_domain("https://www.reuters.com/x", &trusted));
        assert!(is_trusted_domain("https://uk.reuters.com/x", &trusted));
        assert!(!is_trusted_domain("https://notreuters.com/x", &trusted));
        assert!(!is_trusted_domain("garbage", &trusted));
    }
}

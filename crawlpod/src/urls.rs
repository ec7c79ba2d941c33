//! URL normalization, domain extraction, and relative-link resolution.

use url::Url;

use crate::domain::Domain;

/// Lowercases scheme and host, strips the default port, drops the fragment,
/// resolves `.`/`..` segments, canonicalizes percent-encoding, and removes a
/// trailing dot from the host. Only `http`/`https` survive; anything else
/// returns `None`.
///
/// Idempotent: `normalize(normalize(x)) == normalize(x)`, since `url::Url`
/// already stores its components in the same canonical form this function
/// produces, so a second pass is a no-op.
pub fn normalize(raw: &str) -> Option<String> {
    let mut url = Url::parse(raw).ok()?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }

    if url.host_str().is_none() {
        return None;
    }

    url.set_fragment(None);

    if let Some(host) = url.host_str() {
        if host.ends_with('.') {
            let trimmed = host.trim_end_matches('.').to_string();
            let _ = url.set_host(Some(&trimmed));
        }
    }

    let default_port = match url.scheme() {
        "http" => Some(80),
        "https" => Some(443),
        _ => None,
    };
    if url.port() == default_port {
        let _ = url.set_port(None);
    }

    Some(url.to_string())
}

/// Registered domain (public-suffix + one label) for a URL, or empty if one
/// cannot be determined.
pub fn extract_domain(url: &Url) -> Option<Domain> {
    let host = url.host_str()?;
    psl::domain_str(host).map(Domain::from)
}

/// RFC-3986 resolution of `href` against `base`. Returns `None` if the
/// result is not `http(s)` or the href is malformed.
pub fn resolve(base: &Url, href: &str) -> Option<Url> {
    let joined = base.join(href).ok()?;
    match joined.scheme() {
        "http" | "https" => Some(joined),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_lowercases_scheme_and_host() {
        let out = normalize("HTTP://Example.COM/Path").unwrap();
        assert_eq!(out, "http://example.com/Path");
    }

    #[test]
    fn normalize_strips_default_port() {
        let out = normalize("http://example.com:80/a").unwrap();
        assert_eq!(out, "http://example.com/a");
        let out = normalize("https://example.com:443/a").unwrap();
        assert_eq!(out, "https://example.com/a");
    }

    #[test]
    fn normalize_keeps_nondefault_port() {
        let out = normalize("http://example.com:8080/a").unwrap();
        assert_eq!(out, "http://example.com:8080/a");
    }

    #[test]
    fn normalize_strips_fragment() {
        let out = normalize("http://example.com/a#section").unwrap();
        assert_eq!(out, "http://example.com/a");
    }

    #[test]
    fn normalize_rejects_non_http_schemes() {
        assert!(normalize("ftp://example.com/a").is_none());
        assert!(normalize("mailto:hi@example.com").is_none());
    }

    #[test]
    fn normalize_is_idempotent() {
        let once = normalize("HTTP://Example.com:80/a/../b?x=1#frag").unwrap();
        let twice = normalize(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn percent_encoding_of_unreserved_chars_normalizes_equal() {
        let a = normalize("http://example.com/%7Euser").unwrap();
        let b = normalize("http://example.com/~user").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn extract_domain_strips_subdomains() {
        let url = Url::parse("https://www.blog.example.com/post").unwrap();
        let domain = extract_domain(&url).unwrap();
        assert_eq!(domain.as_str(), "example.com");
    }

    #[test]
    fn resolve_against_base_href() {
        let base = Url::parse("https://example.com/dir/page.html").unwrap();
        let resolved = resolve(&base, "/a").unwrap();
        assert_eq!(resolved.as_str(), "https://example.com/a");

        let resolved = resolve(&base, "b.html").unwrap();
        assert_eq!(resolved.as_str(), "https://example.com/dir/b.html");
    }

    #[test]
    fn resolve_rejects_non_http_targets() {
        let base = Url::parse("https://example.com/").unwrap();
        assert!(resolve(&base, "javascript:alert(1)").is_none());
        assert!(resolve(&base, "mailto:a@example.com").is_none());
    }

    proptest::proptest! {
        #[test]
        fn normalize_is_idempotent_for_arbitrary_paths(
            host in "[a-z]{3,10}\\.(com|test|org)",
            path in "[a-zA-Z0-9/_-]{0,20}",
        ) {
            let raw = format!("https://{host}/{path}");
            if let Some(once) = normalize(&raw) {
                let twice = normalize(&once).unwrap();
                proptest::prop_assert_eq!(once, twice);
            }
        }
    }
}

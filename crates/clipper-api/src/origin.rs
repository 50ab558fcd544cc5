//! Origin allow-list for the WebSocket upgrade.
//!
//! Entries are exact origins (`https://clpr.tv`), `*` to allow anything, or
//! `*.domain` which matches the domain itself and any subdomain below it
//! on any scheme or port.

/// A missing or empty origin is never allowed.
pub fn is_origin_allowed(origin: Option<&str>, allowed: &[String]) -> bool {
    let Some(origin) = origin.map(str::trim).filter(|o| !o.is_empty()) else {
        return false;
    };

    allowed.iter().any(|pattern| matches_pattern(origin, pattern))
}

pub fn matches_pattern(origin: &str, pattern: &str) -> bool {
    let pattern = pattern.trim();
    if pattern == "*" {
        return true;
    }

    let Some(base) = pattern.strip_prefix("*.") else {
        return origin.eq_ignore_ascii_case(pattern);
    };

    let Some(host) = origin_host(origin) else {
        return false;
    };
    if host.eq_ignore_ascii_case(base) {
        return true;
    }

    // `staging.clpr.tv` ends with `.clpr.tv`; `evilclpr.tv` does not
    let (host, base) = (host.as_bytes(), base.as_bytes());
    host.len() > base.len() + 1
        && host[host.len() - base.len() - 1] == b'.'
        && host[host.len() - base.len()..].eq_ignore_ascii_case(base)
}

/// Host part of `scheme://host[:port][/...]`.
fn origin_host(origin: &str) -> Option<&str> {
    let (_, rest) = origin.split_once("://")?;
    let authority = rest.split('/').next().unwrap_or(rest);
    let host = match authority.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => authority,
    };
    (!host.is_empty()).then_some(host)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(entries: &[&str]) -> Vec<String> {
        entries.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_is_origin_allowed() {
        let cases: &[(&str, Option<&str>, &[&str], bool)] = &[
            ("exact localhost", Some("http://localhost:5173"), &["http://localhost:5173", "http://localhost:3000"], true),
            ("exact production", Some("https://clpr.tv"), &["https://clpr.tv", "https://www.clpr.tv"], true),
            ("no match", Some("https://evil.com"), &["https://clpr.tv"], false),
            ("empty origin", Some(""), &["https://clpr.tv"], false),
            ("missing origin", None, &["*"], false),
            ("wildcard subdomain", Some("https://staging.clpr.tv"), &["*.clpr.tv"], true),
            ("wildcard nested subdomain", Some("https://api.staging.clpr.tv"), &["*.clpr.tv"], true),
            ("wildcard base domain", Some("https://clpr.tv"), &["*.clpr.tv"], true),
            ("wildcard other domain", Some("https://clpr.evil.com"), &["*.clpr.tv"], false),
            ("wildcard partial domain", Some("https://fakeclpr.tv"), &["*.clpr.tv"], false),
            ("port", Some("http://localhost:3000"), &["http://localhost:3000"], true),
            ("first of several", Some("https://clpr.tv"), &["https://clpr.tv", "*.staging.clpr.tv"], true),
            ("wildcard among several", Some("https://beta.staging.clpr.tv"), &["https://clpr.tv", "*.staging.clpr.tv"], true),
            ("allow all", Some("https://anything.example"), &["*"], true),
            ("empty list", Some("https://clpr.tv"), &[], false),
        ];

        for (name, origin, allowed, expected) in cases {
            assert_eq!(is_origin_allowed(*origin, &list(allowed)), *expected, "{name}");
        }
    }

    #[test]
    fn test_matches_pattern() {
        let cases = [
            ("https://clpr.tv", "https://clpr.tv", true),
            ("https://staging.clpr.tv", "*.clpr.tv", true),
            ("https://clpr.tv", "*.clpr.tv", true),
            ("http://staging.clpr.tv", "*.clpr.tv", true),
            ("http://staging.clpr.tv:8080", "*.clpr.tv", true),
            ("https://example.com", "*.clpr.tv", false),
            ("https://fakeclpr.tv", "*.clpr.tv", false),
            ("https://evilclpr.tv", "*.clpr.tv", false),
            ("clpr.tv", "*.clpr.tv", false),
        ];

        for (origin, pattern, expected) in cases {
            assert_eq!(matches_pattern(origin, pattern), expected, "{origin} vs {pattern}");
        }
    }
}

//! C10: auto-inject / permission gate (§4.10).
//!
//! Resolves a request URL to a coarse `scheme://host/*` origin pattern (or `file:///*` for
//! local files), tracks which patterns have been granted, and decides whether a navigation
//! should trigger auto-inject without ever prompting mid-navigation.

use parking_lot::RwLock;
use std::collections::HashSet;
use url::Url;

/// `http`, `https`, and `file` are the only eligible schemes; everything else (e.g.
/// `chrome-extension`, `about`) is rejected outright.
pub fn origin_pattern(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    match parsed.scheme() {
        "http" | "https" => {
            let host = parsed.host_str()?;
            let port = parsed
                .port()
                .map(|p| format!(":{p}"))
                .unwrap_or_default();
            Some(format!("{}://{}{}/*", parsed.scheme(), host, port))
        }
        "file" => Some("file:///*".to_string()),
        _ => None,
    }
}

#[derive(Default)]
pub struct PermissionGate {
    granted: RwLock<HashSet<String>>,
}

impl PermissionGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_permission(&self, pattern: &str) -> bool {
        self.granted.read().contains(pattern)
    }

    /// Grants `pattern`. Modeled as always succeeding (the actual browser permission prompt
    /// is an external collaborator); returns whether the grant changed anything.
    pub fn request_permission(&self, pattern: &str) -> bool {
        self.granted.write().insert(pattern.to_string())
    }

    pub fn revoke(&self, pattern: &str) -> bool {
        self.granted.write().remove(pattern)
    }

    /// Auto-inject fires only when `auto_translate` is enabled and the origin already has a
    /// granted permission; navigation itself never triggers a prompt.
    pub fn ensure_started(&self, url: &str, auto_translate: bool) -> bool {
        if !auto_translate {
            return false;
        }
        match origin_pattern(url) {
            Some(pattern) => self.has_permission(&pattern),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_and_https_produce_scheme_host_wildcard() {
        assert_eq!(
            origin_pattern("https://example.com/path?q=1").as_deref(),
            Some("https://example.com/*")
        );
        assert_eq!(
            origin_pattern("http://example.com:8080/x").as_deref(),
            Some("http://example.com:8080/*")
        );
    }

    #[test]
    fn file_urls_collapse_to_a_single_pattern() {
        assert_eq!(
            origin_pattern("file:///home/user/doc.html").as_deref(),
            Some("file:///*")
        );
    }

    #[test]
    fn ineligible_schemes_are_rejected() {
        assert_eq!(origin_pattern("chrome-extension://abc/page.html"), None);
        assert_eq!(origin_pattern("about:blank"), None);
    }

    #[test]
    fn ensure_started_requires_both_auto_translate_and_grant() {
        let gate = PermissionGate::new();
        let url = "https://example.com/";
        assert!(!gate.ensure_started(url, true));
        gate.request_permission(&origin_pattern(url).unwrap());
        assert!(gate.ensure_started(url, true));
        assert!(!gate.ensure_started(url, false));
    }

    #[test]
    fn revoke_removes_a_previously_granted_pattern() {
        let gate = PermissionGate::new();
        gate.request_permission("https://example.com/*");
        assert!(gate.has_permission("https://example.com/*"));
        gate.revoke("https://example.com/*");
        assert!(!gate.has_permission("https://example.com/*"));
    }
}

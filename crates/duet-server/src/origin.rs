//! Cross-origin gate.
//!
//! Requests carrying an `Origin` header must clear this gate before any
//! protocol work: the WebSocket upgrade, the event-stream endpoints, and
//! every credential-returning API route.

use std::collections::HashSet;

/// Decides whether a request origin is acceptable.
pub struct OriginGate {
    allowed: HashSet<String>,
}

impl OriginGate {
    pub fn new(allowed: impl IntoIterator<Item = String>) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
        }
    }

    /// Accept when the origin is absent, on the allow-list, a localhost
    /// variant, or same-host over either scheme.
    pub fn allows(&self, origin: Option<&str>, host: Option<&str>) -> bool {
        let Some(origin) = origin.map(str::trim).filter(|o| !o.is_empty()) else {
            return true;
        };

        if self.allowed.contains(origin) {
            return true;
        }

        if origin == "http://localhost" || origin.starts_with("http://localhost:") {
            return true;
        }

        let Some(host) = host.map(str::trim).filter(|h| !h.is_empty()) else {
            return false;
        };
        origin == format!("https://{host}") || origin == format!("http://{host}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> OriginGate {
        OriginGate::new(vec!["https://app.example.com".to_string()])
    }

    #[test]
    fn empty_origin_is_allowed() {
        assert!(gate().allows(None, Some("signal.example.com")));
        assert!(gate().allows(Some(""), Some("signal.example.com")));
        assert!(gate().allows(Some("  "), None));
    }

    #[test]
    fn allow_list_match() {
        assert!(gate().allows(Some("https://app.example.com"), None));
        assert!(!gate().allows(Some("https://evil.example.com"), None));
    }

    #[test]
    fn localhost_variants_allowed() {
        assert!(gate().allows(Some("http://localhost"), None));
        assert!(gate().allows(Some("http://localhost:3000"), None));
        assert!(!gate().allows(Some("http://localhost.evil.com"), None));
        assert!(!gate().allows(Some("https://localhost:3000"), None));
    }

    #[test]
    fn same_host_either_scheme_allowed() {
        let gate = gate();
        assert!(gate.allows(Some("https://signal.example.com"), Some("signal.example.com")));
        assert!(gate.allows(Some("http://signal.example.com"), Some("signal.example.com")));
        assert!(!gate.allows(Some("https://other.example.com"), Some("signal.example.com")));
        assert!(!gate.allows(Some("https://signal.example.com"), None));
    }
}

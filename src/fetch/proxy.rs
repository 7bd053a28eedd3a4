//! Forward-proxy URL rewriting.
//!
//! Some networks block direct access to feed hosts; routing through a
//! relay (e.g. an edge worker) works around that. The rewrite is a pure
//! string transform: the target loses its scheme and is appended to the
//! proxy base as `base/host-and-path`. The relay is expected to
//! reconstruct the upstream URL from the path.

/// Rewrites outbound URLs through a configured proxy base, if any.
#[derive(Debug, Clone, Default)]
pub struct ProxyResolver {
    base: Option<String>,
}

impl ProxyResolver {
    /// A resolver from an optional proxy base URL. Empty or whitespace-only
    /// bases count as disabled; a trailing slash on the base is trimmed.
    pub fn new(base: Option<&str>) -> Self {
        let base = base
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .map(|b| b.trim_end_matches('/').to_string());
        Self { base }
    }

    pub fn disabled() -> Self {
        Self { base: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.base.is_some()
    }

    /// Rewrite a target URL through the proxy. Pass-through when disabled.
    pub fn rewrite(&self, target: &str) -> String {
        match &self.base {
            Some(base) => format!("{}/{}", base, strip_scheme(target)),
            None => target.to_string(),
        }
    }
}

fn strip_scheme(url: &str) -> &str {
    url.strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url)
}

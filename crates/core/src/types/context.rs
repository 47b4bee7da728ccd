use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, Secret};

// =============================================================================
// Security Context
// =============================================================================

/// Bearer credential presented with a request.
#[derive(Debug, Clone)]
pub struct Credential {
    /// Opaque token, verified by a `TokenVerifier`.
    pub token: Secret<String>,
    /// Expiry, if the token carries one.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Secret::new(token.into()),
            expires_at: None,
        }
    }

    pub fn expiring_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |exp| exp <= now)
    }

    pub fn expose(&self) -> &str {
        self.token.expose_secret()
    }
}

/// Caller identity and permissions. Read-only to the executor.
#[derive(Debug, Clone)]
pub struct SecurityContext {
    /// Principal identifier (user ID, service account).
    pub principal: String,
    /// Granted capabilities. `*` grants everything, `prefix.*` a namespace.
    pub capabilities: BTreeSet<String>,
    /// Rate-limit bucket (tenant, plan tier).
    pub rate_limit_bucket: String,
    /// Request metadata copied into audit records (IP, user agent).
    pub request_metadata: BTreeMap<String, String>,
    /// Credential, if the request was authenticated with one.
    pub credential: Option<Credential>,
}

impl SecurityContext {
    /// Create a context for a principal in the default bucket.
    pub fn new(principal: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            capabilities: BTreeSet::new(),
            rate_limit_bucket: "default".to_string(),
            request_metadata: BTreeMap::new(),
            credential: None,
        }
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.insert(capability.into());
        self
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities.extend(capabilities.into_iter().map(Into::into));
        self
    }

    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.rate_limit_bucket = bucket.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.request_metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Whether the context grants `capability`, honoring wildcards.
    pub fn grants(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|held| capability_matches(held, capability))
    }

    /// Required capabilities not granted by this context.
    pub fn missing<'a, I>(&self, required: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        required
            .into_iter()
            .filter(|c| !self.grants(c))
            .cloned()
            .collect()
    }
}

fn capability_matches(held: &str, required: &str) -> bool {
    if held == "*" || held == required {
        return true;
    }
    match held.strip_suffix(".*") {
        Some(prefix) => required
            .strip_prefix(prefix)
            .map_or(false, |rest| rest.starts_with('.')),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_and_wildcard_grants() {
        let ctx = SecurityContext::new("editor").with_capabilities(["content.*", "media.upload"]);
        assert!(ctx.grants("content.create"));
        assert!(ctx.grants("content.draft.publish"));
        assert!(ctx.grants("media.upload"));
        assert!(!ctx.grants("media.delete"));
        assert!(!ctx.grants("contentx.create"));
        assert!(!ctx.grants("content"));
    }

    #[test]
    fn test_superuser() {
        let ctx = SecurityContext::new("root").with_capability("*");
        assert!(ctx.grants("plugin.install"));
    }

    #[test]
    fn test_missing() {
        let ctx = SecurityContext::new("u").with_capability("a");
        let required: BTreeSet<String> = ["a".to_string(), "b".to_string()].into_iter().collect();
        assert_eq!(ctx.missing(&required), vec!["b".to_string()]);
    }

    #[test]
    fn test_credential_expiry() {
        let now = Utc::now();
        let cred = Credential::new("t").expiring_at(now - chrono::Duration::seconds(1));
        assert!(cred.is_expired(now));
        assert!(!Credential::new("t").is_expired(now));
        assert_eq!(cred.expose(), "t");
    }
}

//! Capability and rate-limit access guard.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use bastion_core::{
    config::RateLimitConfig,
    traits::{AccessGuard, AccessRequest, AuditSink, RateLimitStore, TokenVerifier},
    types::{composite_key, AuditContext, AuditError, AuditRecord, AuditStatus, SecurityContext},
    ClassificationPolicy, Error, Result,
};

/// Window and default ceiling for the fixed-window limiter.
#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    pub window: Duration,
    /// Applied when the request carries no limit of its own.
    pub default_max: Option<u32>,
}

impl RateLimitPolicy {
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self {
            window: Duration::from_secs(config.window_secs),
            default_max: config.default_max,
        }
    }

    /// Counter key for a context and operation type.
    pub fn key(ctx: &SecurityContext, operation_type: &str) -> String {
        composite_key(&[ctx.rate_limit_bucket.as_str(), ctx.principal.as_str(), operation_type])
    }
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self::from_config(&RateLimitConfig::default())
    }
}

/// Default [`AccessGuard`].
///
/// Checks run in order and stop at the first denial: context present,
/// credential unexpired, credential verified (when a verifier is set),
/// capabilities held, rate limit. The rate counter is only touched once every
/// other check has passed, so a denied call never consumes a slot.
pub struct CapabilityGuard {
    limiter: Arc<dyn RateLimitStore>,
    policy: RateLimitPolicy,
    audit: Arc<dyn AuditSink>,
    verifier: Option<Arc<dyn TokenVerifier>>,
    classification: ClassificationPolicy,
}

impl CapabilityGuard {
    pub fn new(limiter: Arc<dyn RateLimitStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            limiter,
            policy: RateLimitPolicy::default(),
            audit,
            verifier: None,
            classification: ClassificationPolicy::new(),
        }
    }

    pub fn with_policy(mut self, policy: RateLimitPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn TokenVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn with_classification(mut self, classification: ClassificationPolicy) -> Self {
        self.classification = classification;
        self
    }

    async fn evaluate(&self, ctx: Option<&SecurityContext>, request: &AccessRequest<'_>) -> Result<()> {
        let ctx = ctx.ok_or_else(|| Error::authorization("no security context"))?;

        if let Some(credential) = &ctx.credential {
            if credential.is_expired(Utc::now()) {
                return Err(Error::authorization("credential expired"));
            }
        }

        let mut asserted = None;
        if let Some(verifier) = &self.verifier {
            let credential = ctx
                .credential
                .as_ref()
                .ok_or_else(|| Error::authorization("credential required"))?;
            let identity = verifier.verify(credential.expose()).await?;
            if identity.principal != ctx.principal {
                return Err(Error::security_violation(format!(
                    "credential issued to '{}' presented by '{}'",
                    identity.principal, ctx.principal
                )));
            }
            if !identity.capabilities.is_empty() {
                asserted = Some(SecurityContext::new(identity.principal).with_capabilities(identity.capabilities));
            }
        }

        let mut missing = ctx.missing(request.capabilities.iter());
        if let Some(asserted) = &asserted {
            for capability in asserted.missing(request.capabilities.iter()) {
                if !missing.contains(&capability) {
                    missing.push(capability);
                }
            }
        }
        if !missing.is_empty() {
            missing.sort();
            return Err(Error::authorization(format!("missing capabilities: {}", missing.join(", "))));
        }

        if let Some(limit) = request.rate_limit.or(self.policy.default_max) {
            let key = RateLimitPolicy::key(ctx, request.operation_type);
            if !self.limiter.check_and_increment(&key, limit, self.policy.window).await? {
                return Err(Error::RateLimited {
                    key,
                    limit,
                    window_secs: self.policy.window.as_secs(),
                });
            }
        }

        Ok(())
    }

    async fn record_denial(&self, ctx: Option<&SecurityContext>, request: &AccessRequest<'_>, error: &Error) {
        let classification = self.classification.classify(error.kind());
        tracing::warn!(
            operation_id = request.operation_id,
            operation_type = request.operation_type,
            principal = ctx.map(|c| c.principal.as_str()).unwrap_or("<none>"),
            kind = %error.kind(),
            "Access denied: {}",
            error
        );

        let mut record = AuditRecord::new(request.operation_id, request.operation_type, AuditStatus::SecurityAlert)
            .with_context(AuditContext {
                request_metadata: ctx.map(|c| c.request_metadata.clone()).unwrap_or_default(),
                ..Default::default()
            })
            .with_error(AuditError::from_error(error, classification))
            .with_detail(json!({ "stage": "access_guard" }));
        if let Some(ctx) = ctx {
            record = record.with_principal(&ctx.principal);
        }
        self.audit.record(record).await;
    }
}

#[async_trait]
impl AccessGuard for CapabilityGuard {
    async fn check(&self, ctx: Option<&SecurityContext>, request: &AccessRequest<'_>) -> Result<()> {
        let outcome = self.evaluate(ctx, request).await;
        if let Err(e) = &outcome {
            self.record_denial(ctx, request, e).await;
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{InMemoryAuditStore, ResilientAuditSink};
    use crate::rbac::StaticTokenVerifier;
    use bastion_core::types::Credential;
    use bastion_core::ErrorKind;
    use bastion_store::FixedWindowRateLimiter;
    use std::collections::BTreeSet;

    fn guard() -> (CapabilityGuard, Arc<InMemoryAuditStore>) {
        let audit = Arc::new(InMemoryAuditStore::new());
        let sink = Arc::new(ResilientAuditSink::new(audit.clone()));
        let guard = CapabilityGuard::new(Arc::new(FixedWindowRateLimiter::new()), sink);
        (guard, audit)
    }

    fn caps(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn request<'a>(capabilities: &'a BTreeSet<String>, rate_limit: Option<u32>) -> AccessRequest<'a> {
        AccessRequest {
            operation_id: "op-1",
            operation_type: "content.create",
            capabilities,
            rate_limit,
        }
    }

    #[tokio::test]
    async fn test_missing_context_denied_and_audited() {
        let (guard, audit) = guard();
        let required = caps(&["content.create"]);

        let err = guard.check(None, &request(&required, None)).await.unwrap_err();
        assert!(matches!(err, Error::Authorization(_)));

        let records = audit.all().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, AuditStatus::SecurityAlert);
        assert_eq!(records[0].principal, None);
    }

    #[tokio::test]
    async fn test_separator_in_principal_gets_own_window() {
        let (guard, _audit) = guard();
        let required = caps(&[]);
        let colon = SecurityContext::new("a:b");
        let plain = SecurityContext::new("a");
        assert_ne!(RateLimitPolicy::key(&colon, "c"), RateLimitPolicy::key(&plain, "b:c"));

        let first = AccessRequest {
            operation_type: "c",
            ..request(&required, Some(1))
        };
        let second = AccessRequest {
            operation_type: "b:c",
            ..request(&required, Some(1))
        };
        guard.check(Some(&colon), &first).await.unwrap();
        guard.check(Some(&plain), &second).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_capability() {
        let (guard, audit) = guard();
        let ctx = SecurityContext::new("alice").with_capability("content.read");
        let required = caps(&["content.create", "content.publish"]);

        let err = guard.check(Some(&ctx), &request(&required, None)).await.unwrap_err();
        assert!(err.to_string().contains("content.create, content.publish"));
        assert_eq!(audit.all().await[0].error.as_ref().unwrap().kind, ErrorKind::Authorization);
    }

    #[tokio::test]
    async fn test_wildcard_grants() {
        let (guard, audit) = guard();
        let ctx = SecurityContext::new("alice").with_capability("content.*");
        let required = caps(&["content.create"]);
        guard.check(Some(&ctx), &request(&required, None)).await.unwrap();
        assert!(audit.is_empty().await);
    }

    #[tokio::test]
    async fn test_expired_credential() {
        let (guard, _audit) = guard();
        let ctx = SecurityContext::new("alice")
            .with_capability("*")
            .with_credential(Credential::new("t").expiring_at(Utc::now() - chrono::Duration::minutes(1)));
        let required = caps(&[]);
        let err = guard.check(Some(&ctx), &request(&required, None)).await.unwrap_err();
        assert!(err.to_string().contains("expired"));
    }

    #[tokio::test]
    async fn test_rate_limit_after_capabilities() {
        let (guard, audit) = guard();
        let ctx = SecurityContext::new("alice").with_capability("content.create");
        let required = caps(&["content.create"]);

        // Denied calls do not consume the window.
        let outsider = SecurityContext::new("alice");
        assert!(guard.check(Some(&outsider), &request(&required, Some(2))).await.is_err());

        guard.check(Some(&ctx), &request(&required, Some(2))).await.unwrap();
        guard.check(Some(&ctx), &request(&required, Some(2))).await.unwrap();
        let err = guard.check(Some(&ctx), &request(&required, Some(2))).await.unwrap_err();
        match err {
            Error::RateLimited { key, limit, window_secs } => {
                assert_eq!(key, "default:alice:content.create");
                assert_eq!(limit, 2);
                assert_eq!(window_secs, 60);
            }
            other => panic!("expected rate limit, got {:?}", other),
        }

        let alerts = audit.all().await;
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[1].error.as_ref().unwrap().kind, ErrorKind::RateLimit);
    }

    #[tokio::test]
    async fn test_default_max_applies() {
        let audit = Arc::new(InMemoryAuditStore::new());
        let guard = CapabilityGuard::new(
            Arc::new(FixedWindowRateLimiter::new()),
            Arc::new(ResilientAuditSink::new(audit)),
        )
        .with_policy(RateLimitPolicy {
            window: Duration::from_secs(10),
            default_max: Some(1),
        });
        let ctx = SecurityContext::new("bob");
        let required = caps(&[]);
        guard.check(Some(&ctx), &request(&required, None)).await.unwrap();
        assert!(guard.check(Some(&ctx), &request(&required, None)).await.is_err());
    }

    #[tokio::test]
    async fn test_verifier_principal_mismatch_is_security_violation() {
        let (guard, _audit) = guard();
        let guard = guard.with_verifier(Arc::new(
            StaticTokenVerifier::new().with_token("tok-bob", "bob", Vec::<String>::new()),
        ));
        let ctx = SecurityContext::new("alice")
            .with_capability("*")
            .with_credential(Credential::new("tok-bob"));
        let required = caps(&["content.create"]);

        let err = guard.check(Some(&ctx), &request(&required, None)).await.unwrap_err();
        assert!(matches!(err, Error::SecurityViolation(_)));
    }

    #[tokio::test]
    async fn test_verifier_asserted_capabilities_bound_context() {
        let (guard, _audit) = guard();
        let guard = guard.with_verifier(Arc::new(
            StaticTokenVerifier::new().with_token("tok-alice", "alice", ["content.read"]),
        ));
        let ctx = SecurityContext::new("alice")
            .with_capability("*")
            .with_credential(Credential::new("tok-alice"));

        let read = caps(&["content.read"]);
        guard.check(Some(&ctx), &request(&read, None)).await.unwrap();

        let write = caps(&["content.create"]);
        let err = guard.check(Some(&ctx), &request(&write, None)).await.unwrap_err();
        assert!(matches!(err, Error::Authorization(_)));
    }
}

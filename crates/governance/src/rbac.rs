//! Token verification connectors for external identity providers.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;

use bastion_core::{
    traits::{TokenVerifier, VerifiedIdentity},
    Error, Result,
};

/// Verifier backed by a fixed token table (for tests and single-tenant setups).
#[derive(Debug, Clone, Default)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, VerifiedIdentity>,
}

impl StaticTokenVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a token for `principal` with the given capabilities.
    pub fn with_token<I, S>(mut self, token: impl Into<String>, principal: impl Into<String>, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tokens.insert(
            token.into(),
            VerifiedIdentity {
                principal: principal.into(),
                capabilities: capabilities.into_iter().map(Into::into).collect::<BTreeSet<_>>(),
            },
        );
        self
    }
}

#[async_trait]
impl TokenVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or_else(|| Error::authorization("credential not recognised"))
    }
}

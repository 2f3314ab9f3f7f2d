//! Bearer token classification into trust tiers.
//!
//! Every request is assigned exactly one [`TrustTier`]. Decisions come from an
//! optional [`ExternalAuthorizer`] first and fall back to the local
//! [`TrustStore`] when the authorizer has nothing to say.

mod authority;
mod store;

use serde::{Deserialize, Serialize};

pub use authority::{Decision, ExternalAuthorizer, HttpAuthorizer, TrustAuthority};
pub use store::TrustStore;

/// Privilege level of a request, ordered from least to most trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustTier {
    Unauthorized,
    Client,
    Admin,
    Core,
}

/// Outcome of authenticating one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    /// Who the caller acts as, for auditing. Core callers may name someone
    /// else through `X-On-Behalf-Of`.
    pub acting_identity: Option<String>,
    pub tier: TrustTier,
}

impl AuthContext {
    pub fn unauthorized() -> Self {
        Self {
            acting_identity: None,
            tier: TrustTier::Unauthorized,
        }
    }

    pub fn new(tier: TrustTier, acting_identity: impl Into<String>) -> Self {
        Self {
            acting_identity: Some(acting_identity.into()),
            tier,
        }
    }

    pub fn is_at_least(&self, tier: TrustTier) -> bool {
        self.tier >= tier
    }
}

/// A named admin credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminToken {
    pub assignee: String,
    pub token: String,
}

/// The replaceable admin and client credentials. Always installed whole.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTable {
    #[serde(default)]
    pub admins: Vec<AdminToken>,
    #[serde(default)]
    pub clients: Vec<String>,
}

/// Extract the token from an `Authorization: Bearer <token>` value
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.split_once(char::is_whitespace)?;
    if scheme != "Bearer" && scheme != "bearer" {
        return None;
    }
    let token = token.trim_start();
    if token.is_empty() || token.contains(char::is_whitespace) {
        return None;
    }
    Some(token)
}

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{bearer_token, AuthContext, TrustStore, TrustTier};

/// Answer from an external authorizer that recognised the token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow { is_admin: bool, is_core: bool },
    Deny,
}

/// Out-of-process authority consulted before the local tables.
///
/// `None` means nobody answered and the local tables decide.
#[async_trait]
pub trait ExternalAuthorizer: Send + Sync {
    async fn try_authorize(&self, token: &str) -> Option<Decision>;
}

#[derive(Deserialize)]
struct AuthorizeResponse {
    #[serde(default)]
    is_admin: bool,
    #[serde(default)]
    is_core: bool,
}

/// Delegates decisions to an HTTP endpoint.
///
/// 200 with `{is_admin, is_core}` allows, 401/403 denies, anything else
/// (including transport failures) is treated as no answer.
pub struct HttpAuthorizer {
    client: reqwest::Client,
    url: String,
}

impl HttpAuthorizer {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl ExternalAuthorizer for HttpAuthorizer {
    async fn try_authorize(&self, token: &str) -> Option<Decision> {
        let response = match self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "token": token }))
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "External authorizer unreachable");
                return None;
            }
        };

        match response.status() {
            StatusCode::OK => match response.json::<AuthorizeResponse>().await {
                Ok(body) => Some(Decision::Allow {
                    is_admin: body.is_admin,
                    is_core: body.is_core,
                }),
                Err(e) => {
                    warn!(error = %e, "External authorizer returned an unreadable body");
                    None
                }
            },
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Some(Decision::Deny),
            status => {
                debug!(status = %status, "External authorizer did not answer");
                None
            }
        }
    }
}

/// Assigns a trust tier to each request
pub struct TrustAuthority {
    authorizer: Option<Arc<dyn ExternalAuthorizer>>,
    store: Arc<TrustStore>,
    timeout: Duration,
}

impl TrustAuthority {
    pub fn new(store: Arc<TrustStore>) -> Self {
        Self {
            authorizer: None,
            store,
            timeout: Duration::from_secs(2),
        }
    }

    pub fn with_authorizer(mut self, authorizer: Arc<dyn ExternalAuthorizer>, timeout: Duration) -> Self {
        self.authorizer = Some(authorizer);
        self.timeout = timeout;
        self
    }

    /// Classify a request from its `Authorization` and `X-On-Behalf-Of` headers.
    ///
    /// A missing or malformed bearer token is unauthorized without further
    /// checks. An explicit denial from the authorizer also yields
    /// unauthorized; the route gates decide whether that is fatal.
    pub async fn authenticate(
        &self,
        authorization: Option<&str>,
        on_behalf_of: Option<&str>,
    ) -> AuthContext {
        let Some(token) = authorization.and_then(bearer_token) else {
            return AuthContext::unauthorized();
        };

        if let Some(authorizer) = &self.authorizer {
            match tokio::time::timeout(self.timeout, authorizer.try_authorize(token)).await {
                Ok(Some(Decision::Allow { is_core: true, .. })) => {
                    return AuthContext::new(TrustTier::Core, on_behalf_of.unwrap_or("core"));
                }
                Ok(Some(Decision::Allow { is_admin: true, .. })) => {
                    return AuthContext::new(TrustTier::Admin, "admin");
                }
                Ok(Some(Decision::Allow { .. })) => {
                    return AuthContext {
                        acting_identity: None,
                        tier: TrustTier::Client,
                    };
                }
                Ok(Some(Decision::Deny)) => {
                    debug!("External authorizer denied token");
                    return AuthContext::unauthorized();
                }
                Ok(None) => {}
                Err(_) => {
                    warn!(timeout_ms = self.timeout.as_millis() as u64, "External authorizer timed out");
                    return AuthContext::unauthorized();
                }
            }
        }

        self.store.classify(token, on_behalf_of).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trust::TokenTable;

    struct Fixed(Option<Decision>);

    #[async_trait]
    impl ExternalAuthorizer for Fixed {
        async fn try_authorize(&self, _token: &str) -> Option<Decision> {
            self.0
        }
    }

    struct Hangs;

    #[async_trait]
    impl ExternalAuthorizer for Hangs {
        async fn try_authorize(&self, _token: &str) -> Option<Decision> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            None
        }
    }

    fn store() -> Arc<TrustStore> {
        Arc::new(TrustStore::new(
            Some("c0re".to_string()),
            None,
            TokenTable {
                admins: vec![],
                clients: vec!["ababab".to_string()],
            },
        ))
    }

    fn with(decision: Option<Decision>) -> TrustAuthority {
        TrustAuthority::new(store()).with_authorizer(Arc::new(Fixed(decision)), Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_missing_or_malformed_header() {
        let authority = TrustAuthority::new(store());
        assert_eq!(authority.authenticate(None, None).await, AuthContext::unauthorized());
        assert_eq!(
            authority.authenticate(Some("Token ababab"), None).await,
            AuthContext::unauthorized()
        );
    }

    #[tokio::test]
    async fn test_local_fallback() {
        let authority = TrustAuthority::new(store());
        let ctx = authority.authenticate(Some("Bearer ababab"), None).await;
        assert_eq!(ctx.tier, TrustTier::Client);

        // Authorizer with no answer defers to the local tables
        let ctx = with(None).authenticate(Some("Bearer c0re"), Some("bob")).await;
        assert_eq!(ctx, AuthContext::new(TrustTier::Core, "bob"));
    }

    #[tokio::test]
    async fn test_authorizer_decides_first() {
        let core = Some(Decision::Allow { is_admin: true, is_core: true });
        let ctx = with(core).authenticate(Some("Bearer anything"), None).await;
        assert_eq!(ctx, AuthContext::new(TrustTier::Core, "core"));

        let admin = Some(Decision::Allow { is_admin: true, is_core: false });
        let ctx = with(admin).authenticate(Some("Bearer anything"), Some("x")).await;
        assert_eq!(ctx, AuthContext::new(TrustTier::Admin, "admin"));

        let plain = Some(Decision::Allow { is_admin: false, is_core: false });
        let ctx = with(plain).authenticate(Some("Bearer anything"), None).await;
        assert_eq!(ctx.tier, TrustTier::Client);
        assert!(ctx.acting_identity.is_none());
    }

    #[tokio::test]
    async fn test_denial_skips_local_tables() {
        let ctx = with(Some(Decision::Deny))
            .authenticate(Some("Bearer ababab"), None)
            .await;
        assert_eq!(ctx, AuthContext::unauthorized());
    }

    #[tokio::test]
    async fn test_authorizer_timeout_is_denial() {
        let authority = TrustAuthority::new(store())
            .with_authorizer(Arc::new(Hangs), Duration::from_millis(20));
        let ctx = authority.authenticate(Some("Bearer ababab"), None).await;
        assert_eq!(ctx, AuthContext::unauthorized());
    }
}

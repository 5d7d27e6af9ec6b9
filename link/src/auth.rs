//! Credentials for the broker and the history endpoint.
//!
//! A single [`CredentialSlot`] is shared by the connection task and the HTTP
//! history loader, so rotating a credential is visible to both on their next
//! request.
//!
//! ## Dynamic Auth Provider
//!
//! Use [`DynamicAuthProvider`] to supply credentials lazily. It is called on every
//! connect, reconnect and history request. This is the right choice for
//! OAuth/OIDC tokens that expire and are refreshed by someone else.
//!
//! ```rust,no_run
//! use chat_link::{AuthProvider, DynamicAuthProvider};
//!
//! struct SessionTokens { /* ... */ }
//!
//! #[async_trait::async_trait]
//! impl DynamicAuthProvider for SessionTokens {
//!     async fn get_auth(&self) -> chat_link::Result<AuthProvider> {
//!         Ok(AuthProvider::jwt_token("fresh-token".into()))
//!     }
//! }
//! ```

use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use parking_lot::RwLock;

use crate::error::Result;

/// Credential presented to the broker and to the history endpoint.
///
/// # Examples
///
/// ```rust
/// use chat_link::AuthProvider;
///
/// // Bearer token (CONNECT `Authorization` header, HTTP bearer auth)
/// let auth = AuthProvider::jwt_token("eyJhbGc...".to_string());
///
/// // Login/passcode (CONNECT `login`/`passcode`, HTTP Basic)
/// let auth = AuthProvider::basic_auth("alice".to_string(), "secret".to_string());
///
/// // Anonymous broker
/// let auth = AuthProvider::none();
/// ```
#[derive(Clone)]
pub enum AuthProvider {
    /// Login and passcode
    BasicAuth(String, String),

    /// Bearer token
    JwtToken(String),

    /// No authentication
    None,
}

impl AuthProvider {
    pub fn basic_auth(username: String, password: String) -> Self {
        Self::BasicAuth(username, password)
    }

    pub fn jwt_token(token: String) -> Self {
        Self::JwtToken(token)
    }

    pub fn none() -> Self {
        Self::None
    }

    /// Attach the matching `Authorization` header to an HTTP request.
    pub fn apply_to_request(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            Self::BasicAuth(username, password) => {
                let credentials = format!("{}:{}", username, password);
                let encoded = general_purpose::STANDARD.encode(credentials.as_bytes());
                request.header("Authorization", format!("Basic {}", encoded))
            },
            Self::JwtToken(token) => request.bearer_auth(token),
            Self::None => request,
        }
    }

    /// Bearer token, if this is token auth.
    pub fn bearer_token(&self) -> Option<&str> {
        match self {
            Self::JwtToken(token) => Some(token),
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        !matches!(self, Self::None)
    }
}

// Never print secrets.
impl std::fmt::Debug for AuthProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BasicAuth(user, _) => write!(f, "BasicAuth({}, ***)", user),
            Self::JwtToken(_) => write!(f, "JwtToken(***)"),
            Self::None => write!(f, "None"),
        }
    }
}

// ── Dynamic (async) auth provider ────────────────────────────────────────────

/// Async credential source called before every connect and history request.
///
/// The library never refreshes tokens itself; call
/// [`ChatLinkClient::on_credential_change`](crate::ChatLinkClient::on_credential_change)
/// when the source has a new token so the live session picks it up.
#[async_trait::async_trait]
pub trait DynamicAuthProvider: Send + Sync + 'static {
    /// Return the current (or freshly refreshed) credentials.
    async fn get_auth(&self) -> Result<AuthProvider>;
}

/// A boxed, reference-counted [`DynamicAuthProvider`].
pub type ArcDynAuthProvider = Arc<dyn DynamicAuthProvider>;

/// Either a static credential or a dynamic provider.
#[derive(Clone)]
pub enum ResolvedAuth {
    Static(AuthProvider),
    Dynamic(ArcDynAuthProvider),
}

impl ResolvedAuth {
    /// Obtain effective credentials, calling the dynamic provider if present.
    pub async fn resolve(&self) -> Result<AuthProvider> {
        match self {
            Self::Static(p) => Ok(p.clone()),
            Self::Dynamic(provider) => provider.get_auth().await,
        }
    }
}

impl std::fmt::Debug for ResolvedAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Static(p) => write!(f, "ResolvedAuth::Static({:?})", p),
            Self::Dynamic(_) => write!(f, "ResolvedAuth::Dynamic(<fn>)"),
        }
    }
}

impl Default for ResolvedAuth {
    fn default() -> Self {
        Self::Static(AuthProvider::None)
    }
}

impl From<AuthProvider> for ResolvedAuth {
    fn from(p: AuthProvider) -> Self {
        Self::Static(p)
    }
}

impl From<ArcDynAuthProvider> for ResolvedAuth {
    fn from(p: ArcDynAuthProvider) -> Self {
        Self::Dynamic(p)
    }
}

/// Shared, swappable credential source.
#[derive(Clone, Debug, Default)]
pub struct CredentialSlot {
    inner: Arc<RwLock<ResolvedAuth>>,
}

impl CredentialSlot {
    pub fn new(auth: impl Into<ResolvedAuth>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(auth.into())),
        }
    }

    /// Swap the credential source. Takes effect on the next resolve.
    pub fn replace(&self, auth: impl Into<ResolvedAuth>) {
        *self.inner.write() = auth.into();
    }

    /// Resolve the current credential. The lock is not held across the
    /// dynamic provider call.
    pub async fn resolve(&self) -> Result<AuthProvider> {
        let source = self.inner.read().clone();
        source.resolve().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_auth_provider_creation() {
        assert!(AuthProvider::basic_auth("alice".into(), "secret".into()).is_authenticated());
        assert!(AuthProvider::jwt_token("t".into()).is_authenticated());
        assert!(!AuthProvider::none().is_authenticated());
        assert_eq!(AuthProvider::jwt_token("t".into()).bearer_token(), Some("t"));
        assert_eq!(AuthProvider::none().bearer_token(), None);
    }

    #[test]
    fn test_debug_hides_secrets() {
        let shown = format!("{:?}", AuthProvider::basic_auth("alice".into(), "hunter2".into()));
        assert!(shown.contains("alice"));
        assert!(!shown.contains("hunter2"));
        assert!(!format!("{:?}", AuthProvider::jwt_token("abc.def".into())).contains("abc"));
    }

    #[test]
    fn test_basic_auth_header() {
        let auth = AuthProvider::basic_auth("alice".to_string(), "secret123".to_string());
        let request = auth
            .apply_to_request(reqwest::Client::new().get("http://localhost:8080"))
            .build()
            .unwrap();
        assert_eq!(
            request.headers().get("Authorization").unwrap(),
            "Basic YWxpY2U6c2VjcmV0MTIz"
        );
    }

    struct Counting(AtomicUsize);

    #[async_trait::async_trait]
    impl DynamicAuthProvider for Counting {
        async fn get_auth(&self) -> Result<AuthProvider> {
            let n = self.0.fetch_add(1, Ordering::SeqCst);
            Ok(AuthProvider::jwt_token(format!("token-{}", n)))
        }
    }

    #[tokio::test]
    async fn test_credential_slot_replace_and_dynamic() {
        let slot = CredentialSlot::new(AuthProvider::jwt_token("a".into()));
        assert_eq!(slot.resolve().await.unwrap().bearer_token(), Some("a"));

        slot.replace(AuthProvider::jwt_token("b".into()));
        assert_eq!(slot.clone().resolve().await.unwrap().bearer_token(), Some("b"));

        let dynamic: ArcDynAuthProvider = Arc::new(Counting(AtomicUsize::new(0)));
        slot.replace(dynamic);
        assert_eq!(slot.resolve().await.unwrap().bearer_token(), Some("token-0"));
        assert_eq!(slot.resolve().await.unwrap().bearer_token(), Some("token-1"));
    }
}

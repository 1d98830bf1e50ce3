//! Access-token plumbing for the live-update streams.
//!
//! The push-stream transport cannot carry custom headers, so the bearer token
//! travels as a query parameter. Where the token comes from is not this
//! crate's business: the managers are handed a [`TokenProvider`] and ask it
//! for the current token each time they open a transport.
//!
//! ## Example
//!
//! ```rust
//! use autoshop_realtime::auth::{TokenProvider, StaticToken};
//! use std::sync::Arc;
//!
//! // Any closure works as a provider, e.g. one reading your session store.
//! let from_session: Arc<dyn TokenProvider> = Arc::new(|| Some("abc123".to_string()));
//! assert_eq!(from_session.access_token().as_deref(), Some("abc123"));
//!
//! let fixed = StaticToken::new("Bearer abc123");
//! assert_eq!(fixed.access_token().as_deref(), Some("Bearer abc123"));
//! ```

use reqwest::Url;
use std::fmt;

/// Supplies the current bearer credential, or `None` when signed out.
pub trait TokenProvider: Send + Sync {
    /// Returns the token as stored; a `Bearer ` prefix is tolerated.
    fn access_token(&self) -> Option<String>;
}

impl<F> TokenProvider for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn access_token(&self) -> Option<String> {
        self()
    }
}

/// A provider that never has a token. Streams are opened unauthenticated.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoToken;

impl TokenProvider for NoToken {
    fn access_token(&self) -> Option<String> {
        None
    }
}

/// A provider that always returns the same token.
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl TokenProvider for StaticToken {
    fn access_token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

impl fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StaticToken").field(&"<redacted>").finish()
    }
}

/// Appends `token` to `url` as the `param` query parameter.
///
/// A leading `Bearer ` is stripped and blank tokens are ignored, leaving the
/// url untouched.
pub fn attach_token(url: &mut Url, param: &str, token: Option<&str>) {
    let Some(token) = token.map(strip_bearer).filter(|t| !t.is_empty()) else {
        return;
    };
    url.query_pairs_mut().append_pair(param, token);
}

fn strip_bearer(token: &str) -> &str {
    let token = token.trim();
    match token.strip_prefix("Bearer") {
        Some(rest) if rest.is_empty() || rest.starts_with(char::is_whitespace) => rest.trim(),
        _ => token,
    }
}

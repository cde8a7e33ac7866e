//! Caller authentication.
//!
//! Token verification belongs to the identity service; the core only needs a
//! verified [`UserId`] per request. [`TokenTable`] is the static stand-in
//! used for local development and tests.

use std::collections::HashMap;

use axum::http::HeaderMap;

use murmur_shared::UserId;

pub trait Authenticator: Send + Sync {
    /// The identity behind `token`, or `None` when it is unknown.
    fn authenticate(&self, token: &str) -> Option<UserId>;
}

#[derive(Debug, Default, Clone)]
pub struct TokenTable {
    tokens: HashMap<String, UserId>,
}

impl TokenTable {
    /// Parse `token=userUuid,token2=userUuid2`. Malformed entries are skipped.
    pub fn parse(table: &str) -> Self {
        let mut tokens = HashMap::new();
        for entry in table.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let Some((token, user)) = entry.split_once('=') else {
                tracing::warn!("Ignoring AUTH_TOKENS entry without '='");
                continue;
            };
            match user.parse::<UserId>() {
                Ok(user) if !token.trim().is_empty() => {
                    tokens.insert(token.trim().to_string(), user);
                }
                _ => tracing::warn!("Ignoring malformed AUTH_TOKENS entry"),
            }
        }
        Self { tokens }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl Authenticator for TokenTable {
    fn authenticate(&self, token: &str) -> Option<UserId> {
        self.tokens.get(token).copied()
    }
}

/// `Authorization: Bearer <token>`; a bare token is accepted as well.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let auth = headers.get("authorization")?.to_str().ok()?;
    let token = auth.strip_prefix("Bearer ").unwrap_or(auth).trim();
    (!token.is_empty()).then_some(token)
}

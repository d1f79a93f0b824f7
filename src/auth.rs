//! Resolves the identity behind a connection request.

use crate::config::AuthConfig;
use crate::core::{Authenticator, Identity};
use percent_encoding::percent_decode_str;
use std::collections::BTreeMap;
use tokio_tungstenite::tungstenite::handshake::server::Request;

/// Authenticates against a fixed token table.
#[derive(Debug, Clone, Default)]
pub struct TokenAuthenticator {
    tokens: BTreeMap<String, Identity>,
}

impl TokenAuthenticator {
    pub fn new(tokens: BTreeMap<String, Identity>) -> Self {
        Self { tokens }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(config.tokens.clone())
    }

    pub fn with_token(mut self, token: impl Into<String>, identity: Identity) -> Self {
        self.tokens.insert(token.into(), identity);
        self
    }
}

impl Authenticator for TokenAuthenticator {
    fn authenticate(&self, token: &str) -> Option<Identity> {
        self.tokens.get(token).cloned()
    }
}

/// Pulls the credential out of an upgrade request.
///
/// Accepts `Authorization: Token <key>` and falls back to a percent-encoded
/// `token` query parameter for browser clients that cannot set headers.
pub fn extract_token(request: &Request) -> Option<String> {
    let from_header = request
        .headers()
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Token "))
        .map(str::trim)
        .filter(|token| !token.is_empty());
    if let Some(token) = from_header {
        return Some(token.to_string());
    }

    request.uri().query().and_then(|query| {
        query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(key, _)| *key == "token")
            .and_then(|(_, value)| percent_decode_str(value).decode_utf8().ok())
            .map(|token| token.into_owned())
            .filter(|token| !token.is_empty())
    })
}

/// Extracts and validates the request's credential.
pub fn authenticate_request(authenticator: &dyn Authenticator, request: &Request) -> Option<Identity> {
    extract_token(request).and_then(|token| authenticator.authenticate(&token))
}

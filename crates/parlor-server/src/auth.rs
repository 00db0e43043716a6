//! Identity resolution.
//!
//! Credentials are checked by the auth layer in front of this server, which
//! forwards the authenticated username in a trusted header. Anything without
//! a usable header value is a guest.

use std::convert::Infallible;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderName};
use parlor_shared::constants::MAX_IDENTITY_LEN;
use parlor_shared::Identity;

use crate::api::AppState;

/// Extractor yielding the caller's identity, never failing.
#[derive(Debug, Clone)]
pub struct ResolvedIdentity(pub Identity);

#[async_trait]
impl FromRequestParts<AppState> for ResolvedIdentity {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        Ok(Self(resolve_identity(
            &parts.headers,
            &state.config.identity_header,
        )))
    }
}

pub fn resolve_identity(headers: &HeaderMap, header: &HeaderName) -> Identity {
    headers
        .get(header)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|name| is_valid_username(name))
        .map(Identity::user)
        .unwrap_or_else(Identity::guest)
}

fn is_valid_username(name: &str) -> bool {
    !name.is_empty()
        && name.chars().count() <= MAX_IDENTITY_LEN
        && !name.chars().any(char::is_control)
}

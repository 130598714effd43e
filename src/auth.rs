//! Viewer Authentication
//!
//! Credential validation belongs to the platform's auth service. The
//! notification layer only needs "who is this request", so it goes
//! through [`IdentityResolver`]. [`StaticTokenResolver`] maps bearer
//! tokens from configuration to identities.

use async_trait::async_trait;
use axum::http::{header::AUTHORIZATION, HeaderMap};
use serde::Deserialize;
use std::collections::HashMap;
use thiserror::Error;

use crate::permission::{Favorite, Identity, Role};

/// Authentication errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing credentials")]
    MissingCredentials,

    #[error("Invalid credentials")]
    InvalidCredentials,
}

/// Resolves the identity behind an upgrade request
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, headers: &HeaderMap) -> Result<Identity, AuthError>;
}

/// A bearer token and the identity it authenticates, as written in configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TokenIdentity {
    pub token: String,
    pub username: String,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub favorites: Vec<Favorite>,
}

/// Resolves `Authorization: Bearer <token>` against a fixed token table
#[derive(Debug, Clone, Default)]
pub struct StaticTokenResolver {
    tokens: HashMap<String, Identity>,
}

impl StaticTokenResolver {
    pub fn new(entries: Vec<TokenIdentity>) -> Self {
        let tokens = entries
            .into_iter()
            .map(|entry| {
                let identity = Identity {
                    username: entry.username,
                    groups: entry.groups,
                    role: entry.role,
                    favorites: entry.favorites,
                };
                (entry.token, identity)
            })
            .collect();
        Self { tokens }
    }
}

/// Extract the token from an `Authorization: Bearer` header
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[async_trait]
impl IdentityResolver for StaticTokenResolver {
    async fn resolve(&self, headers: &HeaderMap) -> Result<Identity, AuthError> {
        let token = bearer_token(headers).ok_or(AuthError::MissingCredentials)?;
        self.tokens
            .get(token)
            .cloned()
            .ok_or(AuthError::InvalidCredentials)
    }
}

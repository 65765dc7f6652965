use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context as _, Result};
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use serde::Deserialize;

use super::AppState;
use super::error::ApiError;
use crate::order::OrderError;

/// Resolves a bearer token to the address it acts for.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, token: &str) -> Option<String>;
}

/// Static `token -> address` table read from a JSON object.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct TokenTable {
    tokens: HashMap<String, String>,
}

impl TokenTable {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read tokens {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parse tokens {}", path.display()))
    }

    pub fn insert(&mut self, token: impl Into<String>, address: impl Into<String>) {
        self.tokens.insert(token.into(), address.into());
    }
}

impl Authenticator for TokenTable {
    fn authenticate(&self, token: &str) -> Option<String> {
        self.tokens.get(token).cloned()
    }
}

/// The authenticated address of a request.
#[derive(Debug, Clone)]
pub struct Caller(pub String);

#[async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| OrderError::Unauthorized("missing bearer token".to_string()))?;
        let token = header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| OrderError::Unauthorized("malformed authorization header".to_string()))?;
        let address = state
            .auth
            .authenticate(token)
            .ok_or_else(|| OrderError::Unauthorized("unknown token".to_string()))?;
        Ok(Caller(address))
    }
}

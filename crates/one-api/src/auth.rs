//! Bearer-token authentication.
//!
//! Every request resolves to a typed [`Caller`]. A request without an
//! `Authorization` header is anonymous; a header that is malformed or
//! carries an unknown token is rejected outright.

use std::collections::BTreeMap;

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use one_core::config::AuthConfig;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::ApiState;
use crate::error::ApiError;

/// Subject reported for callers when authentication is disabled.
pub const OPEN_SUBJECT: &str = "anonymous";

/// Who is calling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    Authenticated { subject: String },
    Anonymous,
}

impl Caller {
    /// The caller's subject, or 401 for anonymous callers.
    pub fn require(&self) -> Result<&str, ApiError> {
        match self {
            Self::Authenticated { subject } => Ok(subject.as_str()),
            Self::Anonymous => Err(AuthError::MissingToken.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("authentication required")]
    MissingToken,

    #[error("authorization header is not a bearer token")]
    Malformed,

    #[error("unknown bearer token")]
    UnknownToken,
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        ApiError::new(StatusCode::UNAUTHORIZED, e.to_string())
    }
}

#[derive(Debug, Clone)]
enum Mode {
    Open,
    /// (subject, token) pairs.
    Tokens(Vec<(String, String)>),
}

/// Resolves request headers to a [`Caller`].
#[derive(Debug, Clone)]
pub struct Authenticator {
    mode: Mode,
}

impl Authenticator {
    pub fn from_config(config: &AuthConfig) -> Self {
        let mode = match config {
            AuthConfig::None => Mode::Open,
            AuthConfig::Tokens { tokens } => Mode::Tokens(
                tokens
                    .iter()
                    .map(|(subject, token)| (subject.clone(), token.clone()))
                    .collect(),
            ),
        };
        Self { mode }
    }

    /// Authenticator accepting the given subject → token pairs.
    pub fn with_tokens(tokens: BTreeMap<String, String>) -> Self {
        Self::from_config(&AuthConfig::Tokens { tokens })
    }

    pub fn open() -> Self {
        Self { mode: Mode::Open }
    }

    pub fn identify(&self, headers: &HeaderMap) -> Result<Caller, AuthError> {
        let tokens = match &self.mode {
            Mode::Open => {
                return Ok(Caller::Authenticated {
                    subject: OPEN_SUBJECT.to_string(),
                });
            }
            Mode::Tokens(tokens) => tokens,
        };

        let Some(value) = headers.get(AUTHORIZATION) else {
            return Ok(Caller::Anonymous);
        };
        let presented = value
            .to_str()
            .ok()
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::Malformed)?;

        // Compare against every token so timing does not reveal which matched.
        let mut matched = None;
        for (subject, token) in tokens {
            if bool::from(presented.as_bytes().ct_eq(token.as_bytes())) {
                matched = Some(subject);
            }
        }
        matched
            .map(|subject| Caller::Authenticated {
                subject: subject.clone(),
            })
            .ok_or(AuthError::UnknownToken)
    }
}

impl FromRequestParts<ApiState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &ApiState) -> Result<Self, Self::Rejection> {
        Ok(state.auth.identify(&parts.headers)?)
    }
}

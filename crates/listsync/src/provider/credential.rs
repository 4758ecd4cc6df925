//! Credentials for authenticated page fetches.
//!
//! Handshakes (OAuth client credentials and friends) live outside this crate;
//! the engine only needs something that hands out a credential and can be
//! asked for a fresh one after a 401.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::http::HttpRequest;

/// Errors obtaining a credential.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    #[error("credential unavailable: {0}")]
    Unavailable(String),

    #[error("credential rejected: {0}")]
    Rejected(String),
}

/// How a request is authenticated.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    None,
    Bearer(String),
    Basic { username: String, password: String },
    /// Token sent as a query parameter (`?access_token=...`).
    QueryParam { name: String, value: String },
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::None => f.write_str("None"),
            Credential::Bearer(_) => f.write_str("Bearer(***)"),
            Credential::Basic { username, .. } => write!(f, "Basic({username}:***)"),
            Credential::QueryParam { name, .. } => write!(f, "QueryParam({name}=***)"),
        }
    }
}

impl Credential {
    /// Attach this credential to an outgoing request.
    pub fn apply(&self, request: &mut HttpRequest) {
        match self {
            Credential::None => {}
            Credential::Bearer(token) => request
                .headers
                .push(("Authorization".to_string(), format!("Bearer {token}"))),
            Credential::Basic { username, password } => {
                let encoded = STANDARD.encode(format!("{username}:{password}"));
                request
                    .headers
                    .push(("Authorization".to_string(), format!("Basic {encoded}")));
            }
            Credential::QueryParam { name, value } => {
                let separator = if request.url.contains('?') { '&' } else { '?' };
                request.url = format!(
                    "{}{}{}={}",
                    request.url,
                    separator,
                    name,
                    urlencoding::encode(value)
                );
            }
        }
    }
}

/// Source of credentials for one provider.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Current credential.
    async fn credential(&self) -> Result<Credential, AuthError>;

    /// A fresh credential after the provider rejected the current one.
    async fn refresh(&self) -> Result<Credential, AuthError> {
        self.credential().await
    }
}

/// Serde view of a statically configured credential.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CredentialConfig {
    #[default]
    None,
    Bearer {
        token: String,
    },
    Basic {
        username: String,
        password: String,
    },
    Query {
        #[serde(default = "default_token_param")]
        param: String,
        token: String,
    },
}

fn default_token_param() -> String {
    "access_token".to_string()
}

impl From<CredentialConfig> for Credential {
    fn from(config: CredentialConfig) -> Self {
        match config {
            CredentialConfig::None => Credential::None,
            CredentialConfig::Bearer { token } => Credential::Bearer(token),
            CredentialConfig::Basic { username, password } => {
                Credential::Basic { username, password }
            }
            CredentialConfig::Query { param, token } => Credential::QueryParam {
                name: param,
                value: token,
            },
        }
    }
}

/// A credential that never changes. Refreshing returns the same value.
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    credential: Credential,
}

impl StaticCredentials {
    pub fn new(credential: Credential) -> Self {
        Self { credential }
    }
}

impl From<CredentialConfig> for StaticCredentials {
    fn from(config: CredentialConfig) -> Self {
        Self::new(config.into())
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn credential(&self) -> Result<Credential, AuthError> {
        Ok(self.credential.clone())
    }
}

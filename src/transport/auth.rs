use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{AuthConfig, JwtAlgorithm};

pub const DEFAULT_TOKEN_EXPIRY: Duration = Duration::from_secs(5 * 60);

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Could not read {path}: {source}")]
    ReadKey {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not parse {algorithm} private key: {message}")]
    ParseKey { algorithm: String, message: String },

    #[error("Could not create the signed token: {0}")]
    Sign(String),

    #[error("Incomplete auth configuration")]
    Incomplete,
}

/// Source of bearer tokens attached to outbound calls.
pub trait TokenSource: Send + Sync {
    fn token(&self) -> Result<String, AuthError>;
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
}

/// Signs a fresh short-lived JWT for every call.
pub struct JwtTokenSource {
    algorithm: Algorithm,
    key: EncodingKey,
    issuer: String,
    expiry: Duration,
}

impl JwtTokenSource {
    pub fn new(
        algorithm: JwtAlgorithm,
        private_key_path: &Path,
        issuer_key_path: &Path,
        expiry: Duration,
    ) -> Result<Self, AuthError> {
        let pem = std::fs::read(private_key_path).map_err(|source| AuthError::ReadKey {
            path: private_key_path.display().to_string(),
            source,
        })?;
        let issuer = std::fs::read_to_string(issuer_key_path).map_err(|source| {
            AuthError::ReadKey {
                path: issuer_key_path.display().to_string(),
                source,
            }
        })?;

        let (algorithm, key) = match algorithm {
            JwtAlgorithm::Es256 => (Algorithm::ES256, EncodingKey::from_ec_pem(&pem)),
            JwtAlgorithm::Rs256 => (Algorithm::RS256, EncodingKey::from_rsa_pem(&pem)),
        };
        let key = key.map_err(|e| AuthError::ParseKey {
            algorithm: format!("{:?}", algorithm),
            message: e.to_string(),
        })?;

        Ok(Self {
            algorithm,
            key,
            issuer: issuer.trim().to_string(),
            expiry,
        })
    }

    /// Build a token source from config, or `None` when auth is disabled.
    pub fn from_config(config: &AuthConfig) -> Result<Option<Self>, AuthError> {
        if !config.enabled {
            return Ok(None);
        }
        if !config.is_complete() {
            return Err(AuthError::Incomplete);
        }
        match (&config.private_key_path, &config.issuer_key_path) {
            (Some(private_key), Some(issuer_key)) => Ok(Some(Self::new(
                config.algorithm,
                private_key,
                issuer_key,
                config.expiry,
            )?)),
            _ => Err(AuthError::Incomplete),
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }
}

impl TokenSource for JwtTokenSource {
    fn token(&self) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            iss: self.issuer.clone(),
            iat: now,
            nbf: now,
            exp: now + self.expiry.as_secs() as i64,
        };
        encode(&Header::new(self.algorithm), &claims, &self.key)
            .map_err(|e| AuthError::Sign(e.to_string()))
    }
}

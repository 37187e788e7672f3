//! Credential minting for the operator binary and tests.

use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{Map, Value};
use std::fmt;
use std::time::Duration;

use super::claims::{Audience, Claims};
use super::validator::hmac_algorithm;
use crate::types::{AuthConfig, Error, Result, TargetId};

const MIN_TTL: Duration = Duration::from_secs(3600);
const MAX_TTL: Duration = Duration::from_secs(24 * 3600);

/// Mints HMAC-signed credentials matching what [`super::ClaimsValidator`]
/// expects under the same [`AuthConfig`].
#[derive(Clone)]
pub struct TokenIssuer {
    config: AuthConfig,
    algorithm: Algorithm,
}

impl fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("algorithm", &self.algorithm)
            .field("issuer", &self.config.expected_issuer)
            .finish_non_exhaustive()
    }
}

impl TokenIssuer {
    pub fn new(config: AuthConfig) -> Result<Self> {
        let algorithm = hmac_algorithm(&config.algorithm)?;
        if config.secret.is_empty() {
            return Err(Error::config("credential secret cannot be empty"));
        }
        Ok(Self { config, algorithm })
    }

    /// Claim set for `target` with the configured issuer, subject and
    /// audience. `ttl` is clamped to 1..=24 hours.
    pub fn claims_for<S: AsRef<str>>(
        &self,
        target: &TargetId,
        permissions: &[S],
        ttl: Duration,
    ) -> Claims {
        let ttl = ttl.clamp(MIN_TTL, MAX_TTL);
        let now = Utc::now().timestamp();
        Claims {
            iss: self.config.expected_issuer.clone(),
            sub: self.config.expected_subject.clone(),
            aud: Audience::One(self.config.required_audience.clone()),
            exp: now + ttl.as_secs() as i64,
            iat: now,
            nbf: now,
            jti: uuid::Uuid::new_v4().to_string(),
            target_id: target.to_string(),
            permissions: permissions.iter().map(|p| p.as_ref().to_string()).collect(),
            extra: Map::new(),
        }
    }

    /// One-hour credential for `target`.
    pub fn issue<S: AsRef<str>>(&self, target: &TargetId, permissions: &[S]) -> Result<String> {
        self.sign(&self.claims_for(target, permissions, MIN_TTL))
    }

    /// Credential carrying the task id, for tracing it back to the workflow.
    pub fn issue_for_task<S: AsRef<str>>(
        &self,
        target: &TargetId,
        task_id: &str,
        permissions: &[S],
        ttl: Duration,
    ) -> Result<String> {
        let mut claims = self.claims_for(target, permissions, ttl);
        claims
            .extra
            .insert("tarea_id".to_string(), Value::String(task_id.to_string()));
        self.sign(&claims)
    }

    /// Sign an arbitrary claim set.
    pub fn sign(&self, claims: &Claims) -> Result<String> {
        let key = EncodingKey::from_secret(self.config.secret.as_bytes());
        encode(&Header::new(self.algorithm), claims, &key)
            .map_err(|e| Error::internal(format!("failed to sign credential: {}", e)))
    }
}

//! Bearer credential validation.
//!
//! Checks run in a fixed order and the first failure wins:
//! signature/structure, expiry, not-before, claim completeness, issuer,
//! subject, audience, bound record, permissions.

use chrono::Utc;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use super::claims::{AuthorizationContext, Claims};
use crate::types::{AuthConfig, Error, ErrorCode, Result, TargetId};

/// Stateless claims validator bound to one auth configuration.
#[derive(Clone)]
pub struct ClaimsValidator {
    config: AuthConfig,
    algorithm: Algorithm,
}

impl fmt::Debug for ClaimsValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClaimsValidator")
            .field("algorithm", &self.algorithm)
            .field("expected_issuer", &self.config.expected_issuer)
            .field("expected_subject", &self.config.expected_subject)
            .field("required_audience", &self.config.required_audience)
            .finish_non_exhaustive()
    }
}

impl ClaimsValidator {
    pub fn new(config: AuthConfig) -> Result<Self> {
        let algorithm = hmac_algorithm(&config.algorithm)?;
        if config.secret.is_empty() {
            return Err(Error::config("credential secret cannot be empty"));
        }
        Ok(Self { config, algorithm })
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Validate `token` for access to `expected_target`.
    ///
    /// `required_permissions` may be empty, in which case the permission
    /// check is skipped.
    pub fn validate<S: AsRef<str>>(
        &self,
        token: &str,
        expected_target: &TargetId,
        required_permissions: &[S],
    ) -> Result<AuthorizationContext> {
        self.validate_at(
            token,
            expected_target,
            required_permissions,
            Utc::now().timestamp(),
        )
    }

    /// [`ClaimsValidator::validate`] against an explicit clock.
    pub fn validate_at<S: AsRef<str>>(
        &self,
        token: &str,
        expected_target: &TargetId,
        required_permissions: &[S],
        now: i64,
    ) -> Result<AuthorizationContext> {
        let raw = self.decode_raw(token)?;
        let leeway = i64::try_from(self.config.leeway.as_secs()).unwrap_or(i64::MAX);

        // Time checks run before completeness so that an expired token is
        // reported as expired even when other claims are broken.
        if let Some(exp) = numeric_claim(&raw, "exp")? {
            if now > exp.saturating_add(leeway) {
                return Err(Error::auth(
                    ErrorCode::AuthTokenExpired,
                    "credential expired",
                    format!("exp={} now={}", exp, now),
                ));
            }
        }
        if let Some(nbf) = numeric_claim(&raw, "nbf")? {
            if now.saturating_add(leeway) < nbf {
                return Err(Error::auth(
                    ErrorCode::AuthTokenNotYetValid,
                    "credential not yet valid",
                    format!("nbf={} now={}", nbf, now),
                ));
            }
        }

        let claims: Claims = serde_json::from_value(Value::Object(raw)).map_err(|e| {
            Error::auth(
                ErrorCode::AuthInvalidToken,
                "incomplete or malformed claims",
                e.to_string(),
            )
        })?;

        if claims.iss != self.config.expected_issuer {
            return Err(Error::auth(
                ErrorCode::AuthPermissionDenied,
                format!(
                    "wrong issuer: expected '{}', got '{}'",
                    self.config.expected_issuer, claims.iss
                ),
                "credential was not issued by the authorized workflow engine",
            ));
        }

        if claims.sub != self.config.expected_subject {
            return Err(Error::auth(
                ErrorCode::AuthPermissionDenied,
                format!(
                    "wrong subject: expected '{}', got '{}'",
                    self.config.expected_subject, claims.sub
                ),
                "credential is not scoped to automated execution",
            ));
        }

        if !claims.aud.contains(&self.config.required_audience) {
            return Err(Error::auth(
                ErrorCode::AuthPermissionDenied,
                format!(
                    "wrong audience: must include '{}'",
                    self.config.required_audience
                ),
                format!("audiences received: {:?}", claims.aud.to_set()),
            ));
        }

        if claims.target_id != expected_target.as_str() {
            return Err(Error::auth(
                ErrorCode::AuthExpedienteMismatch,
                "credential not valid for the requested record",
                format!(
                    "credential bound to '{}', requested '{}'",
                    claims.target_id, expected_target
                ),
            ));
        }

        let missing: Vec<&str> = required_permissions
            .iter()
            .map(AsRef::as_ref)
            .filter(|p| !claims.permissions.iter().any(|g| g == p))
            .collect();
        if !missing.is_empty() {
            return Err(Error::auth(
                ErrorCode::AuthInsufficientPermissions,
                format!("insufficient permissions: missing {}", missing.join(", ")),
                format!(
                    "required: [{}], granted: [{}]",
                    required_permissions
                        .iter()
                        .map(AsRef::as_ref)
                        .collect::<Vec<_>>()
                        .join(", "),
                    claims.permissions.join(", ")
                ),
            ));
        }

        Ok(AuthorizationContext::from_claims(
            claims,
            expected_target.clone(),
        ))
    }

    /// Signature and structural decode only.
    fn decode_raw(&self, token: &str) -> Result<Map<String, Value>> {
        let mut validation = Validation::new(self.algorithm);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let key = DecodingKey::from_secret(self.config.secret.as_bytes());
        decode::<Map<String, Value>>(token, &key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                Error::auth(
                    ErrorCode::AuthInvalidToken,
                    "invalid or malformed credential",
                    e.to_string(),
                )
            })
    }
}

/// Parse an HMAC algorithm name.
pub(crate) fn hmac_algorithm(name: &str) -> Result<Algorithm> {
    let algorithm = Algorithm::from_str(name)
        .map_err(|_| Error::config(format!("unknown signature algorithm: {}", name)))?;
    match algorithm {
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => Ok(algorithm),
        other => Err(Error::config(format!(
            "unsupported signature algorithm {:?}: only shared-secret HMAC is supported",
            other
        ))),
    }
}

/// A present timestamp claim must be numeric.
fn numeric_claim(raw: &Map<String, Value>, name: &str) -> Result<Option<i64>> {
    match raw.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_i64()
            .or_else(|| value.as_f64().map(|f| f as i64))
            .map(Some)
            .ok_or_else(|| {
                Error::auth(
                    ErrorCode::AuthInvalidToken,
                    "invalid or malformed credential",
                    format!("claim '{}' is not a timestamp", name),
                )
            }),
    }
}

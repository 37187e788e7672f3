//! Credential claim set and the authorization context derived from it.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

use crate::types::TargetId;

/// Audience claim: a single value or a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    pub fn contains(&self, audience: &str) -> bool {
        match self {
            Audience::One(a) => a == audience,
            Audience::Many(list) => list.iter().any(|a| a == audience),
        }
    }

    pub fn to_set(&self) -> BTreeSet<String> {
        match self {
            Audience::One(a) => BTreeSet::from([a.clone()]),
            Audience::Many(list) => list.iter().cloned().collect(),
        }
    }

    /// Encode one audience as a bare string, several as a list.
    pub fn from_list(mut audiences: Vec<String>) -> Self {
        if audiences.len() == 1 {
            Audience::One(audiences.remove(0))
        } else {
            Audience::Many(audiences)
        }
    }
}

/// Mandatory claim set. Unknown claims are preserved in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub sub: String,
    pub aud: Audience,
    pub exp: i64,
    pub iat: i64,
    pub nbf: i64,
    pub jti: String,
    /// Record the token is bound to.
    #[serde(rename = "exp_id")]
    pub target_id: String,
    #[serde(rename = "permisos")]
    pub permissions: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Verified, scoped view of a credential. The credential itself is not kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorizationContext {
    pub issuer: String,
    pub subject: String,
    pub audiences: BTreeSet<String>,
    pub not_before: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub issued_at: DateTime<Utc>,
    pub token_id: String,
    pub target_id: TargetId,
    pub permissions: BTreeSet<String>,
}

impl AuthorizationContext {
    pub(crate) fn from_claims(claims: Claims, target_id: TargetId) -> Self {
        Self {
            issuer: claims.iss,
            subject: claims.sub,
            audiences: claims.aud.to_set(),
            not_before: timestamp(claims.nbf),
            expires_at: timestamp(claims.exp),
            issued_at: timestamp(claims.iat),
            token_id: claims.jti,
            target_id,
            permissions: claims.permissions.into_iter().collect(),
        }
    }

    pub fn has_permission(&self, label: &str) -> bool {
        self.permissions.contains(label)
    }
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

//! Credential validation and permission derivation.
//!
//! A bearer credential is turned into an [`AuthorizationContext`] scoped to
//! exactly one target record. The [`OperationPolicy`] maps the operations a
//! task intends to call onto the permission labels the credential must carry.

mod claims;
mod issuer;
mod permissions;
mod validator;

pub use claims::{Audience, AuthorizationContext, Claims};
pub use issuer::TokenIssuer;
pub use permissions::OperationPolicy;
pub use validator::ClaimsValidator;

//! Strongly-typed identifiers.
//!
//! All IDs are validated at construction time and implement common traits.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Macro to define a strongly-typed ID newtype wrapper.
///
/// Generates: struct, `from_string()`, `as_str()`, Display, Serialize, Deserialize.
macro_rules! define_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn from_string(s: String) -> Result<Self, &'static str> {
                if s.trim().is_empty() {
                    return Err(concat!(stringify!($name), " cannot be empty"));
                }
                Ok(Self(s))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_id!(RunId);
define_id!(TargetId);
define_id!(TaskId);
define_id!(ServerId);

impl RunId {
    /// Generate a run id: `RUN-YYYYMMDD-HHMMSS-ffffff-xxxxxx`.
    ///
    /// The random suffix keeps ids unique across submissions that land in
    /// the same microsecond.
    pub fn generate() -> Self {
        let stamp = Utc::now().format("%Y%m%d-%H%M%S-%6f");
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("RUN-{}-{}", stamp, &suffix[..6]))
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::generate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_ids_rejected() {
        assert!(TargetId::from_string(String::new()).is_err());
        assert!(RunId::from_string("   ".to_string()).is_err());
        assert_eq!(TargetId::from_string("EXP-1".into()).unwrap().as_str(), "EXP-1");
    }

    #[test]
    fn test_generated_run_id_format() {
        let id = RunId::generate();
        let parts: Vec<&str> = id.as_str().split('-').collect();
        assert_eq!(parts[0], "RUN");
        assert_eq!(parts[1].len(), 8);
        assert_eq!(parts[2].len(), 6);
        assert_eq!(parts[3].len(), 6);
        assert_eq!(parts[4].len(), 6);
    }

    #[test]
    fn test_generated_run_ids_unique() {
        let ids: std::collections::HashSet<RunId> = (0..200).map(|_| RunId::generate()).collect();
        assert_eq!(ids.len(), 200);
    }

    #[test]
    fn test_serde_transparent() {
        let id = TargetId::from_string("EXP-2024-001".into()).unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"EXP-2024-001\"");
    }
}

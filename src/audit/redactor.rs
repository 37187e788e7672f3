//! Personal-data redaction.
//!
//! Every string that reaches the audit trail passes through [`redact`]. The
//! category patterns run in a fixed order: specific identity formats first,
//! generic digit runs last, so a loose pattern never consumes a more specific
//! match. Redaction never fails towards its caller; faults produce a
//! `[REDACTION-FAILED...]` sentinel instead of the input.

use regex::Regex;
use serde_json::Value;
use std::panic::{self, AssertUnwindSafe};
use std::sync::LazyLock;

/// Sentinel for a missing input.
pub const REDACTION_FAILED_NONE: &str = "[REDACTION-FAILED: None input]";
/// Sentinel for bytes that are not valid UTF-8.
pub const REDACTION_FAILED_ENCODING: &str = "[REDACTION-FAILED: invalid encoding]";
/// Sentinel for an internal fault during substitution.
pub const REDACTION_FAILED: &str = "[REDACTION-FAILED]";

/// One redaction category.
#[derive(Debug)]
struct PiiPattern {
    marker: String,
    regex: Regex,
}

/// Ordered category table. Order matters.
const CATEGORIES: &[(&str, &str)] = &[
    // National identity number: 8 digits + control letter
    ("DNI", r"\b\d{8}[A-Z]\b"),
    // Foreigner identity number
    ("NIE", r"\b[XYZ]\d{7}[A-Z]\b"),
    ("EMAIL", r"\b[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}\b"),
    // Landlines (8xx/9xx) before mobiles
    ("TELEFONO_FIJO", r"\b[89]\d{8}\b"),
    ("TELEFONO_MOVIL", r"\b[67]\d{8}\b"),
    ("IBAN", r"\bES\d{22}\b"),
    ("TARJETA", r"\b\d{4}[\s-]?\d{4}[\s-]?\d{4}[\s-]?\d{4}\b"),
    // Bank account code: 20 digits
    ("CCC", r"\b\d{20}\b"),
];

static PATTERNS: LazyLock<Result<Vec<PiiPattern>, regex::Error>> = LazyLock::new(|| {
    CATEGORIES
        .iter()
        .map(|(name, pattern)| {
            Ok(PiiPattern {
                marker: format!("[{}-REDACTED]", name),
                regex: Regex::new(pattern)?,
            })
        })
        .collect()
});

/// Marker substituted for a category, e.g. `[DNI-REDACTED]`.
pub fn marker_for(category: &str) -> String {
    format!("[{}-REDACTED]", category.to_uppercase())
}

fn apply_patterns(text: &str) -> Option<String> {
    let patterns = PATTERNS.as_ref().ok()?;
    let mut redacted = text.to_string();
    for pattern in patterns {
        if pattern.regex.is_match(&redacted) {
            redacted = pattern
                .regex
                .replace_all(&redacted, pattern.marker.as_str())
                .into_owned();
        }
    }
    Some(redacted)
}

/// Redact every personal-data match in `text`.
///
/// ```
/// use agentix_core::audit::redact;
///
/// assert_eq!(redact("DNI: 12345678A"), "DNI: [DNI-REDACTED]");
/// assert_eq!(redact("Email: juan@example.com"), "Email: [EMAIL-REDACTED]");
/// ```
pub fn redact(text: &str) -> String {
    match panic::catch_unwind(AssertUnwindSafe(|| apply_patterns(text))) {
        Ok(Some(redacted)) => redacted,
        Ok(None) | Err(_) => REDACTION_FAILED.to_string(),
    }
}

/// Redact an optional input; `None` yields the missing-input sentinel.
pub fn redact_opt(text: Option<&str>) -> String {
    match text {
        Some(text) => redact(text),
        None => REDACTION_FAILED_NONE.to_string(),
    }
}

/// Redact raw bytes; anything that is not UTF-8 yields the encoding sentinel.
pub fn redact_bytes(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => redact(text),
        Err(_) => REDACTION_FAILED_ENCODING.to_string(),
    }
}

/// Redact a dynamically typed value expected to be text.
///
/// Strings are redacted, `null` is treated as a missing input and any other
/// type yields `[REDACTION-FAILED: <type>]`.
pub fn redact_value_text(value: &Value) -> String {
    match value {
        Value::String(s) => redact(s),
        Value::Null => REDACTION_FAILED_NONE.to_string(),
        other => format!("[REDACTION-FAILED: {}]", json_type_name(other)),
    }
}

/// Redact every string inside a structured value, keys included.
pub fn redact_value(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(redact(s)),
        Value::Array(items) => Value::Array(items.iter().map(redact_value).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (redact(k), redact_value(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn json_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_dni() {
        assert_eq!(redact("id 12345678A"), "id [DNI-REDACTED]");
    }

    #[test]
    fn test_nie() {
        assert_eq!(redact("NIE X1234567L ok"), "NIE [NIE-REDACTED] ok");
    }

    #[test]
    fn test_email() {
        assert_eq!(
            redact("contacto: juan.perez+x@example.com."),
            "contacto: [EMAIL-REDACTED]."
        );
    }

    #[test]
    fn test_phones_split_by_prefix() {
        assert_eq!(redact("fijo 912345678"), "fijo [TELEFONO_FIJO-REDACTED]");
        assert_eq!(redact("movil 612345678"), "movil [TELEFONO_MOVIL-REDACTED]");
        assert_eq!(redact("otro 512345678"), "otro 512345678");
    }

    #[test]
    fn test_iban_and_ccc() {
        assert_eq!(
            redact("IBAN ES9121000418450200051332"),
            "IBAN [IBAN-REDACTED]"
        );
        assert_eq!(
            redact("CCC 21000418450200051332"),
            "CCC [CCC-REDACTED]"
        );
    }

    #[test]
    fn test_card_formats() {
        assert_eq!(redact("4111 1111 1111 1111"), "[TARJETA-REDACTED]");
        assert_eq!(redact("4111-1111-1111-1111"), "[TARJETA-REDACTED]");
        assert_eq!(redact("4111111111111111"), "[TARJETA-REDACTED]");
    }

    #[test]
    fn test_specific_before_generic() {
        // A DNI must not be eaten by a looser digit pattern.
        let out = redact("12345678Z y 4111111111111111");
        assert_eq!(out, "[DNI-REDACTED] y [TARJETA-REDACTED]");
    }

    #[test]
    fn test_clean_text_untouched() {
        let text = "Expediente EXP-2024-001 validado en 3 pasos";
        assert_eq!(redact(text), text);
    }

    #[test]
    fn test_sentinels() {
        assert_eq!(redact_opt(None), REDACTION_FAILED_NONE);
        assert_eq!(redact_opt(Some("a@b.com")), "[EMAIL-REDACTED]");
        assert_eq!(redact_bytes(&[0xff, 0xfe, 0x00]), REDACTION_FAILED_ENCODING);
        assert_eq!(redact_bytes(b"12345678A"), "[DNI-REDACTED]");
        assert_eq!(redact_value_text(&json!(42)), "[REDACTION-FAILED: number]");
        assert_eq!(redact_value_text(&json!([1])), "[REDACTION-FAILED: list]");
        assert_eq!(redact_value_text(&Value::Null), REDACTION_FAILED_NONE);
    }

    #[test]
    fn test_redact_value_recurses() {
        let value = json!({
            "email": "juan@example.com",
            "nested": {"dni": ["12345678A", 7]},
            "ok": true
        });
        let out = redact_value(&value);
        assert_eq!(out["email"], "[EMAIL-REDACTED]");
        assert_eq!(out["nested"]["dni"][0], "[DNI-REDACTED]");
        assert_eq!(out["nested"]["dni"][1], 7);
        assert_eq!(out["ok"], true);
    }

    #[test]
    fn test_marker_for() {
        assert_eq!(marker_for("dni"), "[DNI-REDACTED]");
    }

    fn fragment() -> impl Strategy<Value = String> {
        prop_oneof![
            "[a-z]{1,8}",
            "[0-9]{8}[A-Z]",
            "[XYZ][0-9]{7}[A-Z]",
            "[a-z]{1,6}@[a-z]{1,6}\\.(com|es|org)",
            "[6-9][0-9]{8}",
            "ES[0-9]{22}",
            "[0-9]{4}[ -]?[0-9]{4}[ -]?[0-9]{4}[ -]?[0-9]{4}",
            "[0-9]{20}",
            "[0-9]{1,5}",
        ]
    }

    proptest! {
        #[test]
        fn test_redaction_is_idempotent(parts in prop::collection::vec(fragment(), 0..12)) {
            let text = parts.join(" ");
            let once = redact(&text);
            let twice = redact(&once);
            prop_assert_eq!(once, twice);
        }
    }
}

//! Built-in task: check that a case file carries its mandatory documents.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeSet;

use super::{Payload, TaskBody, TaskContext};
use crate::types::{Error, ErrorCode, Result};

const READ_RECORD: &str = "consultar_expediente";
const UPDATE_FIELD: &str = "actualizar_datos";
const ANNOTATE: &str = "añadir_anotacion";

/// Field written with the validation outcome.
pub const VALIDITY_FIELD: &str = "datos.documentacion_valida";

/// Reads the target record, checks the required document kinds, writes the
/// validity flag and appends an annotation to the record's history.
///
/// The required kinds can be overridden per run with the
/// `documentos_requeridos` parameter.
#[derive(Debug, Clone)]
pub struct DocumentValidator {
    required_kinds: Vec<String>,
}

impl Default for DocumentValidator {
    fn default() -> Self {
        Self {
            required_kinds: ["SOLICITUD", "IDENTIFICACION", "BANCARIO"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl DocumentValidator {
    pub const NAME: &'static str = "ValidadorDocumental";

    /// Operations this body calls, for task configurations.
    pub const CAPABILITIES: [&'static str; 3] = [READ_RECORD, UPDATE_FIELD, ANNOTATE];

    pub fn with_required_kinds<S: AsRef<str>>(kinds: &[S]) -> Self {
        Self {
            required_kinds: kinds.iter().map(|k| k.as_ref().to_string()).collect(),
        }
    }

    fn required_for(&self, ctx: &TaskContext<'_>) -> Vec<String> {
        match ctx.parameter("documentos_requeridos").and_then(Value::as_array) {
            Some(kinds) => kinds
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            None => self.required_kinds.clone(),
        }
    }
}

#[async_trait]
impl TaskBody for DocumentValidator {
    async fn execute(&self, ctx: &mut TaskContext<'_>) -> Result<Payload> {
        let target = ctx.target_id().to_string();
        ctx.log("starting document validation");

        ctx.log(format!("reading record {}", target));
        let result = ctx
            .call(READ_RECORD, json!({"expediente_id": target}))
            .await?;
        let record = record_body(&result)?;

        let present: BTreeSet<String> = record
            .get("documentos")
            .and_then(Value::as_array)
            .map(|docs| {
                docs.iter()
                    .filter_map(|d| d.get("tipo").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        ctx.log(format!("documents found: {}", present.len()));

        let missing: Vec<String> = self
            .required_for(ctx)
            .into_iter()
            .filter(|kind| !present.contains(kind))
            .collect();
        let valid = missing.is_empty();
        if valid {
            ctx.log("all required documents present");
        } else {
            ctx.log(format!("missing documents: {}", missing.join(", ")));
        }

        ctx.log(format!("setting {} = {}", VALIDITY_FIELD, valid));
        ctx.call(
            UPDATE_FIELD,
            json!({"expediente_id": target, "campo": VALIDITY_FIELD, "valor": valid}),
        )
        .await?;

        let note = if valid {
            "documentation validated"
        } else {
            "documentation incomplete"
        };
        ctx.log(format!("annotating record history: {}", note));
        ctx.call(ANNOTATE, json!({"expediente_id": target, "texto": note}))
            .await?;

        let mut payload = Payload::new();
        payload.insert("completado".into(), json!(true));
        payload.insert("mensaje".into(), json!(note));
        payload.insert("datos_actualizados".into(), json!({ VALIDITY_FIELD: valid }));
        payload.insert("documentos_faltantes".into(), json!(missing));
        Ok(payload)
    }
}

/// Record JSON from a `consultar_expediente` result.
///
/// Servers wrap it as `{"content": [{"type": "text", "text": "<json>"}]}`;
/// a bare record object is accepted as well.
fn record_body(result: &Value) -> Result<Value> {
    let Some(first) = result
        .get("content")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
    else {
        return Ok(result.clone());
    };
    match first.get("text") {
        Some(Value::String(text)) => serde_json::from_str(text).map_err(|e| {
            Error::tool(
                ErrorCode::ToolError,
                "record content is not valid JSON",
                e.to_string(),
            )
        }),
        Some(other) => Ok(other.clone()),
        None => Ok(first.clone()),
    }
}

//! Permission labels required by an operation list.
//!
//! Read-only operations need the read label; mutating operations need the
//! write label, and write implies read. Operations in neither set add
//! nothing.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Operation → permission classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationPolicy {
    pub read_label: String,
    pub write_label: String,
    pub read_operations: BTreeSet<String>,
    pub write_operations: BTreeSet<String>,
}

impl Default for OperationPolicy {
    fn default() -> Self {
        Self {
            read_label: "consulta".to_string(),
            write_label: "gestion".to_string(),
            read_operations: ["consultar_expediente", "listar_documentos", "leer_documento"]
                .into_iter()
                .map(String::from)
                .collect(),
            write_operations: [
                "actualizar_datos",
                "añadir_anotacion",
                "subir_documento",
                "actualizar_estado",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

impl OperationPolicy {
    pub fn is_read(&self, operation: &str) -> bool {
        self.read_operations.contains(operation)
    }

    pub fn is_write(&self, operation: &str) -> bool {
        self.write_operations.contains(operation)
    }

    /// Labels a credential must carry to invoke every operation listed.
    /// Sorted and deduplicated.
    pub fn required_permissions<S: AsRef<str>>(&self, operations: &[S]) -> Vec<String> {
        let mut labels = BTreeSet::new();
        for op in operations {
            let op = op.as_ref();
            if self.is_write(op) {
                labels.insert(self.write_label.clone());
                labels.insert(self.read_label.clone());
            } else if self.is_read(op) {
                labels.insert(self.read_label.clone());
            }
        }
        labels.into_iter().collect()
    }
}

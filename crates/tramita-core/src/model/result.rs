//! DTOs de resultado devueltos por el engine y por las consultas del store.

use serde::{Deserialize, Serialize};

/// Próximo nodo pendiente materializado por un avance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NextNode {
    pub node_id: String,
    pub node_code: String,
    pub node_name: String,
    pub node_instance_id: String,
    pub candidate_ids: Vec<String>,
}

/// Resultado de `start_flow` / `handle_flow`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HandleResult {
    pub is_end: bool,
    pub flow_instance_id: Option<String>,
    pub next_nodes: Vec<NextNode>,
}

impl std::fmt::Display for HandleResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match serde_json::to_string(self) {
            Ok(s) => f.write_str(&s),
            Err(_) => write!(f, "{self:?}"),
        }
    }
}

/// Fila de la consulta de pendientes: instancia de nodo unida a su instancia
/// de flujo, nodo y formulario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoItem {
    /// `record_id` de la instancia de nodo pendiente.
    pub record_id: String,
    pub flow_instance_id: String,
    pub node_id: String,
    pub node_code: String,
    pub node_name: String,
    pub input_data: Vec<u8>,
    pub form_type: Option<String>,
    pub form_data: Option<String>,
    pub launcher: String,
    pub launch_time: i64,
}

/// Fila de la consulta de historia de una instancia (solo userTask).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryItem {
    pub record_id: String,
    pub node_code: String,
    pub node_name: String,
    pub processor: Option<String>,
    pub process_time: Option<i64>,
    pub out_data: Vec<u8>,
    pub status: i16,
}

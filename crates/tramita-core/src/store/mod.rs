//! Contrato de persistencia del motor.
//!
//! Cada operación mutadora es una transacción: o se observa el estado nuevo
//! completo o ninguno. El store no aplica validación de negocio; sólo
//! chequeos referenciales y de forma. El motor habla únicamente contra este
//! trait; `MemoryFlowStore` lo implementa para tests y `PgFlowStore` (crate
//! `tramita-persistence`) para Postgres.

mod memory;

pub use memory::MemoryFlowStore;

use thiserror::Error;

use crate::model::{Flow, FlowInstance, HistoryItem, Node, NodeAssignment, NodeCandidate, NodeInstance, NodeRouter,
                   TodoItem};
use crate::parser::ParseResult;

/// Fallos del backend, ya clasificados. `Transient` es la única clase que el
/// llamador puede reintentar con sentido.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("transient io: {0}")]
    Transient(String),
    #[error("backend error: {0}")]
    Backend(String),
}

pub trait FlowStore: Send + Sync {
    // ---- lado definición -------------------------------------------------

    /// Inserta flujo + nodos + routers + asignaciones + formularios en una
    /// transacción. Si `supersede` trae el `record_id` de la versión vigente
    /// anterior, se marca `flag = 0` dentro de la misma transacción.
    fn create_flow(&self, graph: &ParseResult, supersede: Option<&str>) -> Result<(), StoreError>;

    /// Versión vigente instanciable: `flag=1 AND status=1`, mayor `version`.
    fn get_flow_by_code(&self, code: &str) -> Result<Option<Flow>, StoreError>;

    /// Última versión con `flag=1` sin importar `status`; la usa el loader
    /// para decidir el número de versión siguiente.
    fn get_latest_flow_by_code(&self, code: &str) -> Result<Option<Flow>, StoreError>;

    fn get_node(&self, record_id: &str) -> Result<Option<Node>, StoreError>;

    fn get_node_by_code(&self, flow_id: &str, code: &str) -> Result<Option<Node>, StoreError>;

    /// Aristas salientes de un nodo, en orden de documento.
    fn query_node_routers(&self, source_node_id: &str) -> Result<Vec<NodeRouter>, StoreError>;

    /// Aristas entrantes; el motor las usa para detectar joins.
    fn query_node_inflows(&self, target_node_id: &str) -> Result<Vec<NodeRouter>, StoreError>;

    fn query_node_assignments(&self, node_id: &str) -> Result<Vec<NodeAssignment>, StoreError>;

    /// Tombstone en cascada: flujo, nodos, routers, asignaciones, propiedades
    /// y formularios, todo en una transacción.
    fn delete_flow(&self, flow_id: &str) -> Result<(), StoreError>;

    // ---- lado ejecución --------------------------------------------------

    /// Inserta la instancia de flujo y sus instancias de nodo iniciales
    /// atómicamente.
    fn create_flow_instance(&self, instance: &FlowInstance, node_instances: &[NodeInstance])
                            -> Result<(), StoreError>;

    fn get_flow_instance(&self, record_id: &str) -> Result<Option<FlowInstance>, StoreError>;

    fn get_flow_instance_by_node(&self, node_instance_id: &str) -> Result<Option<FlowInstance>, StoreError>;

    fn update_flow_instance_status(&self, record_id: &str, status: i16) -> Result<(), StoreError>;

    /// Inserta una instancia de nodo con todos sus candidatos atómicamente.
    fn create_node_instance(&self, instance: &NodeInstance, candidates: &[NodeCandidate]) -> Result<(), StoreError>;

    fn get_node_instance(&self, record_id: &str) -> Result<Option<NodeInstance>, StoreError>;

    /// Transición pendiente→procesada como compare-and-set sobre
    /// `(record_id, status = 1)`. Devuelve `false` si la fila ya no estaba
    /// pendiente: el perdedor de una carrera de decisión ve `false`, nunca
    /// una fila a medio escribir.
    fn claim_node_instance(&self, record_id: &str, processor: &str, process_time: i64, out_data: &[u8])
                           -> Result<bool, StoreError>;

    /// Cancela una instancia pendiente (rama superada en un join).
    fn cancel_node_instance(&self, record_id: &str) -> Result<(), StoreError>;

    /// Todas las instancias de nodo de una instancia de flujo, en orden de
    /// inserción.
    fn query_node_instances(&self, flow_instance_id: &str) -> Result<Vec<NodeInstance>, StoreError>;

    fn query_node_candidates(&self, node_instance_id: &str) -> Result<Vec<NodeCandidate>, StoreError>;

    /// `true` sii queda alguna instancia de nodo con `status = 1`.
    fn check_flow_instance_todo(&self, flow_instance_id: &str) -> Result<bool, StoreError>;

    /// Pendientes de un usuario: instancia de nodo (status=1) ⋈ instancia de
    /// flujo (status=1) ⋈ nodo ⋈ formulario, filtrado por candidato y
    /// opcionalmente por código de flujo. Orden estable por id de inserción.
    fn query_todo(&self, flow_code: Option<&str>, user_id: &str) -> Result<Vec<TodoItem>, StoreError>;

    /// Historia de una instancia: sólo userTask, `ORDER BY status DESC,
    /// process_time ASC`.
    fn query_history(&self, flow_instance_id: &str) -> Result<Vec<HistoryItem>, StoreError>;
}

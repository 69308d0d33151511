//! Modelo de datos: filas de definición (Flow, Node, ...) y de ejecución
//! (FlowInstance, NodeInstance, NodeCandidate).
//!
//! Todas las entidades llevan el trío `record_id` / `created` / `deleted`:
//! identificador opaco único, timestamp unix de creación y tombstone
//! (0 = viva). Los stores filtran `deleted = 0` en toda consulta.

mod result;

pub use result::{HandleResult, HistoryItem, NextNode, TodoItem};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::*;

/// Genera un `record_id` nuevo (UUID v4 con guiones).
pub fn new_record_id() -> String {
    Uuid::new_v4().to_string()
}

/// Timestamp unix en segundos.
pub fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Tipos de nodo reconocidos por el runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeTypeCode {
    StartEvent,
    EndEvent,
    UserTask,
    ExclusiveGateway,
    InclusiveGateway,
    ParallelGateway,
}

impl NodeTypeCode {
    /// Decodifica el `type_code` textual persistido / del dialecto XML.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "startEvent" => Some(Self::StartEvent),
            "endEvent" => Some(Self::EndEvent),
            "userTask" => Some(Self::UserTask),
            "exclusiveGateway" => Some(Self::ExclusiveGateway),
            "inclusiveGateway" => Some(Self::InclusiveGateway),
            "parallelGateway" => Some(Self::ParallelGateway),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StartEvent => "startEvent",
            Self::EndEvent => "endEvent",
            Self::UserTask => "userTask",
            Self::ExclusiveGateway => "exclusiveGateway",
            Self::InclusiveGateway => "inclusiveGateway",
            Self::ParallelGateway => "parallelGateway",
        }
    }

    pub fn is_gateway(&self) -> bool {
        matches!(self,
                 Self::ExclusiveGateway | Self::InclusiveGateway | Self::ParallelGateway)
    }
}

impl std::fmt::Display for NodeTypeCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Definición de proceso versionada. Clave de negocio `code`; a lo sumo una
/// fila por `code` con `flag = 1` viva (invariante del loader).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub record_id: String,
    pub created: i64,
    pub deleted: i64,
    pub code: String,
    pub version: i64,
    pub name: String,
    pub type_code: String,
    pub status: i16,
    pub flag: i16,
    pub memo: String,
    /// blake3 hex de los bytes de la definición; el loader lo compara para
    /// decidir no-op vs nueva versión.
    pub content_hash: String,
}

/// Vértice dentro de un flujo.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub record_id: String,
    pub created: i64,
    pub deleted: i64,
    pub flow_id: String,
    pub code: String,
    pub name: String,
    pub type_code: NodeTypeCode,
    pub form_id: Option<String>,
    pub order_num: i64,
}

/// Arista dirigida con guarda opcional. Guarda vacía equivale a `true`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRouter {
    pub record_id: String,
    pub created: i64,
    pub deleted: i64,
    pub source_node_id: String,
    pub target_node_id: String,
    pub expression: String,
    pub explain: String,
}

/// Regla de resolución de candidatos de un `userTask`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeAssignment {
    pub record_id: String,
    pub created: i64,
    pub deleted: i64,
    pub node_id: String,
    pub expression: String,
}

/// Referencia de formulario: blob opaco con un `type_code` para el cliente.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Form {
    pub record_id: String,
    pub created: i64,
    pub deleted: i64,
    pub flow_id: String,
    pub type_code: String,
    pub data: String,
}

/// Proceso en ejecución.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowInstance {
    pub record_id: String,
    pub created: i64,
    pub deleted: i64,
    pub flow_id: String,
    pub launcher: String,
    pub launch_time: i64,
    pub status: i16,
}

impl FlowInstance {
    pub fn new(flow_id: &str, launcher: &str) -> Self {
        let ts = now_unix();
        Self { record_id: new_record_id(),
               created: ts,
               deleted: 0,
               flow_id: flow_id.to_string(),
               launcher: launcher.to_string(),
               launch_time: ts,
               status: FLOW_INSTANCE_RUNNING }
    }
}

/// Un paso dentro de un proceso en ejecución. Cada revisita de un nodo crea
/// una fila nueva; la historia se conserva vía `prev_node_instance_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInstance {
    pub record_id: String,
    pub created: i64,
    pub deleted: i64,
    pub flow_instance_id: String,
    pub node_id: String,
    pub prev_node_instance_id: Option<String>,
    pub input_data: Vec<u8>,
    pub out_data: Vec<u8>,
    pub processor: Option<String>,
    pub process_time: Option<i64>,
    pub status: i16,
}

impl NodeInstance {
    /// Instancia pendiente de decisión (userTask o join esperando ramas).
    pub fn pending(flow_instance_id: &str, node_id: &str, prev: Option<&str>, input_data: Vec<u8>) -> Self {
        Self { record_id: new_record_id(),
               created: now_unix(),
               deleted: 0,
               flow_instance_id: flow_instance_id.to_string(),
               node_id: node_id.to_string(),
               prev_node_instance_id: prev.map(str::to_string),
               input_data,
               out_data: Vec::new(),
               processor: None,
               process_time: None,
               status: NODE_INSTANCE_PENDING }
    }

    /// Instancia auto-procesada (start event, gateways, end event): nace con
    /// `status = 2` y procesador/hora/datos de salida ya fijados.
    pub fn processed(flow_instance_id: &str, node_id: &str, prev: Option<&str>, data: Vec<u8>, processor: &str) -> Self {
        let ts = now_unix();
        Self { record_id: new_record_id(),
               created: ts,
               deleted: 0,
               flow_instance_id: flow_instance_id.to_string(),
               node_id: node_id.to_string(),
               prev_node_instance_id: prev.map(str::to_string),
               input_data: data.clone(),
               out_data: data,
               processor: Some(processor.to_string()),
               process_time: Some(ts),
               status: NODE_INSTANCE_PROCESSED }
    }
}

/// Usuario habilitado para decidir sobre una instancia de nodo pendiente.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeCandidate {
    pub record_id: String,
    pub created: i64,
    pub deleted: i64,
    pub node_instance_id: String,
    pub candidate_id: String,
}

impl NodeCandidate {
    pub fn new(node_instance_id: &str, candidate_id: &str) -> Self {
        Self { record_id: new_record_id(),
               created: now_unix(),
               deleted: 0,
               node_instance_id: node_instance_id.to_string(),
               candidate_id: candidate_id.to_string() }
    }
}

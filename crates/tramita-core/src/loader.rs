//! Carga y versionado de definiciones.
//!
//! Normaliza el `ParseResult`, valida la topología y lo publica vía el store
//! en una unidad transaccional: la versión anterior pasa a `flag = 0` y la
//! nueva entra con `version = prev + 1, flag = 1, status = 1`. Recargar bytes
//! idénticos es un no-op (se compara el hash de contenido), así que un
//! proceso puede recargar sus definiciones en cada arranque sin acumular
//! versiones.

use log::{debug, info};

use crate::constants::{FLOW_FLAG_ACTIVE, FLOW_STATUS_ENABLED};
use crate::errors::EngineError;
use crate::hashing::hash_bytes;
use crate::model::{Flow, NodeTypeCode};
use crate::parser::{ParseResult, Parser};
use crate::store::FlowStore;

/// Parsea, valida y publica una definición. Devuelve la fila de flujo
/// vigente (la recién insertada, o la existente si el contenido no cambió).
pub fn load_definition(store: &dyn FlowStore, parser: &dyn Parser, data: &[u8]) -> Result<Flow, EngineError> {
    let mut graph = parser.parse(data)?;
    validate_topology(&graph)?;

    let content_hash = hash_bytes(data);
    let prev = store.get_latest_flow_by_code(&graph.flow.code)?;

    if let Some(prev) = &prev {
        if prev.content_hash == content_hash && prev.status == FLOW_STATUS_ENABLED {
            debug!("load {}: contenido idéntico a v{}, no-op", prev.code, prev.version);
            return Ok(prev.clone());
        }
    }

    graph.flow.version = prev.as_ref().map(|p| p.version + 1).unwrap_or(1);
    graph.flow.flag = FLOW_FLAG_ACTIVE;
    graph.flow.status = FLOW_STATUS_ENABLED;
    graph.flow.content_hash = content_hash;

    store.create_flow(&graph, prev.as_ref().map(|p| p.record_id.as_str()))?;
    info!("load {}: publicada v{} ({} nodos, {} routers)",
          graph.flow.code,
          graph.flow.version,
          graph.nodes.len(),
          graph.routers.len());
    Ok(graph.flow)
}

/// Chequeos de grafo que exceden la forma que ya garantiza el parser: al
/// menos un `endEvent`, y que el `startEvent` tenga salida (un flujo que no
/// puede avanzar del inicio es un error de autoría, no un caso de runtime).
fn validate_topology(graph: &ParseResult) -> Result<(), EngineError> {
    let ends = graph.nodes
                    .iter()
                    .filter(|n| n.type_code == NodeTypeCode::EndEvent)
                    .count();
    if ends == 0 {
        return Err(EngineError::MalformedDefinition(format!("flow {} has no endEvent", graph.flow.code)));
    }

    // Parsers alternativos pueden no cumplir el contrato del XmlParser, así
    // que el inicio único se re-verifica aquí.
    let start = graph.nodes
                     .iter()
                     .find(|n| n.type_code == NodeTypeCode::StartEvent)
                     .ok_or_else(|| EngineError::MalformedDefinition(format!("flow {} has no startEvent",
                                                                             graph.flow.code)))?;
    let start_has_out = graph.routers
                             .iter()
                             .any(|r| r.source_node_id == start.record_id);
    if !start_has_out {
        return Err(EngineError::MalformedDefinition(format!("startEvent {} has no outgoing flow", start.code)));
    }
    Ok(())
}

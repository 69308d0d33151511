//! Errores del motor.
//! Cada variante corresponde a una condición del contrato público; los fallos
//! del backend de persistencia llegan envueltos como `Store`.

use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum EngineError {
    /// El parser rechazó la definición; lleva el id del elemento ofensor.
    #[error("malformed definition: {0}")]
    MalformedDefinition(String),

    /// No existe versión vigente (`flag=1`, `status=1`) para el código.
    #[error("flow not found: {0}")]
    FlowNotFound(String),

    #[error("node not found: {0}")]
    NodeNotFound(String),

    /// Instancia inexistente, ya procesada, o perdió la carrera CAS.
    #[error("node instance not actionable: {0}")]
    NodeInstanceNotActionable(String),

    #[error("user {user_id} is not a candidate of node instance {node_instance_id}")]
    NotCandidate { node_instance_id: String, user_id: String },

    /// Gateway inclusivo sin ninguna guarda verdadera.
    #[error("no route satisfied from node {0}")]
    NoRouteSatisfied(String),

    /// La unión de asignaciones resolvió a cero candidatos.
    #[error("no candidate resolved for node {0}")]
    NoCandidate(String),

    #[error("expression eval error: {0}")]
    ExprEval(String),

    /// `input_data` que no decodifica como objeto JSON.
    #[error("invalid input data: {0}")]
    InvalidInput(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

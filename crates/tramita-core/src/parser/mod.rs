//! Parser de definiciones.
//!
//! El motor consume definiciones a través del trait `Parser`; el dialecto
//! concreto queda detrás de la seam. `XmlParser` cubre el dialecto BPMN del
//! proyecto; un parser alternativo sólo debe producir un `ParseResult`
//! equivalente (ids recién acuñados, claves foráneas resueltas).

mod xml;

pub use xml::XmlParser;

use crate::errors::EngineError;
use crate::model::{Flow, Form, Node, NodeAssignment, NodeRouter};

/// Salida normalizada del parser. `flow.version`, `flow.flag` y
/// `flow.content_hash` los completa el loader; el parser sólo aporta la
/// identidad (`code`, `name`, `type_code`) y el grafo.
#[derive(Debug, Clone)]
pub struct ParseResult {
    pub flow: Flow,
    pub nodes: Vec<Node>,
    pub routers: Vec<NodeRouter>,
    pub assignments: Vec<NodeAssignment>,
    pub forms: Vec<Form>,
}

pub trait Parser: Send + Sync {
    /// Valida y normaliza los bytes de una definición.
    ///
    /// Contrato: todo nodo referenciado existe, hay exactamente un
    /// `startEvent`, toda arista tiene ambos extremos y los `type_code`
    /// pertenecen al conjunto reconocido. El incumplimiento se reporta como
    /// `EngineError::MalformedDefinition` con el id del elemento ofensor.
    fn parse(&self, data: &[u8]) -> Result<ParseResult, EngineError>;
}

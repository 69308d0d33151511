//! tramita-core: núcleo del motor de flujos de aprobación.
//!
//! Definiciones estilo BPMN normalizadas a un grafo relacional versionado, e
//! instancias que avanzan una decisión de usuario a la vez. Este crate no
//! conoce la base de datos: habla contra el trait `FlowStore`
//! (`tramita-persistence` aporta el backend Postgres; `MemoryFlowStore`
//! cubre tests y usos efímeros).

pub mod constants;
pub mod engine;
pub mod errors;
pub mod execer;
pub mod hashing;
pub mod loader;
pub mod model;
pub mod parser;
pub mod store;
pub mod vars;

// Re-exports públicos principales
pub use engine::Engine;
pub use errors::EngineError;
pub use execer::{Execer, RhaiExecer};
pub use model::{Flow, FlowInstance, HandleResult, HistoryItem, NextNode, Node, NodeInstance, NodeTypeCode, TodoItem};
pub use parser::{ParseResult, Parser, XmlParser};
pub use store::{FlowStore, MemoryFlowStore, StoreError};

//! Constantes del motor.
//!
//! Códigos de estado persistidos tal cual en las tablas `f_*`. No renumerar:
//! instancias en vuelo dependen de estos valores.

/// Flujo habilitado para instanciación.
pub const FLOW_STATUS_ENABLED: i16 = 1;
/// Flujo deshabilitado (conserva instancias en curso).
pub const FLOW_STATUS_DISABLED: i16 = 2;

/// Versión vigente del código de flujo.
pub const FLOW_FLAG_ACTIVE: i16 = 1;
/// Versión reemplazada por una carga posterior.
pub const FLOW_FLAG_REPLACED: i16 = 0;

/// Instancia de flujo en ejecución.
pub const FLOW_INSTANCE_RUNNING: i16 = 1;
/// Instancia de flujo completada (sin nodos pendientes).
pub const FLOW_INSTANCE_COMPLETED: i16 = 2;
/// Instancia de flujo suspendida por un operador.
pub const FLOW_INSTANCE_SUSPENDED: i16 = 9;

/// Instancia de nodo esperando decisión.
pub const NODE_INSTANCE_PENDING: i16 = 1;
/// Instancia de nodo procesada (exactamente una vez).
pub const NODE_INSTANCE_PROCESSED: i16 = 2;
/// Instancia de nodo cancelada (rama paralela superada en un join).
pub const NODE_INSTANCE_CANCELLED: i16 = 9;

/// Tope de recursión del avance entre gateways. Un grafo bien formado nunca
/// se acerca a este valor; alcanzarlo indica un ciclo compuesto solo por
/// gateways.
pub const MAX_ADVANCE_DEPTH: usize = 64;

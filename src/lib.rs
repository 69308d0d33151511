//! tramita: fachada de proceso único sobre el motor de flujos.
//!
//! Para un servicio que corre un solo motor contra Postgres, este módulo
//! ofrece la API global clásica: `init` una vez al arrancar (con pánico si la
//! persistencia no levanta) y funciones libres para cargar definiciones y
//! operar instancias. El núcleo sigue siendo un valor construible
//! (`tramita_core::Engine`) con dependencias inyectadas: tests y despliegues
//! multi-tenant pueden crear los motores que necesiten sin tocar este
//! singleton.

use std::sync::RwLock;

use once_cell::sync::OnceCell;

pub use tramita_core::{Engine, EngineError, Execer, Flow, FlowStore, HandleResult, HistoryItem, MemoryFlowStore,
                       Parser, TodoItem};
pub use tramita_persistence::{init_dotenv, DbConfig, PersistenceError, PgFlowStore};

static ENGINE: OnceCell<RwLock<Engine<PgFlowStore>>> = OnceCell::new();

fn engine() -> &'static RwLock<Engine<PgFlowStore>> {
    ENGINE.get().expect("tramita: init() no fue llamado")
}

/// Inicializa la persistencia y el motor global. Llamar una sola vez al
/// arrancar el proceso; si la base no levanta, abortamos con pánico.
pub fn init(cfg: &DbConfig) {
    let store = match PgFlowStore::connect(cfg) {
        Ok(store) => store,
        Err(e) => panic!("tramita: fallo inicializando persistencia: {e}"),
    };
    if ENGINE.set(RwLock::new(Engine::new(store))).is_err() {
        panic!("tramita: init() llamado más de una vez");
    }
}

/// Reemplaza el parser del motor global; llamar antes del primer uso.
pub fn set_parser(parser: Box<dyn Parser>) {
    engine().write().expect("engine lock").set_parser(parser);
}

/// Reemplaza el evaluador de expresiones del motor global; llamar antes del
/// primer uso.
pub fn set_execer(execer: Box<dyn Execer>) {
    engine().write().expect("engine lock").set_execer(execer);
}

/// Carga un archivo de definición. Idempotente por (código, contenido).
pub fn load_file(path: impl AsRef<std::path::Path>) -> Result<Flow, EngineError> {
    engine().read().expect("engine lock").load_file(path)
}

/// Arranca una instancia del flujo `flow_code` desde `node_code`.
pub fn start_flow(flow_code: &str, node_code: &str, user_id: &str, input_data: &[u8])
                  -> Result<HandleResult, EngineError> {
    engine().read()
            .expect("engine lock")
            .start_flow(flow_code, node_code, user_id, input_data)
}

/// Procesa una decisión sobre una instancia de nodo pendiente.
pub fn handle_flow(node_instance_id: &str, user_id: &str, input_data: &[u8]) -> Result<HandleResult, EngineError> {
    engine().read()
            .expect("engine lock")
            .handle_flow(node_instance_id, user_id, input_data)
}

/// Pendientes del usuario, opcionalmente filtrados por código de flujo.
pub fn query_todo_flows(flow_code: Option<&str>, user_id: &str) -> Result<Vec<TodoItem>, EngineError> {
    engine().read()
            .expect("engine lock")
            .query_todo_flows(flow_code, user_id)
}

/// Historia de una instancia (pasos userTask).
pub fn query_history(flow_instance_id: &str) -> Result<Vec<HistoryItem>, EngineError> {
    engine().read()
            .expect("engine lock")
            .query_history(flow_instance_id)
}

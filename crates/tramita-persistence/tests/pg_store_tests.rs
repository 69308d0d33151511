//! Recorrido del motor contra Postgres real: despliegue de definición,
//! instancia completa y carrera CAS. Se omiten sin DATABASE_URL.

mod test_support;

use serde_json::json;
use tramita_core::constants::FLOW_INSTANCE_COMPLETED;
use tramita_core::store::FlowStore;
use tramita_core::{Engine, EngineError};
use tramita_persistence::PgFlowStore;

const LEAVE: &[u8] = include_bytes!("../../tramita-core/tests/data/leave.bpmn");

fn uniq(tag: &str) -> String {
    let nanos = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH)
                                            .unwrap()
                                            .as_nanos();
    format!("{tag}-{nanos}")
}

fn input(value: serde_json::Value) -> Vec<u8> {
    value.to_string().into_bytes()
}

#[test]
fn recorrido_de_licencia_contra_postgres() {
    let Some(()) = test_support::with_pool(|pool| {
        let engine = Engine::new(PgFlowStore::new(pool.clone()));
        engine.load_data(LEAVE).expect("load");

        let launcher = uniq("L");
        let bzr = uniq("B");

        let result = engine.start_flow("process_leave",
                                       "node_start",
                                       &launcher,
                                       &input(json!({"day": 1, "bzr": bzr})))
                           .expect("start");
        assert_eq!(result.next_nodes[0].candidate_ids, vec![bzr.clone()]);
        let flow_instance_id = result.flow_instance_id.clone().expect("instancia");

        let todos = engine.query_todo_flows(Some("process_leave"), &bzr).expect("todo");
        assert_eq!(todos.len(), 1);
        assert_eq!(todos[0].form_type.as_deref(), Some("urlform"));

        let result = engine.handle_flow(&todos[0].record_id, &bzr, &input(json!({"action": "pass"})))
                           .expect("handle");
        assert!(result.is_end);

        // la relectura ve la instancia completada y sin pendientes
        let instance = engine.store()
                             .get_flow_instance(&flow_instance_id)
                             .expect("get")
                             .expect("existe");
        assert_eq!(instance.status, FLOW_INSTANCE_COMPLETED);
        assert!(!engine.store().check_flow_instance_todo(&flow_instance_id).expect("check"));

        // perdedor del CAS: la misma instancia de nodo ya no es accionable
        let err = engine.handle_flow(&todos[0].record_id, &bzr, &input(json!({"action": "pass"})))
                        .unwrap_err();
        assert!(matches!(err, EngineError::NodeInstanceNotActionable(_)));

        let history = engine.query_history(&flow_instance_id).expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].processor.as_deref(), Some(bzr.as_str()));
    })
    else {
        eprintln!("DATABASE_URL no definido: omitiendo test");
        return;
    };
}

#[test]
fn recarga_idempotente_contra_postgres() {
    let Some(()) = test_support::with_pool(|pool| {
        let engine = Engine::new(PgFlowStore::new(pool.clone()));
        let first = engine.load_data(LEAVE).expect("load 1");
        let second = engine.load_data(LEAVE).expect("load 2");
        assert_eq!(first.record_id, second.record_id);
        assert_eq!(first.version, second.version);
    })
    else {
        eprintln!("DATABASE_URL no definido: omitiendo test");
        return;
    };
}

//! Escenarios de punta a punta del motor contra el store en memoria.

use serde_json::json;
use tramita_core::constants::{FLOW_INSTANCE_COMPLETED, NODE_INSTANCE_CANCELLED, NODE_INSTANCE_PENDING,
                              NODE_INSTANCE_PROCESSED};
use tramita_core::store::FlowStore;
use tramita_core::{Engine, EngineError, MemoryFlowStore};

const LEAVE: &[u8] = include_bytes!("data/leave.bpmn");
const APPLY: &[u8] = include_bytes!("data/apply.bpmn");
const PARALLEL: &[u8] = include_bytes!("data/parallel.bpmn");
const INCLUSIVE: &[u8] = include_bytes!("data/inclusive.bpmn");
const ORDERING: &[u8] = include_bytes!("data/ordering.bpmn");

fn engine_with(fixtures: &[&[u8]]) -> Engine<MemoryFlowStore> {
    let engine = Engine::new(MemoryFlowStore::new());
    for data in fixtures {
        engine.load_data(data).expect("load definition");
    }
    engine
}

fn input(value: serde_json::Value) -> Vec<u8> {
    value.to_string().into_bytes()
}

#[test]
fn leave_aprobacion_directa() {
    let engine = engine_with(&[LEAVE]);

    let result = engine.start_flow("process_leave",
                                   "node_start",
                                   "T001",
                                   &input(json!({"day": 1, "bzr": "T002"})))
                       .expect("start");
    assert!(!result.is_end);
    assert_eq!(result.next_nodes.len(), 1);
    assert_eq!(result.next_nodes[0].node_code, "node_bzr");
    assert_eq!(result.next_nodes[0].candidate_ids, vec!["T002"]);

    let todos = engine.query_todo_flows(Some("process_leave"), "T002").expect("todo");
    assert_eq!(todos.len(), 1);
    assert_eq!(todos[0].node_code, "node_bzr");
    assert_eq!(todos[0].form_type.as_deref(), Some("urlform"));

    let result = engine.handle_flow(&todos[0].record_id,
                                    "T002",
                                    &input(json!({"day": 1, "bzr": "T002", "action": "pass"})))
                       .expect("handle");
    assert!(result.is_end);
    assert!(result.next_nodes.is_empty());
}

#[test]
fn leave_devolucion_al_solicitante() {
    let engine = engine_with(&[LEAVE]);
    let launcher = "T001";
    let bzr = "T002";

    let result = engine.start_flow("process_leave",
                                   "node_start",
                                   launcher,
                                   &input(json!({"day": 1, "bzr": bzr})))
                       .expect("start");
    assert_eq!(result.next_nodes[0].candidate_ids, vec![bzr]);

    // el tutor devuelve el trámite
    let todos = engine.query_todo_flows(Some("process_leave"), bzr).expect("todo");
    let result = engine.handle_flow(&todos[0].record_id,
                                    bzr,
                                    &input(json!({"day": 1, "bzr": bzr, "action": "back"})))
                       .expect("back");
    assert!(!result.is_end);
    assert_eq!(result.next_nodes[0].node_code, "node_back");
    assert_eq!(result.next_nodes[0].candidate_ids, vec![launcher]);

    // el solicitante reenvía (sin clave action en el dato entrante)
    let todos = engine.query_todo_flows(Some("process_leave"), launcher).expect("todo");
    assert_eq!(todos.len(), 1);
    let result = engine.handle_flow(&todos[0].record_id,
                                    launcher,
                                    &input(json!({"day": 1, "bzr": bzr})))
                       .expect("resubmit");
    assert_eq!(result.next_nodes[0].node_code, "node_bzr");
    assert_eq!(result.next_nodes[0].candidate_ids, vec![bzr]);

    // el tutor aprueba
    let todos = engine.query_todo_flows(Some("process_leave"), bzr).expect("todo");
    let result = engine.handle_flow(&todos[0].record_id,
                                    bzr,
                                    &input(json!({"day": 1, "bzr": bzr, "action": "pass"})))
                       .expect("pass");
    assert!(result.is_end);
}

#[test]
fn leave_escala_al_consejero() {
    let engine = engine_with(&[LEAVE]);

    let result = engine.start_flow("process_leave",
                                   "node_start",
                                   "T001",
                                   &input(json!({"day": 3, "bzr": "T002", "fdy": "T003"})))
                       .expect("start");
    assert_eq!(result.next_nodes[0].candidate_ids, vec!["T002"]);

    let todos = engine.query_todo_flows(Some("process_leave"), "T002").expect("todo");
    let result = engine.handle_flow(&todos[0].record_id,
                                    "T002",
                                    &input(json!({"action": "pass"})))
                       .expect("bzr pass");
    assert!(!result.is_end);
    assert_eq!(result.next_nodes[0].node_code, "node_fdy");
    assert_eq!(result.next_nodes[0].candidate_ids, vec!["T003"]);

    let todos = engine.query_todo_flows(Some("process_leave"), "T003").expect("todo");
    let result = engine.handle_flow(&todos[0].record_id,
                                    "T003",
                                    &input(json!({"action": "pass"})))
                       .expect("fdy pass");
    assert!(result.is_end);
}

#[test]
fn multi_candidato_y_carrera_de_decision() {
    let engine = engine_with(&[APPLY]);

    let result = engine.start_flow("process_apply", "node_start", "A001", &input(json!({"form": "apply"})))
                       .expect("start");
    assert_eq!(result.next_nodes.len(), 1);
    assert_eq!(result.next_nodes[0].candidate_ids, vec!["U1", "U2"]);

    // ambos candidatos ven el mismo pendiente
    for user in ["U1", "U2"] {
        let todos = engine.query_todo_flows(Some("process_apply"), user).expect("todo");
        assert_eq!(todos.len(), 1, "pendientes de {user}");
    }

    let node_instance_id = result.next_nodes[0].node_instance_id.clone();
    let result = engine.handle_flow(&node_instance_id, "U1", &input(json!({"action": "pass"})))
                       .expect("U1 procesa");
    assert!(result.is_end);

    // el segundo en llegar pierde: la instancia ya no está pendiente
    let err = engine.handle_flow(&node_instance_id, "U2", &input(json!({"action": "pass"})))
                    .unwrap_err();
    assert!(matches!(err, EngineError::NodeInstanceNotActionable(_)));
}

#[test]
fn fork_y_join_paralelo() {
    let engine = engine_with(&[PARALLEL]);

    let result = engine.start_flow("process_countersign",
                                   "node_start",
                                   "H001",
                                   &input(json!({"rev_a": "P001", "rev_b": "P002", "rev_c": "P003"})))
                       .expect("start");
    assert_eq!(result.next_nodes.len(), 3);

    let flow_instance_id = result.flow_instance_id.clone().expect("instancia");
    for (i, next) in result.next_nodes.iter().enumerate() {
        assert_eq!(next.candidate_ids.len(), 1);
        let user = &next.candidate_ids[0];

        let todos = engine.query_todo_flows(Some("process_countersign"), user).expect("todo");
        assert_eq!(todos.len(), 1);

        let result = engine.handle_flow(&todos[0].record_id, user, &input(json!({"sign": user})))
                           .expect("firma");
        if i == 2 {
            assert!(result.is_end, "la tercera firma cierra la instancia");
        } else {
            assert!(!result.is_end, "la firma {} no cierra la instancia", i + 1);
        }
    }

    // el join dejó canceladas las filas pendientes superadas
    let rows = engine.store().query_node_instances(&flow_instance_id).expect("rows");
    let cancelled = rows.iter().filter(|r| r.status == NODE_INSTANCE_CANCELLED).count();
    assert_eq!(cancelled, 2);
}

#[test]
fn orden_de_routers_exclusivos() {
    let engine = engine_with(&[ORDERING]);

    // x positivo: gana la primera guarda
    let result = engine.start_flow("process_route", "node_start", "R000", &input(json!({"x": 5})))
                       .expect("start");
    assert_eq!(result.next_nodes[0].node_code, "task_pos");
    assert_eq!(result.next_nodes[0].candidate_ids, vec!["R001"]);

    // x negativo: cae al router sin guarda, ordenado después
    let result = engine.start_flow("process_route", "node_start", "R000", &input(json!({"x": -1})))
                       .expect("start");
    assert_eq!(result.next_nodes[0].node_code, "task_any");
    assert_eq!(result.next_nodes[0].candidate_ids, vec!["R001", "R002"]);
}

#[test]
fn inclusivo_espera_solo_las_ramas_instanciadas() {
    let engine = engine_with(&[INCLUSIVE]);

    // una sola guarda verdadera: el join no espera a la rama nunca abierta
    let result = engine.start_flow("process_expense",
                                   "node_start",
                                   "E001",
                                   &input(json!({"amount": 500, "urgent": false, "fin": "F001", "mgr": "M001"})))
                       .expect("start");
    assert_eq!(result.next_nodes.len(), 1);
    assert_eq!(result.next_nodes[0].node_code, "task_fin");

    let result = engine.handle_flow(&result.next_nodes[0].node_instance_id,
                                    "F001",
                                    &input(json!({"action": "ok"})))
                       .expect("fin");
    assert!(result.is_end);
}

#[test]
fn inclusivo_con_dos_ramas_sincroniza() {
    let engine = engine_with(&[INCLUSIVE]);

    let result = engine.start_flow("process_expense",
                                   "node_start",
                                   "E001",
                                   &input(json!({"amount": 500, "urgent": true, "fin": "F001", "mgr": "M001"})))
                       .expect("start");
    assert_eq!(result.next_nodes.len(), 2);

    let first = engine.handle_flow(&result.next_nodes[0].node_instance_id,
                                   &result.next_nodes[0].candidate_ids[0],
                                   &input(json!({})))
                      .expect("primera rama");
    assert!(!first.is_end);

    let second = engine.handle_flow(&result.next_nodes[1].node_instance_id,
                                    &result.next_nodes[1].candidate_ids[0],
                                    &input(json!({})))
                       .expect("segunda rama");
    assert!(second.is_end);
}

#[test]
fn inclusivo_sin_guarda_verdadera_es_error() {
    let engine = engine_with(&[INCLUSIVE]);

    let err = engine.start_flow("process_expense",
                                "node_start",
                                "E001",
                                &input(json!({"amount": 10, "urgent": false})))
                    .unwrap_err();
    assert!(matches!(err, EngineError::NoRouteSatisfied(_)));
}

#[test]
fn errores_de_resolucion() {
    let engine = engine_with(&[LEAVE]);

    let err = engine.start_flow("no_existe", "node_start", "T001", b"{}").unwrap_err();
    assert!(matches!(err, EngineError::FlowNotFound(_)));

    let err = engine.start_flow("process_leave", "no_existe", "T001", b"{}").unwrap_err();
    assert!(matches!(err, EngineError::NodeNotFound(_)));

    // un usuario ajeno a los candidatos no puede decidir
    let result = engine.start_flow("process_leave",
                                   "node_start",
                                   "T001",
                                   &input(json!({"day": 1, "bzr": "T002"})))
                       .expect("start");
    let err = engine.handle_flow(&result.next_nodes[0].node_instance_id, "intruso", b"{}")
                    .unwrap_err();
    assert!(matches!(err, EngineError::NotCandidate { .. }));
}

#[test]
fn invariantes_tras_completar() {
    let engine = engine_with(&[LEAVE]);

    let result = engine.start_flow("process_leave",
                                   "node_start",
                                   "T001",
                                   &input(json!({"day": 3, "bzr": "T002", "fdy": "T003"})))
                       .expect("start");
    let flow_instance_id = result.flow_instance_id.clone().expect("instancia");

    for user in ["T002", "T003"] {
        let todos = engine.query_todo_flows(None, user).expect("todo");
        engine.handle_flow(&todos[0].record_id, user, &input(json!({"action": "pass"})))
              .expect("pass");
    }

    // instancia completada ⇔ sin pendientes
    let instance = engine.store()
                         .get_flow_instance(&flow_instance_id)
                         .expect("get")
                         .expect("existe");
    assert_eq!(instance.status, FLOW_INSTANCE_COMPLETED);

    let rows = engine.store().query_node_instances(&flow_instance_id).expect("rows");
    assert!(rows.iter().all(|r| r.status != NODE_INSTANCE_PENDING));

    // procesada ⇒ procesador, hora y datos de salida presentes
    for row in rows.iter().filter(|r| r.status == NODE_INSTANCE_PROCESSED) {
        assert!(row.processor.is_some());
        assert!(row.process_time.is_some());
        assert!(!row.out_data.is_empty());
    }

    // la historia lista solo userTask, todos procesados
    let history = engine.query_history(&flow_instance_id).expect("history");
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|h| h.status == NODE_INSTANCE_PROCESSED && h.processor.is_some()));
}

//! Versionado e idempotencia del loader, y validación de topología.

use tramita_core::store::FlowStore;
use tramita_core::{Engine, EngineError, MemoryFlowStore};

const LEAVE: &[u8] = include_bytes!("data/leave.bpmn");

fn engine() -> Engine<MemoryFlowStore> {
    Engine::new(MemoryFlowStore::new())
}

#[test]
fn primera_carga_publica_version_1() {
    let engine = engine();
    let flow = engine.load_data(LEAVE).expect("load");
    assert_eq!(flow.code, "process_leave");
    assert_eq!(flow.version, 1);
}

#[test]
fn recargar_bytes_identicos_es_noop() {
    let engine = engine();
    let first = engine.load_data(LEAVE).expect("load 1");
    let second = engine.load_data(LEAVE).expect("load 2");

    assert_eq!(second.version, 1);
    assert_eq!(second.record_id, first.record_id);

    // sin duplicados de routers ni asignaciones tras la recarga
    let flow = engine.store()
                     .get_flow_by_code("process_leave")
                     .expect("get")
                     .expect("existe");
    let bzr = engine.store()
                    .get_node_by_code(&flow.record_id, "node_bzr")
                    .expect("get")
                    .expect("existe");
    assert_eq!(engine.store().query_node_assignments(&bzr.record_id).expect("asig").len(), 1);

    let gw = engine.store()
                   .get_node_by_code(&flow.record_id, "gw_action")
                   .expect("get")
                   .expect("existe");
    assert_eq!(engine.store().query_node_routers(&gw.record_id).expect("routers").len(), 3);
}

#[test]
fn contenido_distinto_sube_version_y_reemplaza() {
    let engine = engine();
    engine.load_data(LEAVE).expect("load v1");

    let changed = String::from_utf8(LEAVE.to_vec()).unwrap()
                                                   .replace("Solicitud de licencia", "Solicitud de licencia v2");
    let flow = engine.load_data(changed.as_bytes()).expect("load v2");
    assert_eq!(flow.version, 2);

    // la vigente es la nueva; la anterior quedó con flag = 0
    let current = engine.store()
                        .get_flow_by_code("process_leave")
                        .expect("get")
                        .expect("existe");
    assert_eq!(current.version, 2);
    assert_eq!(current.record_id, flow.record_id);
    let latest = engine.store()
                       .get_latest_flow_by_code("process_leave")
                       .expect("get")
                       .expect("existe");
    assert_eq!(latest.version, 2);
}

#[test]
fn carga_via_archivo() {
    let engine = engine();
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/data/leave.bpmn");
    let flow = engine.load_file(path).expect("load_file");
    assert_eq!(flow.code, "process_leave");
}

#[test]
fn rechaza_flujo_sin_end_event() {
    let xml = br#"<definitions><process id="p">
        <startEvent id="s"/>
        <userTask id="t"><extensionElements><candidateUsers>U</candidateUsers></extensionElements></userTask>
        <sequenceFlow id="f" sourceRef="s" targetRef="t"/>
    </process></definitions>"#;
    let err = engine().load_data(xml).unwrap_err();
    assert!(matches!(err, EngineError::MalformedDefinition(_)));
}

#[test]
fn rechaza_start_sin_salida() {
    let xml = br#"<definitions><process id="p">
        <startEvent id="s"/>
        <endEvent id="e"/>
    </process></definitions>"#;
    let err = engine().load_data(xml).unwrap_err();
    assert!(matches!(err, EngineError::MalformedDefinition(_)));
}

#[test]
fn borrar_flujo_deja_tombstones() {
    let engine = engine();
    let flow = engine.load_data(LEAVE).expect("load");
    let bzr = engine.store()
                    .get_node_by_code(&flow.record_id, "node_bzr")
                    .expect("get")
                    .expect("existe");

    engine.store().delete_flow(&flow.record_id).expect("delete");

    assert!(engine.store().get_flow_by_code("process_leave").expect("get").is_none());
    assert!(engine.store()
                  .get_node_by_code(&flow.record_id, "node_bzr")
                  .expect("get")
                  .is_none());
    assert!(engine.store().query_node_assignments(&bzr.record_id).expect("asig").is_empty());
}

//! Contrato del parser XML: forma del ParseResult y rechazo de definiciones
//! malformadas con el id del elemento ofensor.

use tramita_core::parser::{Parser, XmlParser};
use tramita_core::{EngineError, NodeTypeCode};

const LEAVE: &[u8] = include_bytes!("data/leave.bpmn");

#[test]
fn normaliza_el_fixture_de_licencia() {
    let result = XmlParser::new().parse(LEAVE).expect("parse");

    assert_eq!(result.flow.code, "process_leave");
    assert_eq!(result.flow.name, "Solicitud de licencia");
    assert_eq!(result.flow.type_code, "leave");

    assert_eq!(result.nodes.len(), 6);
    assert_eq!(result.routers.len(), 7);
    // bzr, launcher y fdy
    assert_eq!(result.assignments.len(), 3);
    assert_eq!(result.forms.len(), 1);

    // claves foráneas resueltas a record_ids acuñados
    for router in &result.routers {
        assert!(result.nodes.iter().any(|n| n.record_id == router.source_node_id));
        assert!(result.nodes.iter().any(|n| n.record_id == router.target_node_id));
    }

    // la guarda CDATA llega recortada y textual
    let bzr = result.nodes.iter().find(|n| n.code == "node_bzr").expect("node_bzr");
    let back = result.routers
                     .iter()
                     .find(|r| r.explain == "devolver")
                     .expect("router devolver");
    assert_eq!(back.expression, r#"action == "back""#);
    assert_eq!(bzr.type_code, NodeTypeCode::UserTask);

    // el formulario queda colgado del userTask que lo declara
    assert_eq!(bzr.form_id.as_deref(), Some(result.forms[0].record_id.as_str()));
    assert_eq!(result.forms[0].type_code, "urlform");
}

#[test]
fn candidate_users_se_normaliza_a_literales() {
    let xml = br#"<definitions><process id="p">
        <startEvent id="s"/>
        <userTask id="t">
          <extensionElements><candidateUsers>R001, R002</candidateUsers></extensionElements>
        </userTask>
        <endEvent id="e"/>
        <sequenceFlow id="f1" sourceRef="s" targetRef="t"/>
        <sequenceFlow id="f2" sourceRef="t" targetRef="e"/>
    </process></definitions>"#;
    let result = XmlParser::new().parse(xml).expect("parse");
    let exprs: Vec<&str> = result.assignments.iter().map(|a| a.expression.as_str()).collect();
    assert_eq!(exprs, vec!["\"R001\"", "\"R002\""]);
}

#[test]
fn orden_de_documento_en_order_num() {
    let result = XmlParser::new().parse(LEAVE).expect("parse");
    let mut sorted = result.nodes.clone();
    sorted.sort_by_key(|n| n.order_num);
    assert_eq!(sorted[0].code, "node_start");
    assert_eq!(sorted.last().unwrap().code, "node_end");
}

fn expect_malformed(xml: &[u8], needle: &str) {
    match XmlParser::new().parse(xml) {
        Err(EngineError::MalformedDefinition(msg)) => {
            assert!(msg.contains(needle), "mensaje {msg:?} no menciona {needle:?}")
        }
        other => panic!("se esperaba MalformedDefinition, se obtuvo {other:?}"),
    }
}

#[test]
fn rechaza_definiciones_malformadas() {
    expect_malformed(b"no es xml", "invalid xml");
    expect_malformed(b"<definitions/>", "process");
    expect_malformed(br#"<definitions><process id="p">
        <startEvent id="s"/><startEvent id="s2"/><endEvent id="e"/>
        <sequenceFlow id="f" sourceRef="s" targetRef="e"/>
    </process></definitions>"#,
                     "startEvent");
    expect_malformed(br#"<definitions><process id="p">
        <startEvent id="s"/><endEvent id="s"/>
    </process></definitions>"#,
                     "duplicate node id: s");
    expect_malformed(br#"<definitions><process id="p">
        <startEvent id="s"/><endEvent id="e"/>
        <sequenceFlow id="f" sourceRef="s" targetRef="fantasma"/>
    </process></definitions>"#,
                     "fantasma");
    expect_malformed(br#"<definitions><process id="p">
        <startEvent id="s"/><endEvent id="e"/>
        <sequenceFlow id="f" targetRef="e"/>
    </process></definitions>"#,
                     "sourceRef");
    expect_malformed(br#"<definitions><process id="p">
        <startEvent id="s"/>
        <userTask id="t"><extensionElements><candidateExpression>  </candidateExpression></extensionElements></userTask>
    </process></definitions>"#,
                     "candidateExpression");
}

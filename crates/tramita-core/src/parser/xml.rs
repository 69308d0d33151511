//! Parser del dialecto XML estilo BPMN.
//!
//! Inventario consumido por el runtime: `startEvent`, `endEvent`, `userTask`,
//! `exclusiveGateway`, `inclusiveGateway`, `parallelGateway` y
//! `sequenceFlow` (con `<conditionExpression>` opcional como guarda). Dentro
//! de `<extensionElements>` de un `userTask` se aceptan `<candidateUsers>`
//! (ids literales separados por coma), `<candidateExpression>` (expresión
//! evaluada en runtime) y `<form typeCode="...">` (cuerpo opaco). Cualquier
//! otro elemento se ignora: el inventario completo del dialecto excede lo que
//! el runtime consume.

use std::collections::HashMap;

use crate::constants::{FLOW_FLAG_ACTIVE, FLOW_STATUS_ENABLED};
use crate::errors::EngineError;
use crate::model::{new_record_id, now_unix, Flow, Form, Node, NodeAssignment, NodeRouter, NodeTypeCode};
use crate::parser::{ParseResult, Parser};

#[derive(Debug, Default)]
pub struct XmlParser;

impl XmlParser {
    pub fn new() -> Self {
        Self
    }
}

fn malformed(msg: impl Into<String>) -> EngineError {
    EngineError::MalformedDefinition(msg.into())
}

/// Comparación por nombre local: los documentos reales llegan con o sin
/// namespace por defecto y el prefijo no nos interesa.
fn is_tag(node: roxmltree::Node<'_, '_>, name: &str) -> bool {
    node.is_element() && node.tag_name().name() == name
}

/// Texto completo de un elemento (incluye secciones CDATA), recortado.
fn element_text(el: roxmltree::Node<'_, '_>) -> String {
    el.children()
      .filter_map(|c| c.text())
      .collect::<String>()
      .trim()
      .to_string()
}

impl Parser for XmlParser {
    fn parse(&self, data: &[u8]) -> Result<ParseResult, EngineError> {
        let text = std::str::from_utf8(data).map_err(|e| malformed(format!("definition is not utf-8: {e}")))?;
        let doc = roxmltree::Document::parse(text).map_err(|e| malformed(format!("invalid xml: {e}")))?;

        let process = doc.descendants()
                         .find(|n| is_tag(*n, "process"))
                         .ok_or_else(|| malformed("missing <process> element"))?;

        let code = process.attribute("id")
                          .filter(|s| !s.is_empty())
                          .ok_or_else(|| malformed("<process> without id"))?;

        let ts = now_unix();
        let flow = Flow { record_id: new_record_id(),
                          created: ts,
                          deleted: 0,
                          code: code.to_string(),
                          version: 0,
                          name: process.attribute("name").unwrap_or(code).to_string(),
                          type_code: process.attribute("typeCode").unwrap_or("").to_string(),
                          status: FLOW_STATUS_ENABLED,
                          flag: FLOW_FLAG_ACTIVE,
                          memo: process.attribute("memo").unwrap_or("").to_string(),
                          content_hash: String::new() };

        let mut nodes: Vec<Node> = Vec::new();
        let mut routers: Vec<NodeRouter> = Vec::new();
        let mut assignments: Vec<NodeAssignment> = Vec::new();
        let mut forms: Vec<Form> = Vec::new();
        // code del nodo en el documento -> record_id acuñado
        let mut node_ids: HashMap<String, String> = HashMap::new();

        // Primera pasada: vértices. `order_num` sigue el orden del documento.
        let mut order: i64 = 0;
        for el in process.children().filter(|c| c.is_element()) {
            let tag = el.tag_name().name();
            if tag == "sequenceFlow" {
                continue;
            }
            let Some(type_code) = NodeTypeCode::parse(tag) else {
                continue;
            };

            let id = el.attribute("id")
                       .filter(|s| !s.is_empty())
                       .ok_or_else(|| malformed(format!("<{tag}> without id")))?;
            if node_ids.contains_key(id) {
                return Err(malformed(format!("duplicate node id: {id}")));
            }

            let mut node = Node { record_id: new_record_id(),
                                  created: ts,
                                  deleted: 0,
                                  flow_id: flow.record_id.clone(),
                                  code: id.to_string(),
                                  name: el.attribute("name").unwrap_or(id).to_string(),
                                  type_code,
                                  form_id: None,
                                  order_num: order };
            order += 1;

            if type_code == NodeTypeCode::UserTask {
                self.parse_extensions(el, &flow, &mut node, &mut assignments, &mut forms)?;
            }

            node_ids.insert(id.to_string(), node.record_id.clone());
            nodes.push(node);
        }

        // Segunda pasada: aristas, con ambos extremos ya resolubles.
        for el in process.children().filter(|c| is_tag(*c, "sequenceFlow")) {
            let id = el.attribute("id").unwrap_or("<sequenceFlow>");
            let source = el.attribute("sourceRef")
                           .filter(|s| !s.is_empty())
                           .ok_or_else(|| malformed(format!("{id}: missing sourceRef")))?;
            let target = el.attribute("targetRef")
                           .filter(|s| !s.is_empty())
                           .ok_or_else(|| malformed(format!("{id}: missing targetRef")))?;

            let source_id = node_ids.get(source)
                                    .ok_or_else(|| malformed(format!("{id}: unknown sourceRef {source}")))?;
            let target_id = node_ids.get(target)
                                    .ok_or_else(|| malformed(format!("{id}: unknown targetRef {target}")))?;

            let expression = el.children()
                               .find(|c| is_tag(*c, "conditionExpression"))
                               .map(element_text)
                               .unwrap_or_default();

            routers.push(NodeRouter { record_id: new_record_id(),
                                      created: ts,
                                      deleted: 0,
                                      source_node_id: source_id.clone(),
                                      target_node_id: target_id.clone(),
                                      expression,
                                      explain: el.attribute("name").unwrap_or("").to_string() });
        }

        let starts = nodes.iter()
                          .filter(|n| n.type_code == NodeTypeCode::StartEvent)
                          .count();
        if starts != 1 {
            return Err(malformed(format!("expected exactly one startEvent, found {starts}")));
        }

        Ok(ParseResult { flow, nodes, routers, assignments, forms })
    }
}

impl XmlParser {
    fn parse_extensions(&self,
                        el: roxmltree::Node<'_, '_>,
                        flow: &Flow,
                        node: &mut Node,
                        assignments: &mut Vec<NodeAssignment>,
                        forms: &mut Vec<Form>)
                        -> Result<(), EngineError> {
        let Some(ext) = el.children().find(|c| is_tag(*c, "extensionElements")) else {
            return Ok(());
        };

        for item in ext.children().filter(|c| c.is_element()) {
            match item.tag_name().name() {
                // Ids literales: se normalizan a una asignación por id, con
                // la cadena entre comillas para que el execer la devuelva tal
                // cual.
                "candidateUsers" => {
                    for user in element_text(item).split(',').map(str::trim).filter(|s| !s.is_empty()) {
                        assignments.push(NodeAssignment { record_id: new_record_id(),
                                                          created: node.created,
                                                          deleted: 0,
                                                          node_id: node.record_id.clone(),
                                                          expression: format!("\"{user}\"") });
                    }
                }
                "candidateExpression" => {
                    let expr = element_text(item);
                    if expr.is_empty() {
                        return Err(EngineError::MalformedDefinition(format!("{}: empty candidateExpression",
                                                                            node.code)));
                    }
                    assignments.push(NodeAssignment { record_id: new_record_id(),
                                                      created: node.created,
                                                      deleted: 0,
                                                      node_id: node.record_id.clone(),
                                                      expression: expr });
                }
                "form" => {
                    let form = Form { record_id: new_record_id(),
                                      created: node.created,
                                      deleted: 0,
                                      flow_id: flow.record_id.clone(),
                                      type_code: item.attribute("typeCode").unwrap_or("").to_string(),
                                      data: element_text(item) };
                    node.form_id = Some(form.record_id.clone());
                    forms.push(form);
                }
                _ => {}
            }
        }
        Ok(())
    }
}

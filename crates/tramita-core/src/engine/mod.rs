//! Máquina de estados de ejecución.
//!
//! El motor no mantiene estado en memoria entre llamadas: cada decisión lee
//! estado fresco del store, y cada escritura es una operación transaccional
//! del contrato `FlowStore`. El avance (`advance`) es el paso recursivo que,
//! dado el nodo recién completado, materializa los próximos userTask
//! pendientes atravesando gateways y eventos de fin.
//!
//! Todo nodo atravesado que no sea `userTask` persiste una instancia ya
//! procesada: así la cadena `prev_node_instance_id` queda completa y un join
//! puede localizar el fork que abrió su rama.

use std::collections::{HashMap, HashSet};

use log::{debug, warn};
use serde_json::Value;

use crate::constants::*;
use crate::errors::EngineError;
use crate::execer::{truthy, Execer, RhaiExecer};
use crate::loader::load_definition;
use crate::model::{now_unix, Flow, FlowInstance, HandleResult, HistoryItem, NextNode, Node, NodeCandidate,
                   NodeInstance, NodeRouter, NodeTypeCode, TodoItem};
use crate::parser::{Parser, XmlParser};
use crate::store::FlowStore;
use crate::vars::{self, VarMap};

/// Variable reservada con el lanzador de la instancia; disponible para
/// guardas y asignaciones (p. ej. devolver un trámite a quien lo inició).
/// Sólo se inyecta si el dato de entrada no trae la clave.
pub const VAR_LAUNCHER: &str = "launcher";

pub struct Engine<S: FlowStore> {
    store: S,
    parser: Box<dyn Parser>,
    execer: Box<dyn Execer>,
}

impl<S: FlowStore> Engine<S> {
    /// Motor con los componentes por defecto (`XmlParser` + `RhaiExecer`).
    pub fn new(store: S) -> Self {
        Self { store,
               parser: Box::new(XmlParser::new()),
               execer: Box::new(RhaiExecer::new()) }
    }

    /// Reemplaza el parser; llamar antes del primer uso.
    pub fn set_parser(&mut self, parser: Box<dyn Parser>) {
        self.parser = parser;
    }

    /// Reemplaza el evaluador de expresiones; llamar antes del primer uso.
    pub fn set_execer(&mut self, execer: Box<dyn Execer>) {
        self.execer = execer;
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    // ---- definición ------------------------------------------------------

    /// Lee y publica un archivo de definición. Idempotente por
    /// (código, contenido): recargar bytes idénticos no crea versión.
    pub fn load_file(&self, path: impl AsRef<std::path::Path>) -> Result<Flow, EngineError> {
        let data = std::fs::read(path)?;
        self.load_data(&data)
    }

    /// Publica una definición a partir de sus bytes.
    pub fn load_data(&self, data: &[u8]) -> Result<Flow, EngineError> {
        load_definition(&self.store, self.parser.as_ref(), data)
    }

    // ---- ejecución -------------------------------------------------------

    /// Arranca una instancia: resuelve la versión vigente del flujo, crea la
    /// instancia con el evento de inicio auto-procesado y avanza desde él.
    pub fn start_flow(&self, flow_code: &str, start_node_code: &str, user_id: &str, input_data: &[u8])
                      -> Result<HandleResult, EngineError> {
        let flow = self.store
                       .get_flow_by_code(flow_code)?
                       .ok_or_else(|| EngineError::FlowNotFound(flow_code.to_string()))?;
        let start = self.store
                        .get_node_by_code(&flow.record_id, start_node_code)?
                        .filter(|n| n.type_code == NodeTypeCode::StartEvent)
                        .ok_or_else(|| EngineError::NodeNotFound(start_node_code.to_string()))?;

        let mut vars_map = vars::decode(input_data)?;
        if !vars_map.contains_key(VAR_LAUNCHER) {
            vars_map.insert(VAR_LAUNCHER.to_string(), Value::String(user_id.to_string()));
        }

        let instance = FlowInstance::new(&flow.record_id, user_id);
        let start_instance = NodeInstance::processed(&instance.record_id,
                                                     &start.record_id,
                                                     None,
                                                     vars::encode(&vars_map),
                                                     user_id);
        let start_instance_id = start_instance.record_id.clone();
        self.store.create_flow_instance(&instance, &[start_instance])?;
        debug!("start_flow {} v{}: instancia {}", flow.code, flow.version, instance.record_id);

        let mut result = HandleResult { flow_instance_id: Some(instance.record_id.clone()),
                                        ..Default::default() };
        self.advance(&instance, &start, &start_instance_id, &vars_map, user_id, &mut result, 0)?;
        self.finish_if_idle(&instance, &mut result)?;
        Ok(result)
    }

    /// Procesa una decisión sobre una instancia de nodo pendiente y avanza.
    /// La transición pendiente→procesada es un CAS: de dos llamadas
    /// concurrentes sobre la misma instancia, la perdedora recibe
    /// `NodeInstanceNotActionable`.
    pub fn handle_flow(&self, node_instance_id: &str, user_id: &str, input_data: &[u8])
                       -> Result<HandleResult, EngineError> {
        let not_actionable = || EngineError::NodeInstanceNotActionable(node_instance_id.to_string());

        let node_instance = self.store
                                .get_node_instance(node_instance_id)?
                                .ok_or_else(not_actionable)?;
        if node_instance.status != NODE_INSTANCE_PENDING {
            return Err(not_actionable());
        }

        let candidates = self.store.query_node_candidates(node_instance_id)?;
        if !candidates.iter().any(|c| c.candidate_id == user_id) {
            return Err(EngineError::NotCandidate { node_instance_id: node_instance_id.to_string(),
                                                   user_id: user_id.to_string() });
        }

        let instance = self.store
                           .get_flow_instance_by_node(node_instance_id)?
                           .ok_or_else(not_actionable)?;
        if instance.status != FLOW_INSTANCE_RUNNING {
            return Err(not_actionable());
        }

        let prior = vars::decode(&node_instance.input_data)?;
        let incoming = vars::decode(input_data)?;
        let mut merged = vars::merge(prior, &incoming);
        if !merged.contains_key(VAR_LAUNCHER) {
            merged.insert(VAR_LAUNCHER.to_string(), Value::String(instance.launcher.clone()));
        }
        let out_data = vars::encode(&merged);

        if !self.store
                .claim_node_instance(node_instance_id, user_id, now_unix(), &out_data)?
        {
            return Err(not_actionable());
        }

        let node = self.store
                       .get_node(&node_instance.node_id)?
                       .ok_or_else(|| EngineError::NodeNotFound(node_instance.node_id.clone()))?;
        debug!("handle_flow {}: nodo {} por {}", node_instance_id, node.code, user_id);

        let mut result = HandleResult { flow_instance_id: Some(instance.record_id.clone()),
                                        ..Default::default() };
        self.advance(&instance, &node, node_instance_id, &merged, user_id, &mut result, 0)?;
        self.finish_if_idle(&instance, &mut result)?;
        Ok(result)
    }

    /// Pendientes de un usuario, opcionalmente filtrados por código de flujo.
    pub fn query_todo_flows(&self, flow_code: Option<&str>, user_id: &str) -> Result<Vec<TodoItem>, EngineError> {
        Ok(self.store.query_todo(flow_code, user_id)?)
    }

    /// Historia de una instancia (pasos userTask).
    pub fn query_history(&self, flow_instance_id: &str) -> Result<Vec<HistoryItem>, EngineError> {
        Ok(self.store.query_history(flow_instance_id)?)
    }

    // ---- avance ----------------------------------------------------------

    fn advance(&self,
               instance: &FlowInstance,
               node: &Node,
               node_instance_id: &str,
               vars_map: &VarMap,
               user_id: &str,
               result: &mut HandleResult,
               depth: usize)
               -> Result<(), EngineError> {
        if depth >= MAX_ADVANCE_DEPTH {
            return Err(EngineError::MalformedDefinition(format!("gateway cycle at node {}", node.code)));
        }
        if node.type_code == NodeTypeCode::EndEvent {
            return Ok(());
        }

        let routers = self.store.query_node_routers(&node.record_id)?;
        for router in self.select_routers(node, &routers, vars_map)? {
            let target = self.store
                             .get_node(&router.target_node_id)?
                             .ok_or_else(|| EngineError::NodeNotFound(router.target_node_id.clone()))?;
            self.enter_node(instance, &target, node_instance_id, vars_map, user_id, result, depth)?;
        }
        Ok(())
    }

    /// Política de ramificación según el tipo del nodo de origen.
    fn select_routers<'a>(&self, node: &Node, routers: &'a [NodeRouter], vars_map: &VarMap)
                          -> Result<Vec<&'a NodeRouter>, EngineError> {
        match node.type_code {
            // fork incondicional: las guardas se ignoran
            NodeTypeCode::ParallelGateway => Ok(routers.iter().collect()),
            // fork condicional: toda salida con guarda verdadera
            NodeTypeCode::InclusiveGateway => {
                let selected: Vec<&NodeRouter> =
                    routers.iter().filter(|r| self.guard_holds(r, vars_map)).collect();
                if selected.is_empty() && !routers.is_empty() {
                    return Err(EngineError::NoRouteSatisfied(node.code.clone()));
                }
                Ok(selected)
            }
            // secuencial por defecto: primera guarda verdadera en orden de
            // documento, exactamente un sucesor
            _ => {
                if routers.is_empty() {
                    return Ok(Vec::new());
                }
                routers.iter()
                       .find(|r| self.guard_holds(r, vars_map))
                       .map(|r| vec![r])
                       .ok_or_else(|| EngineError::NoRouteSatisfied(node.code.clone()))
            }
        }
    }

    /// Guarda vacía equivale a `true`. Un fallo de evaluación es error de
    /// autoría, no entrada hostil: cuenta como falsa y se sigue con el resto.
    fn guard_holds(&self, router: &NodeRouter, vars_map: &VarMap) -> bool {
        let expression = router.expression.trim();
        if expression.is_empty() {
            return true;
        }
        match self.execer.eval(expression, vars_map) {
            Ok(value) => truthy(&value),
            Err(e) => {
                warn!("guarda {expression:?}: {e}; se toma como falsa");
                false
            }
        }
    }

    fn enter_node(&self,
                  instance: &FlowInstance,
                  target: &Node,
                  prev_instance_id: &str,
                  vars_map: &VarMap,
                  user_id: &str,
                  result: &mut HandleResult,
                  depth: usize)
                  -> Result<(), EngineError> {
        match target.type_code {
            // punto de entrega: acá se detiene el avance
            NodeTypeCode::UserTask => self.create_user_task(instance, target, prev_instance_id, vars_map, result),

            NodeTypeCode::EndEvent => {
                let instance_row = NodeInstance::processed(&instance.record_id,
                                                           &target.record_id,
                                                           Some(prev_instance_id),
                                                           vars::encode(vars_map),
                                                           user_id);
                self.store.create_node_instance(&instance_row, &[])?;
                Ok(())
            }

            NodeTypeCode::ParallelGateway | NodeTypeCode::InclusiveGateway => {
                let inflows = self.store.query_node_inflows(&target.record_id)?;
                if inflows.len() > 1 {
                    self.enter_join(instance, target, prev_instance_id, vars_map, user_id, result, depth)
                } else {
                    self.pass_through(instance, target, prev_instance_id, vars_map, user_id, result, depth)
                }
            }

            // gateway exclusivo (o startEvent referenciado como destino):
            // se resuelve de inmediato, nunca queda pendiente
            NodeTypeCode::ExclusiveGateway | NodeTypeCode::StartEvent => {
                self.pass_through(instance, target, prev_instance_id, vars_map, user_id, result, depth)
            }
        }
    }

    /// Persiste el nodo como procesado y sigue avanzando a través de él.
    fn pass_through(&self,
                    instance: &FlowInstance,
                    target: &Node,
                    prev_instance_id: &str,
                    vars_map: &VarMap,
                    user_id: &str,
                    result: &mut HandleResult,
                    depth: usize)
                    -> Result<(), EngineError> {
        let instance_row = NodeInstance::processed(&instance.record_id,
                                                   &target.record_id,
                                                   Some(prev_instance_id),
                                                   vars::encode(vars_map),
                                                   user_id);
        let row_id = instance_row.record_id.clone();
        self.store.create_node_instance(&instance_row, &[])?;
        self.advance(instance, target, &row_id, vars_map, user_id, result, depth + 1)
    }

    fn create_user_task(&self,
                        instance: &FlowInstance,
                        node: &Node,
                        prev_instance_id: &str,
                        vars_map: &VarMap,
                        result: &mut HandleResult)
                        -> Result<(), EngineError> {
        let candidate_ids = self.resolve_candidates(node, vars_map)?;
        let instance_row = NodeInstance::pending(&instance.record_id,
                                                 &node.record_id,
                                                 Some(prev_instance_id),
                                                 vars::encode(vars_map));
        let candidates: Vec<NodeCandidate> = candidate_ids.iter()
                                                          .map(|c| NodeCandidate::new(&instance_row.record_id, c))
                                                          .collect();
        self.store.create_node_instance(&instance_row, &candidates)?;
        debug!("pendiente {} en {} para {:?}", instance_row.record_id, node.code, candidate_ids);
        result.next_nodes.push(NextNode { node_id: node.record_id.clone(),
                                          node_code: node.code.clone(),
                                          node_name: node.name.clone(),
                                          node_instance_id: instance_row.record_id,
                                          candidate_ids });
        Ok(())
    }

    /// Une los resultados de todas las asignaciones del nodo, deduplicados y
    /// en orden. La lista final no puede ser vacía.
    fn resolve_candidates(&self, node: &Node, vars_map: &VarMap) -> Result<Vec<String>, EngineError> {
        let assignments = self.store.query_node_assignments(&node.record_id)?;
        let mut ids: Vec<String> = Vec::new();
        for assignment in &assignments {
            match self.execer.eval(&assignment.expression, vars_map) {
                Ok(value) => collect_candidate_ids(&value, &mut ids),
                Err(e) => warn!("asignación {:?} en {}: {e}; omitida", assignment.expression, node.code),
            }
        }
        let mut seen = HashSet::new();
        ids.retain(|id| seen.insert(id.clone()));
        if ids.is_empty() {
            return Err(EngineError::NoCandidate(node.code.clone()));
        }
        Ok(ids)
    }

    /// Llegada de una rama a un join (gateway con más de una entrada).
    ///
    /// Se mantiene a lo sumo una instancia pendiente del join por instancia
    /// de flujo: cada llegada crea una fila fresca (con las variables de
    /// todas las ramas acumuladas) y cancela la pendiente anterior. Llegadas
    /// hasta ahora = canceladas + 1. Con todas las ramas esperadas el join se
    /// auto-procesa y el avance continúa.
    fn enter_join(&self,
                  instance: &FlowInstance,
                  join: &Node,
                  prev_instance_id: &str,
                  vars_map: &VarMap,
                  user_id: &str,
                  result: &mut HandleResult,
                  depth: usize)
                  -> Result<(), EngineError> {
        let siblings = self.store.query_node_instances(&instance.record_id)?;
        let pending = siblings.iter()
                              .find(|n| n.node_id == join.record_id && n.status == NODE_INSTANCE_PENDING);
        let cancelled = siblings.iter()
                                .filter(|n| n.node_id == join.record_id && n.status == NODE_INSTANCE_CANCELLED)
                                .count();
        let arrived = cancelled + usize::from(pending.is_some()) + 1;
        let expected = self.expected_arrivals(join, &siblings, prev_instance_id)?;

        let joined_vars = match pending {
            Some(p) => vars::merge(vars::decode(&p.input_data)?, vars_map),
            None => vars_map.clone(),
        };
        if let Some(p) = pending {
            self.store.cancel_node_instance(&p.record_id)?;
        }
        debug!("join {}: llegada {arrived}/{expected}", join.code);

        if arrived >= expected {
            let instance_row = NodeInstance::processed(&instance.record_id,
                                                       &join.record_id,
                                                       Some(prev_instance_id),
                                                       vars::encode(&joined_vars),
                                                       user_id);
            let row_id = instance_row.record_id.clone();
            self.store.create_node_instance(&instance_row, &[])?;
            self.advance(instance, join, &row_id, &joined_vars, user_id, result, depth + 1)
        } else {
            let instance_row = NodeInstance::pending(&instance.record_id,
                                                     &join.record_id,
                                                     Some(prev_instance_id),
                                                     vars::encode(&joined_vars));
            self.store.create_node_instance(&instance_row, &[])?;
            Ok(())
        }
    }

    /// Cuántas llegadas espera el join: el grado de salida del fork para un
    /// join paralelo, o las ramas efectivamente instanciadas en el fork para
    /// un join inclusivo (sincronización parcial). El fork se localiza
    /// subiendo por la cadena `prev_node_instance_id` de la rama que llega.
    fn expected_arrivals(&self, join: &Node, siblings: &[NodeInstance], prev_instance_id: &str)
                         -> Result<usize, EngineError> {
        let by_id: HashMap<&str, &NodeInstance> =
            siblings.iter().map(|n| (n.record_id.as_str(), n)).collect();

        let mut cursor = by_id.get(prev_instance_id).copied();
        let mut fork: Option<(String, usize)> = None;
        while let Some(step) = cursor {
            if let Some(node) = self.store.get_node(&step.node_id)? {
                if matches!(node.type_code,
                            NodeTypeCode::ParallelGateway | NodeTypeCode::InclusiveGateway)
                {
                    let out_degree = self.store.query_node_routers(&node.record_id)?.len();
                    if out_degree > 1 {
                        fork = Some((step.record_id.clone(), out_degree));
                        break;
                    }
                }
            }
            cursor = step.prev_node_instance_id
                         .as_deref()
                         .and_then(|p| by_id.get(p))
                         .copied();
        }

        match (join.type_code, fork) {
            (NodeTypeCode::InclusiveGateway, Some((fork_instance_id, _))) => {
                Ok(siblings.iter()
                           .filter(|n| n.prev_node_instance_id.as_deref() == Some(fork_instance_id.as_str()))
                           .count())
            }
            (_, Some((_, out_degree))) => Ok(out_degree),
            // sin fork localizable: degradar al grado de entrada del join
            (_, None) => Ok(self.store.query_node_inflows(&join.record_id)?.len()),
        }
    }

    /// Invariante de cierre: la instancia completa sii no queda ninguna
    /// instancia de nodo pendiente.
    fn finish_if_idle(&self, instance: &FlowInstance, result: &mut HandleResult) -> Result<(), EngineError> {
        if !self.store.check_flow_instance_todo(&instance.record_id)? {
            self.store
                .update_flow_instance_status(&instance.record_id, FLOW_INSTANCE_COMPLETED)?;
            result.is_end = true;
            debug!("instancia {} completada", instance.record_id);
        }
        Ok(())
    }
}

/// Aplana el resultado de una asignación a ids de usuario: cadena (admite
/// lista separada por comas), lista de cadenas, o número convertido.
fn collect_candidate_ids(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            out.extend(s.split(',').map(str::trim).filter(|p| !p.is_empty()).map(String::from));
        }
        Value::Array(items) => {
            for item in items {
                collect_candidate_ids(item, out);
            }
        }
        Value::Number(n) => out.push(n.to_string()),
        _ => {}
    }
}

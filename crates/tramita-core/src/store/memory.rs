//! Store en memoria.
//!
//! Mismo contrato que el backend Postgres, respaldado por vectores bajo un
//! `Mutex` (el orden de inserción hace de id autoincremental). Lo usan los
//! tests del motor y cualquier uso efímero sin base de datos.

use std::sync::Mutex;

use crate::constants::*;
use crate::model::{now_unix, Flow, FlowInstance, HistoryItem, Node, NodeAssignment, NodeCandidate, NodeInstance,
                   NodeRouter, NodeTypeCode, TodoItem};
use crate::parser::ParseResult;
use crate::store::{FlowStore, StoreError};

#[derive(Default)]
struct Tables {
    flows: Vec<Flow>,
    nodes: Vec<Node>,
    routers: Vec<NodeRouter>,
    assignments: Vec<NodeAssignment>,
    forms: Vec<crate::model::Form>,
    flow_instances: Vec<FlowInstance>,
    node_instances: Vec<NodeInstance>,
    candidates: Vec<NodeCandidate>,
}

#[derive(Default)]
pub struct MemoryFlowStore {
    tables: Mutex<Tables>,
}

impl MemoryFlowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn live<'a, T>(rows: &'a [T], deleted: impl Fn(&T) -> i64 + 'a) -> impl Iterator<Item = &'a T> {
    rows.iter().filter(move |r| deleted(r) == 0)
}

impl FlowStore for MemoryFlowStore {
    fn create_flow(&self, graph: &ParseResult, supersede: Option<&str>) -> Result<(), StoreError> {
        let mut t = self.tables.lock().unwrap();
        if let Some(prev_id) = supersede {
            let prev = t.flows
                        .iter_mut()
                        .find(|f| f.record_id == prev_id && f.deleted == 0)
                        .ok_or(StoreError::NotFound)?;
            prev.flag = FLOW_FLAG_REPLACED;
        }
        t.flows.push(graph.flow.clone());
        t.nodes.extend(graph.nodes.iter().cloned());
        t.routers.extend(graph.routers.iter().cloned());
        t.assignments.extend(graph.assignments.iter().cloned());
        t.forms.extend(graph.forms.iter().cloned());
        Ok(())
    }

    fn get_flow_by_code(&self, code: &str) -> Result<Option<Flow>, StoreError> {
        let t = self.tables.lock().unwrap();
        Ok(live(&t.flows, |f| f.deleted).filter(|f| {
                                            f.code == code
                                            && f.flag == FLOW_FLAG_ACTIVE
                                            && f.status == FLOW_STATUS_ENABLED
                                        })
                                        .max_by_key(|f| f.version)
                                        .cloned())
    }

    fn get_latest_flow_by_code(&self, code: &str) -> Result<Option<Flow>, StoreError> {
        let t = self.tables.lock().unwrap();
        Ok(live(&t.flows, |f| f.deleted).filter(|f| f.code == code && f.flag == FLOW_FLAG_ACTIVE)
                                        .max_by_key(|f| f.version)
                                        .cloned())
    }

    fn get_node(&self, record_id: &str) -> Result<Option<Node>, StoreError> {
        let t = self.tables.lock().unwrap();
        let result = live(&t.nodes, |n| n.deleted).find(|n| n.record_id == record_id)
                                        .cloned();
        Ok(result)
    }

    fn get_node_by_code(&self, flow_id: &str, code: &str) -> Result<Option<Node>, StoreError> {
        let t = self.tables.lock().unwrap();
        Ok(live(&t.nodes, |n| n.deleted).filter(|n| n.flow_id == flow_id && n.code == code)
                                        .min_by_key(|n| n.order_num)
                                        .cloned())
    }

    fn query_node_routers(&self, source_node_id: &str) -> Result<Vec<NodeRouter>, StoreError> {
        let t = self.tables.lock().unwrap();
        Ok(live(&t.routers, |r| r.deleted).filter(|r| r.source_node_id == source_node_id)
                                          .cloned()
                                          .collect())
    }

    fn query_node_inflows(&self, target_node_id: &str) -> Result<Vec<NodeRouter>, StoreError> {
        let t = self.tables.lock().unwrap();
        Ok(live(&t.routers, |r| r.deleted).filter(|r| r.target_node_id == target_node_id)
                                          .cloned()
                                          .collect())
    }

    fn query_node_assignments(&self, node_id: &str) -> Result<Vec<NodeAssignment>, StoreError> {
        let t = self.tables.lock().unwrap();
        Ok(live(&t.assignments, |a| a.deleted).filter(|a| a.node_id == node_id)
                                              .cloned()
                                              .collect())
    }

    fn delete_flow(&self, flow_id: &str) -> Result<(), StoreError> {
        let mut t = self.tables.lock().unwrap();
        let ts = now_unix();
        let node_ids: Vec<String> = t.nodes
                                     .iter()
                                     .filter(|n| n.flow_id == flow_id && n.deleted == 0)
                                     .map(|n| n.record_id.clone())
                                     .collect();

        for f in t.flows.iter_mut().filter(|f| f.record_id == flow_id && f.deleted == 0) {
            f.deleted = ts;
        }
        for r in t.routers
                  .iter_mut()
                  .filter(|r| r.deleted == 0 && node_ids.contains(&r.source_node_id))
        {
            r.deleted = ts;
        }
        for a in t.assignments
                  .iter_mut()
                  .filter(|a| a.deleted == 0 && node_ids.contains(&a.node_id))
        {
            a.deleted = ts;
        }
        for n in t.nodes.iter_mut().filter(|n| n.flow_id == flow_id && n.deleted == 0) {
            n.deleted = ts;
        }
        for f in t.forms.iter_mut().filter(|f| f.flow_id == flow_id && f.deleted == 0) {
            f.deleted = ts;
        }
        Ok(())
    }

    fn create_flow_instance(&self, instance: &FlowInstance, node_instances: &[NodeInstance])
                            -> Result<(), StoreError> {
        let mut t = self.tables.lock().unwrap();
        t.flow_instances.push(instance.clone());
        t.node_instances.extend(node_instances.iter().cloned());
        Ok(())
    }

    fn get_flow_instance(&self, record_id: &str) -> Result<Option<FlowInstance>, StoreError> {
        let t = self.tables.lock().unwrap();
        let result = live(&t.flow_instances, |i| i.deleted).find(|i| i.record_id == record_id)
                                                 .cloned();
        Ok(result)
    }

    fn get_flow_instance_by_node(&self, node_instance_id: &str) -> Result<Option<FlowInstance>, StoreError> {
        let t = self.tables.lock().unwrap();
        let Some(ni) = live(&t.node_instances, |n| n.deleted).find(|n| n.record_id == node_instance_id) else {
            return Ok(None);
        };
        let flow_instance_id = ni.flow_instance_id.clone();
        let result = live(&t.flow_instances, |i| i.deleted).find(|i| i.record_id == flow_instance_id)
                                                 .cloned();
        Ok(result)
    }

    fn update_flow_instance_status(&self, record_id: &str, status: i16) -> Result<(), StoreError> {
        let mut t = self.tables.lock().unwrap();
        let instance = t.flow_instances
                        .iter_mut()
                        .find(|i| i.record_id == record_id && i.deleted == 0)
                        .ok_or(StoreError::NotFound)?;
        instance.status = status;
        Ok(())
    }

    fn create_node_instance(&self, instance: &NodeInstance, candidates: &[NodeCandidate]) -> Result<(), StoreError> {
        let mut t = self.tables.lock().unwrap();
        t.node_instances.push(instance.clone());
        t.candidates.extend(candidates.iter().cloned());
        Ok(())
    }

    fn get_node_instance(&self, record_id: &str) -> Result<Option<NodeInstance>, StoreError> {
        let t = self.tables.lock().unwrap();
        let result = live(&t.node_instances, |n| n.deleted).find(|n| n.record_id == record_id)
                                                 .cloned();
        Ok(result)
    }

    fn claim_node_instance(&self, record_id: &str, processor: &str, process_time: i64, out_data: &[u8])
                           -> Result<bool, StoreError> {
        let mut t = self.tables.lock().unwrap();
        let Some(instance) = t.node_instances
                              .iter_mut()
                              .find(|n| n.record_id == record_id && n.deleted == 0)
        else {
            return Ok(false);
        };
        if instance.status != NODE_INSTANCE_PENDING {
            return Ok(false);
        }
        instance.status = NODE_INSTANCE_PROCESSED;
        instance.processor = Some(processor.to_string());
        instance.process_time = Some(process_time);
        instance.out_data = out_data.to_vec();
        Ok(true)
    }

    fn cancel_node_instance(&self, record_id: &str) -> Result<(), StoreError> {
        let mut t = self.tables.lock().unwrap();
        let instance = t.node_instances
                        .iter_mut()
                        .find(|n| n.record_id == record_id && n.deleted == 0)
                        .ok_or(StoreError::NotFound)?;
        instance.status = NODE_INSTANCE_CANCELLED;
        Ok(())
    }

    fn query_node_instances(&self, flow_instance_id: &str) -> Result<Vec<NodeInstance>, StoreError> {
        let t = self.tables.lock().unwrap();
        Ok(live(&t.node_instances, |n| n.deleted).filter(|n| n.flow_instance_id == flow_instance_id)
                                                 .cloned()
                                                 .collect())
    }

    fn query_node_candidates(&self, node_instance_id: &str) -> Result<Vec<NodeCandidate>, StoreError> {
        let t = self.tables.lock().unwrap();
        Ok(live(&t.candidates, |c| c.deleted).filter(|c| c.node_instance_id == node_instance_id)
                                             .cloned()
                                             .collect())
    }

    fn check_flow_instance_todo(&self, flow_instance_id: &str) -> Result<bool, StoreError> {
        let t = self.tables.lock().unwrap();
        let result = live(&t.node_instances, |n| n.deleted).any(|n| {
                                                     n.flow_instance_id == flow_instance_id
                                                     && n.status == NODE_INSTANCE_PENDING
                                                 });
        Ok(result)
    }

    fn query_todo(&self, flow_code: Option<&str>, user_id: &str) -> Result<Vec<TodoItem>, StoreError> {
        let t = self.tables.lock().unwrap();
        let mut items = Vec::new();
        for ni in live(&t.node_instances, |n| n.deleted).filter(|n| n.status == NODE_INSTANCE_PENDING) {
            let Some(fi) = live(&t.flow_instances, |i| i.deleted).find(|i| {
                               i.record_id == ni.flow_instance_id && i.status == FLOW_INSTANCE_RUNNING
                           })
            else {
                continue;
            };
            if let Some(code) = flow_code {
                let matches = live(&t.flows, |f| f.deleted).any(|f| {
                                  f.record_id == fi.flow_id && f.flag == FLOW_FLAG_ACTIVE && f.code == code
                              });
                if !matches {
                    continue;
                }
            }
            let is_candidate = live(&t.candidates, |c| c.deleted).any(|c| {
                                   c.node_instance_id == ni.record_id && c.candidate_id == user_id
                               });
            if !is_candidate {
                continue;
            }
            let node = live(&t.nodes, |n| n.deleted).find(|n| n.record_id == ni.node_id);
            let form = node.and_then(|n| n.form_id.as_deref())
                           .and_then(|fid| live(&t.forms, |f| f.deleted).find(|f| f.record_id == fid));
            items.push(TodoItem { record_id: ni.record_id.clone(),
                                  flow_instance_id: ni.flow_instance_id.clone(),
                                  node_id: ni.node_id.clone(),
                                  node_code: node.map(|n| n.code.clone()).unwrap_or_default(),
                                  node_name: node.map(|n| n.name.clone()).unwrap_or_default(),
                                  input_data: ni.input_data.clone(),
                                  form_type: form.map(|f| f.type_code.clone()),
                                  form_data: form.map(|f| f.data.clone()),
                                  launcher: fi.launcher.clone(),
                                  launch_time: fi.launch_time });
        }
        Ok(items)
    }

    fn query_history(&self, flow_instance_id: &str) -> Result<Vec<HistoryItem>, StoreError> {
        let t = self.tables.lock().unwrap();
        let mut items: Vec<HistoryItem> = Vec::new();
        for ni in live(&t.node_instances, |n| n.deleted).filter(|n| n.flow_instance_id == flow_instance_id) {
            let Some(node) = live(&t.nodes, |n| n.deleted).find(|n| {
                                 n.record_id == ni.node_id && n.type_code == NodeTypeCode::UserTask
                             })
            else {
                continue;
            };
            items.push(HistoryItem { record_id: ni.record_id.clone(),
                                     node_code: node.code.clone(),
                                     node_name: node.name.clone(),
                                     processor: ni.processor.clone(),
                                     process_time: ni.process_time,
                                     out_data: ni.out_data.clone(),
                                     status: ni.status });
        }
        items.sort_by(|a, b| {
                 b.status
                  .cmp(&a.status)
                  .then(a.process_time.unwrap_or(0).cmp(&b.process_time.unwrap_or(0)))
             });
        Ok(items)
    }
}

//! Implementación Postgres (Diesel) del contrato `FlowStore`.
//!
//! Cada operación mutadora corre dentro de
//! `build_transaction().read_write()`: si falla cualquier inserción se
//! revierte la unidad completa. Las lecturas y escrituras pasan por un retry
//! corto con backoff para errores transitorios de pool/conexión. La carrera
//! de decisión sobre una instancia de nodo se resuelve por CAS
//! (`UPDATE ... WHERE status = 1`, contando filas afectadas), sin locks
//! advisory.

use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager, PooledConnection};
use diesel::sql_types::{BigInt, Binary, Nullable, SmallInt, Text};
use log::{debug, warn};

use tramita_core::constants::{FLOW_FLAG_ACTIVE, FLOW_FLAG_REPLACED, FLOW_STATUS_ENABLED, NODE_INSTANCE_CANCELLED,
                              NODE_INSTANCE_PENDING, NODE_INSTANCE_PROCESSED};
use tramita_core::model::{now_unix, Flow, FlowInstance, HistoryItem, Node, NodeAssignment, NodeCandidate,
                          NodeInstance, NodeRouter, NodeTypeCode, TodoItem};
use tramita_core::parser::ParseResult;
use tramita_core::store::{FlowStore, StoreError};

use crate::config::DbConfig;
use crate::error::PersistenceError;
use crate::migrations::run_pending_migrations;
use crate::schema::{f_flow, f_flow_instance, f_form, f_node, f_node_assignment, f_node_candidate, f_node_instance,
                    f_node_property, f_node_router};

/// Alias del pool r2d2 de conexiones Postgres.
pub type PgPool = r2d2::Pool<ConnectionManager<PgConnection>>;

type PgConn = PooledConnection<ConnectionManager<PgConnection>>;

/// Construye el pool según la configuración y corre las migraciones
/// pendientes una vez.
pub fn build_pool(cfg: &DbConfig) -> Result<PgPool, PersistenceError> {
    let manager = ConnectionManager::<PgConnection>::new(&cfg.url);
    let pool = r2d2::Pool::builder().min_idle(Some(cfg.min_connections))
                                    .max_size(cfg.max_connections)
                                    .max_lifetime(Some(cfg.max_lifetime))
                                    .build(manager)
                                    .map_err(|e| PersistenceError::TransientIo(format!("pool error: {e}")))?;
    let mut conn = pool.get()
                       .map_err(|e| PersistenceError::TransientIo(format!("pool error: {e}")))?;
    run_pending_migrations(&mut conn)?;
    Ok(pool)
}

/// Determina si conviene reintentar la unidad de trabajo.
fn is_retryable(e: &PersistenceError) -> bool {
    match e {
        PersistenceError::SerializationConflict => true,
        PersistenceError::TransientIo(_) => true,
        PersistenceError::Unknown(msg) => {
            let m = msg.to_lowercase();
            m.contains("deadlock detected")
            || m.contains("connection closed")
            || m.contains("connection refused")
            || m.contains("timeout")
        }
        _ => false,
    }
}

/// Retry con backoff pequeño (hasta 3 intentos: 15/30/45 ms). Sólo repite la
/// unidad de trabajo provista; no altera semántica.
fn with_retry<F, T>(mut f: F) -> Result<T, PersistenceError>
    where F: FnMut() -> Result<T, PersistenceError>
{
    let mut attempts = 0;
    loop {
        match f() {
            Err(e) if is_retryable(&e) && attempts < 3 => {
                let delay_ms = 15 * ((attempts + 1) as u64);
                warn!("retryable error (attempt {}): {:?} -> sleeping {}ms", attempts + 1, e, delay_ms);
                std::thread::sleep(std::time::Duration::from_millis(delay_ms));
                attempts += 1;
            }
            r => return r,
        }
    }
}

// ---- filas Diesel --------------------------------------------------------

#[derive(Queryable)]
struct FlowRow {
    _id: i64,
    record_id: String,
    created: i64,
    deleted: i64,
    code: String,
    version: i64,
    name: String,
    type_code: String,
    status: i16,
    flag: i16,
    memo: String,
    content_hash: String,
}

impl From<FlowRow> for Flow {
    fn from(r: FlowRow) -> Self {
        Flow { record_id: r.record_id,
               created: r.created,
               deleted: r.deleted,
               code: r.code,
               version: r.version,
               name: r.name,
               type_code: r.type_code,
               status: r.status,
               flag: r.flag,
               memo: r.memo,
               content_hash: r.content_hash }
    }
}

#[derive(Queryable)]
struct NodeRow {
    _id: i64,
    record_id: String,
    created: i64,
    deleted: i64,
    flow_id: String,
    code: String,
    name: String,
    type_code: String,
    form_id: Option<String>,
    order_num: i64,
}

impl TryFrom<NodeRow> for Node {
    type Error = PersistenceError;

    fn try_from(r: NodeRow) -> Result<Self, PersistenceError> {
        let type_code = NodeTypeCode::parse(&r.type_code)
            .ok_or_else(|| PersistenceError::Unknown(format!("node {}: unknown type_code {}", r.record_id, r.type_code)))?;
        Ok(Node { record_id: r.record_id,
                  created: r.created,
                  deleted: r.deleted,
                  flow_id: r.flow_id,
                  code: r.code,
                  name: r.name,
                  type_code,
                  form_id: r.form_id,
                  order_num: r.order_num })
    }
}

#[derive(Queryable)]
struct RouterRow {
    _id: i64,
    record_id: String,
    created: i64,
    deleted: i64,
    source_node_id: String,
    target_node_id: String,
    expression: String,
    explain: String,
}

impl From<RouterRow> for NodeRouter {
    fn from(r: RouterRow) -> Self {
        NodeRouter { record_id: r.record_id,
                     created: r.created,
                     deleted: r.deleted,
                     source_node_id: r.source_node_id,
                     target_node_id: r.target_node_id,
                     expression: r.expression,
                     explain: r.explain }
    }
}

#[derive(Queryable)]
struct AssignmentRow {
    _id: i64,
    record_id: String,
    created: i64,
    deleted: i64,
    node_id: String,
    expression: String,
}

impl From<AssignmentRow> for NodeAssignment {
    fn from(r: AssignmentRow) -> Self {
        NodeAssignment { record_id: r.record_id,
                         created: r.created,
                         deleted: r.deleted,
                         node_id: r.node_id,
                         expression: r.expression }
    }
}

#[derive(Queryable)]
struct FlowInstanceRow {
    _id: i64,
    record_id: String,
    created: i64,
    deleted: i64,
    flow_id: String,
    launcher: String,
    launch_time: i64,
    status: i16,
}

impl From<FlowInstanceRow> for FlowInstance {
    fn from(r: FlowInstanceRow) -> Self {
        FlowInstance { record_id: r.record_id,
                       created: r.created,
                       deleted: r.deleted,
                       flow_id: r.flow_id,
                       launcher: r.launcher,
                       launch_time: r.launch_time,
                       status: r.status }
    }
}

#[derive(Queryable)]
struct NodeInstanceRow {
    _id: i64,
    record_id: String,
    created: i64,
    deleted: i64,
    flow_instance_id: String,
    node_id: String,
    prev_node_instance_id: Option<String>,
    input_data: Vec<u8>,
    out_data: Vec<u8>,
    processor: Option<String>,
    process_time: Option<i64>,
    status: i16,
}

impl From<NodeInstanceRow> for NodeInstance {
    fn from(r: NodeInstanceRow) -> Self {
        NodeInstance { record_id: r.record_id,
                       created: r.created,
                       deleted: r.deleted,
                       flow_instance_id: r.flow_instance_id,
                       node_id: r.node_id,
                       prev_node_instance_id: r.prev_node_instance_id,
                       input_data: r.input_data,
                       out_data: r.out_data,
                       processor: r.processor,
                       process_time: r.process_time,
                       status: r.status }
    }
}

#[derive(Queryable)]
struct CandidateRow {
    _id: i64,
    record_id: String,
    created: i64,
    deleted: i64,
    node_instance_id: String,
    candidate_id: String,
}

impl From<CandidateRow> for NodeCandidate {
    fn from(r: CandidateRow) -> Self {
        NodeCandidate { record_id: r.record_id,
                        created: r.created,
                        deleted: r.deleted,
                        node_instance_id: r.node_instance_id,
                        candidate_id: r.candidate_id }
    }
}

#[derive(Insertable)]
#[diesel(table_name = f_flow)]
struct NewFlowRow<'a> {
    record_id: &'a str,
    created: i64,
    deleted: i64,
    code: &'a str,
    version: i64,
    name: &'a str,
    type_code: &'a str,
    status: i16,
    flag: i16,
    memo: &'a str,
    content_hash: &'a str,
}

#[derive(Insertable)]
#[diesel(table_name = f_node)]
struct NewNodeRow<'a> {
    record_id: &'a str,
    created: i64,
    deleted: i64,
    flow_id: &'a str,
    code: &'a str,
    name: &'a str,
    type_code: &'a str,
    form_id: Option<&'a str>,
    order_num: i64,
}

#[derive(Insertable)]
#[diesel(table_name = f_node_router)]
struct NewRouterRow<'a> {
    record_id: &'a str,
    created: i64,
    deleted: i64,
    source_node_id: &'a str,
    target_node_id: &'a str,
    expression: &'a str,
    explain: &'a str,
}

#[derive(Insertable)]
#[diesel(table_name = f_node_assignment)]
struct NewAssignmentRow<'a> {
    record_id: &'a str,
    created: i64,
    deleted: i64,
    node_id: &'a str,
    expression: &'a str,
}

#[derive(Insertable)]
#[diesel(table_name = f_form)]
struct NewFormRow<'a> {
    record_id: &'a str,
    created: i64,
    deleted: i64,
    flow_id: &'a str,
    type_code: &'a str,
    data: &'a str,
}

#[derive(Insertable)]
#[diesel(table_name = f_flow_instance)]
struct NewFlowInstanceRow<'a> {
    record_id: &'a str,
    created: i64,
    deleted: i64,
    flow_id: &'a str,
    launcher: &'a str,
    launch_time: i64,
    status: i16,
}

#[derive(Insertable)]
#[diesel(table_name = f_node_instance)]
struct NewNodeInstanceRow<'a> {
    record_id: &'a str,
    created: i64,
    deleted: i64,
    flow_instance_id: &'a str,
    node_id: &'a str,
    prev_node_instance_id: Option<&'a str>,
    input_data: &'a [u8],
    out_data: &'a [u8],
    processor: Option<&'a str>,
    process_time: Option<i64>,
    status: i16,
}

#[derive(Insertable)]
#[diesel(table_name = f_node_candidate)]
struct NewCandidateRow<'a> {
    record_id: &'a str,
    created: i64,
    deleted: i64,
    node_instance_id: &'a str,
    candidate_id: &'a str,
}

fn new_node_instance_row<'a>(instance: &'a NodeInstance) -> NewNodeInstanceRow<'a> {
    NewNodeInstanceRow { record_id: &instance.record_id,
                         created: instance.created,
                         deleted: instance.deleted,
                         flow_instance_id: &instance.flow_instance_id,
                         node_id: &instance.node_id,
                         prev_node_instance_id: instance.prev_node_instance_id.as_deref(),
                         input_data: &instance.input_data,
                         out_data: &instance.out_data,
                         processor: instance.processor.as_deref(),
                         process_time: instance.process_time,
                         status: instance.status }
}

// ---- filas de consultas con join ----------------------------------------

#[derive(QueryableByName)]
struct TodoRow {
    #[diesel(sql_type = Text)]
    record_id: String,
    #[diesel(sql_type = Text)]
    flow_instance_id: String,
    #[diesel(sql_type = Text)]
    node_id: String,
    #[diesel(sql_type = Binary)]
    input_data: Vec<u8>,
    #[diesel(sql_type = Nullable<Text>)]
    node_code: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    node_name: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    form_type: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    form_data: Option<String>,
    #[diesel(sql_type = Text)]
    launcher: String,
    #[diesel(sql_type = BigInt)]
    launch_time: i64,
}

#[derive(QueryableByName)]
struct HistoryRow {
    #[diesel(sql_type = Text)]
    record_id: String,
    #[diesel(sql_type = Text)]
    node_code: String,
    #[diesel(sql_type = Text)]
    node_name: String,
    #[diesel(sql_type = Nullable<Text>)]
    processor: Option<String>,
    #[diesel(sql_type = Nullable<BigInt>)]
    process_time: Option<i64>,
    #[diesel(sql_type = Binary)]
    out_data: Vec<u8>,
    #[diesel(sql_type = SmallInt)]
    status: i16,
}

const TODO_QUERY: &str = "
    SELECT ni.record_id, ni.flow_instance_id, ni.node_id, ni.input_data,
           n.code AS node_code, n.name AS node_name,
           f.type_code AS form_type, f.data AS form_data,
           fi.launcher, fi.launch_time
    FROM f_node_instance ni
      JOIN f_flow_instance fi ON ni.flow_instance_id = fi.record_id AND fi.deleted = 0
      LEFT JOIN f_node n ON ni.node_id = n.record_id AND n.deleted = 0
      LEFT JOIN f_form f ON n.form_id = f.record_id AND f.deleted = 0
    WHERE ni.deleted = 0 AND ni.status = 1 AND fi.status = 1
      AND ni.record_id IN (SELECT node_instance_id FROM f_node_candidate
                           WHERE deleted = 0 AND candidate_id = $1)";

const HISTORY_QUERY: &str = "
    SELECT ni.record_id, n.code AS node_code, n.name AS node_name,
           ni.processor, ni.process_time, ni.out_data, ni.status
    FROM f_node_instance ni
      JOIN f_node n ON ni.node_id = n.record_id AND n.deleted = 0
    WHERE ni.deleted = 0 AND ni.flow_instance_id = $1 AND n.type_code = 'userTask'
    ORDER BY ni.status DESC, ni.process_time";

// ---- el store ------------------------------------------------------------

pub struct PgFlowStore {
    pool: PgPool,
}

impl PgFlowStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Pool + migraciones + store en un paso, desde `DbConfig`.
    pub fn connect(cfg: &DbConfig) -> Result<Self, PersistenceError> {
        Ok(Self::new(build_pool(cfg)?))
    }

    fn conn(&self) -> Result<PgConn, PersistenceError> {
        self.pool
            .get()
            .map_err(|e| PersistenceError::TransientIo(format!("pool error: {e}")))
    }
}

impl FlowStore for PgFlowStore {
    fn create_flow(&self, graph: &ParseResult, supersede: Option<&str>) -> Result<(), StoreError> {
        with_retry(|| {
            let mut conn = self.conn()?;
            conn.build_transaction()
                .read_write()
                .run(|tx| {
                    if let Some(prev_id) = supersede {
                        let updated =
                            diesel::update(f_flow::table.filter(f_flow::record_id.eq(prev_id))
                                                        .filter(f_flow::deleted.eq(0)))
                                .set(f_flow::flag.eq(FLOW_FLAG_REPLACED))
                                .execute(tx)?;
                        if updated == 0 {
                            return Err(diesel::result::Error::NotFound);
                        }
                    }

                    let fl = &graph.flow;
                    diesel::insert_into(f_flow::table)
                        .values(NewFlowRow { record_id: &fl.record_id,
                                             created: fl.created,
                                             deleted: fl.deleted,
                                             code: &fl.code,
                                             version: fl.version,
                                             name: &fl.name,
                                             type_code: &fl.type_code,
                                             status: fl.status,
                                             flag: fl.flag,
                                             memo: &fl.memo,
                                             content_hash: &fl.content_hash })
                        .execute(tx)?;

                    let nodes: Vec<NewNodeRow<'_>> =
                        graph.nodes
                             .iter()
                             .map(|n| NewNodeRow { record_id: &n.record_id,
                                                   created: n.created,
                                                   deleted: n.deleted,
                                                   flow_id: &n.flow_id,
                                                   code: &n.code,
                                                   name: &n.name,
                                                   type_code: n.type_code.as_str(),
                                                   form_id: n.form_id.as_deref(),
                                                   order_num: n.order_num })
                             .collect();
                    if !nodes.is_empty() {
                        diesel::insert_into(f_node::table).values(&nodes).execute(tx)?;
                    }

                    let routers: Vec<NewRouterRow<'_>> =
                        graph.routers
                             .iter()
                             .map(|r| NewRouterRow { record_id: &r.record_id,
                                                     created: r.created,
                                                     deleted: r.deleted,
                                                     source_node_id: &r.source_node_id,
                                                     target_node_id: &r.target_node_id,
                                                     expression: &r.expression,
                                                     explain: &r.explain })
                             .collect();
                    if !routers.is_empty() {
                        diesel::insert_into(f_node_router::table).values(&routers).execute(tx)?;
                    }

                    let assignments: Vec<NewAssignmentRow<'_>> =
                        graph.assignments
                             .iter()
                             .map(|a| NewAssignmentRow { record_id: &a.record_id,
                                                         created: a.created,
                                                         deleted: a.deleted,
                                                         node_id: &a.node_id,
                                                         expression: &a.expression })
                             .collect();
                    if !assignments.is_empty() {
                        diesel::insert_into(f_node_assignment::table).values(&assignments).execute(tx)?;
                    }

                    let forms: Vec<NewFormRow<'_>> =
                        graph.forms
                             .iter()
                             .map(|f| NewFormRow { record_id: &f.record_id,
                                                   created: f.created,
                                                   deleted: f.deleted,
                                                   flow_id: &f.flow_id,
                                                   type_code: &f.type_code,
                                                   data: &f.data })
                             .collect();
                    if !forms.is_empty() {
                        diesel::insert_into(f_form::table).values(&forms).execute(tx)?;
                    }

                    Ok(())
                })
                .map_err(PersistenceError::from)
        }).map_err(Into::into)
    }

    fn get_flow_by_code(&self, code: &str) -> Result<Option<Flow>, StoreError> {
        let row: Option<FlowRow> = with_retry(|| {
            let mut conn = self.conn()?;
            f_flow::table.filter(f_flow::deleted.eq(0))
                         .filter(f_flow::flag.eq(FLOW_FLAG_ACTIVE))
                         .filter(f_flow::status.eq(FLOW_STATUS_ENABLED))
                         .filter(f_flow::code.eq(code))
                         .order(f_flow::version.desc())
                         .first(&mut conn)
                         .optional()
                         .map_err(PersistenceError::from)
        })?;
        Ok(row.map(Flow::from))
    }

    fn get_latest_flow_by_code(&self, code: &str) -> Result<Option<Flow>, StoreError> {
        let row: Option<FlowRow> = with_retry(|| {
            let mut conn = self.conn()?;
            f_flow::table.filter(f_flow::deleted.eq(0))
                         .filter(f_flow::flag.eq(FLOW_FLAG_ACTIVE))
                         .filter(f_flow::code.eq(code))
                         .order(f_flow::version.desc())
                         .first(&mut conn)
                         .optional()
                         .map_err(PersistenceError::from)
        })?;
        Ok(row.map(Flow::from))
    }

    fn get_node(&self, record_id: &str) -> Result<Option<Node>, StoreError> {
        let row: Option<NodeRow> = with_retry(|| {
            let mut conn = self.conn()?;
            f_node::table.filter(f_node::deleted.eq(0))
                         .filter(f_node::record_id.eq(record_id))
                         .first(&mut conn)
                         .optional()
                         .map_err(PersistenceError::from)
        })?;
        row.map(Node::try_from).transpose().map_err(Into::into)
    }

    fn get_node_by_code(&self, flow_id: &str, code: &str) -> Result<Option<Node>, StoreError> {
        let row: Option<NodeRow> = with_retry(|| {
            let mut conn = self.conn()?;
            f_node::table.filter(f_node::deleted.eq(0))
                         .filter(f_node::flow_id.eq(flow_id))
                         .filter(f_node::code.eq(code))
                         .order(f_node::order_num.asc())
                         .first(&mut conn)
                         .optional()
                         .map_err(PersistenceError::from)
        })?;
        row.map(Node::try_from).transpose().map_err(Into::into)
    }

    fn query_node_routers(&self, source_node_id: &str) -> Result<Vec<NodeRouter>, StoreError> {
        let rows: Vec<RouterRow> = with_retry(|| {
            let mut conn = self.conn()?;
            f_node_router::table.filter(f_node_router::deleted.eq(0))
                                .filter(f_node_router::source_node_id.eq(source_node_id))
                                .order(f_node_router::id.asc())
                                .load(&mut conn)
                                .map_err(PersistenceError::from)
        })?;
        Ok(rows.into_iter().map(NodeRouter::from).collect())
    }

    fn query_node_inflows(&self, target_node_id: &str) -> Result<Vec<NodeRouter>, StoreError> {
        let rows: Vec<RouterRow> = with_retry(|| {
            let mut conn = self.conn()?;
            f_node_router::table.filter(f_node_router::deleted.eq(0))
                                .filter(f_node_router::target_node_id.eq(target_node_id))
                                .order(f_node_router::id.asc())
                                .load(&mut conn)
                                .map_err(PersistenceError::from)
        })?;
        Ok(rows.into_iter().map(NodeRouter::from).collect())
    }

    fn query_node_assignments(&self, node_id: &str) -> Result<Vec<NodeAssignment>, StoreError> {
        let rows: Vec<AssignmentRow> = with_retry(|| {
            let mut conn = self.conn()?;
            f_node_assignment::table.filter(f_node_assignment::deleted.eq(0))
                                    .filter(f_node_assignment::node_id.eq(node_id))
                                    .order(f_node_assignment::id.asc())
                                    .load(&mut conn)
                                    .map_err(PersistenceError::from)
        })?;
        Ok(rows.into_iter().map(NodeAssignment::from).collect())
    }

    fn delete_flow(&self, flow_id: &str) -> Result<(), StoreError> {
        let ts = now_unix();
        with_retry(|| {
            let mut conn = self.conn()?;
            conn.build_transaction()
                .read_write()
                .run(|tx| {
                    let flow_nodes = || {
                        f_node::table.select(f_node::record_id)
                                     .filter(f_node::deleted.eq(0))
                                     .filter(f_node::flow_id.eq(flow_id))
                    };

                    diesel::update(f_flow::table.filter(f_flow::deleted.eq(0))
                                                .filter(f_flow::record_id.eq(flow_id)))
                        .set(f_flow::deleted.eq(ts))
                        .execute(tx)?;

                    diesel::update(f_node_router::table
                                       .filter(f_node_router::deleted.eq(0))
                                       .filter(f_node_router::source_node_id.eq_any(flow_nodes())))
                        .set(f_node_router::deleted.eq(ts))
                        .execute(tx)?;

                    diesel::update(f_node_assignment::table
                                       .filter(f_node_assignment::deleted.eq(0))
                                       .filter(f_node_assignment::node_id.eq_any(flow_nodes())))
                        .set(f_node_assignment::deleted.eq(ts))
                        .execute(tx)?;

                    diesel::update(f_node_property::table
                                       .filter(f_node_property::deleted.eq(0))
                                       .filter(f_node_property::node_id.eq_any(flow_nodes())))
                        .set(f_node_property::deleted.eq(ts))
                        .execute(tx)?;

                    diesel::update(f_node::table.filter(f_node::deleted.eq(0))
                                                .filter(f_node::flow_id.eq(flow_id)))
                        .set(f_node::deleted.eq(ts))
                        .execute(tx)?;

                    diesel::update(f_form::table.filter(f_form::deleted.eq(0))
                                                .filter(f_form::flow_id.eq(flow_id)))
                        .set(f_form::deleted.eq(ts))
                        .execute(tx)?;

                    Ok::<(), diesel::result::Error>(())
                })
                .map_err(PersistenceError::from)
        }).map_err(Into::into)
    }

    fn create_flow_instance(&self, instance: &FlowInstance, node_instances: &[NodeInstance])
                            -> Result<(), StoreError> {
        with_retry(|| {
            let mut conn = self.conn()?;
            conn.build_transaction()
                .read_write()
                .run(|tx| {
                    diesel::insert_into(f_flow_instance::table)
                        .values(NewFlowInstanceRow { record_id: &instance.record_id,
                                                     created: instance.created,
                                                     deleted: instance.deleted,
                                                     flow_id: &instance.flow_id,
                                                     launcher: &instance.launcher,
                                                     launch_time: instance.launch_time,
                                                     status: instance.status })
                        .execute(tx)?;

                    let rows: Vec<NewNodeInstanceRow<'_>> =
                        node_instances.iter().map(new_node_instance_row).collect();
                    if !rows.is_empty() {
                        diesel::insert_into(f_node_instance::table).values(&rows).execute(tx)?;
                    }
                    Ok::<(), diesel::result::Error>(())
                })
                .map_err(PersistenceError::from)
        }).map_err(Into::into)
    }

    fn get_flow_instance(&self, record_id: &str) -> Result<Option<FlowInstance>, StoreError> {
        let row: Option<FlowInstanceRow> = with_retry(|| {
            let mut conn = self.conn()?;
            f_flow_instance::table.filter(f_flow_instance::deleted.eq(0))
                                  .filter(f_flow_instance::record_id.eq(record_id))
                                  .first(&mut conn)
                                  .optional()
                                  .map_err(PersistenceError::from)
        })?;
        Ok(row.map(FlowInstance::from))
    }

    fn get_flow_instance_by_node(&self, node_instance_id: &str) -> Result<Option<FlowInstance>, StoreError> {
        let row: Option<FlowInstanceRow> = with_retry(|| {
            let mut conn = self.conn()?;
            let owner = f_node_instance::table.select(f_node_instance::flow_instance_id)
                                              .filter(f_node_instance::deleted.eq(0))
                                              .filter(f_node_instance::record_id.eq(node_instance_id));
            f_flow_instance::table.filter(f_flow_instance::deleted.eq(0))
                                  .filter(f_flow_instance::record_id.eq_any(owner))
                                  .first(&mut conn)
                                  .optional()
                                  .map_err(PersistenceError::from)
        })?;
        Ok(row.map(FlowInstance::from))
    }

    fn update_flow_instance_status(&self, record_id: &str, status: i16) -> Result<(), StoreError> {
        let updated = with_retry(|| {
            let mut conn = self.conn()?;
            diesel::update(f_flow_instance::table.filter(f_flow_instance::deleted.eq(0))
                                                 .filter(f_flow_instance::record_id.eq(record_id)))
                .set(f_flow_instance::status.eq(status))
                .execute(&mut conn)
                .map_err(PersistenceError::from)
        })?;
        if updated == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    fn create_node_instance(&self, instance: &NodeInstance, candidates: &[NodeCandidate]) -> Result<(), StoreError> {
        with_retry(|| {
            let mut conn = self.conn()?;
            conn.build_transaction()
                .read_write()
                .run(|tx| {
                    diesel::insert_into(f_node_instance::table)
                        .values(new_node_instance_row(instance))
                        .execute(tx)?;

                    let rows: Vec<NewCandidateRow<'_>> =
                        candidates.iter()
                                  .map(|c| NewCandidateRow { record_id: &c.record_id,
                                                             created: c.created,
                                                             deleted: c.deleted,
                                                             node_instance_id: &c.node_instance_id,
                                                             candidate_id: &c.candidate_id })
                                  .collect();
                    if !rows.is_empty() {
                        diesel::insert_into(f_node_candidate::table).values(&rows).execute(tx)?;
                    }
                    Ok::<(), diesel::result::Error>(())
                })
                .map_err(PersistenceError::from)
        }).map_err(Into::into)
    }

    fn get_node_instance(&self, record_id: &str) -> Result<Option<NodeInstance>, StoreError> {
        let row: Option<NodeInstanceRow> = with_retry(|| {
            let mut conn = self.conn()?;
            f_node_instance::table.filter(f_node_instance::deleted.eq(0))
                                  .filter(f_node_instance::record_id.eq(record_id))
                                  .first(&mut conn)
                                  .optional()
                                  .map_err(PersistenceError::from)
        })?;
        Ok(row.map(NodeInstance::from))
    }

    fn claim_node_instance(&self, record_id: &str, processor: &str, process_time: i64, out_data: &[u8])
                           -> Result<bool, StoreError> {
        let updated = with_retry(|| {
            let mut conn = self.conn()?;
            diesel::update(f_node_instance::table
                               .filter(f_node_instance::deleted.eq(0))
                               .filter(f_node_instance::record_id.eq(record_id))
                               .filter(f_node_instance::status.eq(NODE_INSTANCE_PENDING)))
                .set((f_node_instance::status.eq(NODE_INSTANCE_PROCESSED),
                      f_node_instance::processor.eq(processor),
                      f_node_instance::process_time.eq(process_time),
                      f_node_instance::out_data.eq(out_data)))
                .execute(&mut conn)
                .map_err(PersistenceError::from)
        })?;
        debug!("claim {record_id}: affected={updated}");
        Ok(updated > 0)
    }

    fn cancel_node_instance(&self, record_id: &str) -> Result<(), StoreError> {
        let updated = with_retry(|| {
            let mut conn = self.conn()?;
            diesel::update(f_node_instance::table.filter(f_node_instance::deleted.eq(0))
                                                 .filter(f_node_instance::record_id.eq(record_id)))
                .set(f_node_instance::status.eq(NODE_INSTANCE_CANCELLED))
                .execute(&mut conn)
                .map_err(PersistenceError::from)
        })?;
        if updated == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    fn query_node_instances(&self, flow_instance_id: &str) -> Result<Vec<NodeInstance>, StoreError> {
        let rows: Vec<NodeInstanceRow> = with_retry(|| {
            let mut conn = self.conn()?;
            f_node_instance::table.filter(f_node_instance::deleted.eq(0))
                                  .filter(f_node_instance::flow_instance_id.eq(flow_instance_id))
                                  .order(f_node_instance::id.asc())
                                  .load(&mut conn)
                                  .map_err(PersistenceError::from)
        })?;
        Ok(rows.into_iter().map(NodeInstance::from).collect())
    }

    fn query_node_candidates(&self, node_instance_id: &str) -> Result<Vec<NodeCandidate>, StoreError> {
        let rows: Vec<CandidateRow> = with_retry(|| {
            let mut conn = self.conn()?;
            f_node_candidate::table.filter(f_node_candidate::deleted.eq(0))
                                   .filter(f_node_candidate::node_instance_id.eq(node_instance_id))
                                   .order(f_node_candidate::id.asc())
                                   .load(&mut conn)
                                   .map_err(PersistenceError::from)
        })?;
        Ok(rows.into_iter().map(NodeCandidate::from).collect())
    }

    fn check_flow_instance_todo(&self, flow_instance_id: &str) -> Result<bool, StoreError> {
        let pending: i64 = with_retry(|| {
            let mut conn = self.conn()?;
            f_node_instance::table.filter(f_node_instance::deleted.eq(0))
                                  .filter(f_node_instance::status.eq(NODE_INSTANCE_PENDING))
                                  .filter(f_node_instance::flow_instance_id.eq(flow_instance_id))
                                  .count()
                                  .get_result(&mut conn)
                                  .map_err(PersistenceError::from)
        })?;
        Ok(pending > 0)
    }

    fn query_todo(&self, flow_code: Option<&str>, user_id: &str) -> Result<Vec<TodoItem>, StoreError> {
        let rows: Vec<TodoRow> = with_retry(|| {
            let mut conn = self.conn()?;
            match flow_code {
                Some(code) => {
                    let query = format!("{TODO_QUERY}
      AND fi.flow_id IN (SELECT record_id FROM f_flow
                         WHERE deleted = 0 AND flag = 1 AND code = $2)
    ORDER BY ni.id");
                    diesel::sql_query(query).bind::<Text, _>(user_id)
                                            .bind::<Text, _>(code)
                                            .load(&mut conn)
                                            .map_err(PersistenceError::from)
                }
                None => {
                    let query = format!("{TODO_QUERY}
    ORDER BY ni.id");
                    diesel::sql_query(query).bind::<Text, _>(user_id)
                                            .load(&mut conn)
                                            .map_err(PersistenceError::from)
                }
            }
        })?;

        Ok(rows.into_iter()
               .map(|r| TodoItem { record_id: r.record_id,
                                   flow_instance_id: r.flow_instance_id,
                                   node_id: r.node_id,
                                   node_code: r.node_code.unwrap_or_default(),
                                   node_name: r.node_name.unwrap_or_default(),
                                   input_data: r.input_data,
                                   form_type: r.form_type,
                                   form_data: r.form_data,
                                   launcher: r.launcher,
                                   launch_time: r.launch_time })
               .collect())
    }

    fn query_history(&self, flow_instance_id: &str) -> Result<Vec<HistoryItem>, StoreError> {
        let rows: Vec<HistoryRow> = with_retry(|| {
            let mut conn = self.conn()?;
            diesel::sql_query(HISTORY_QUERY).bind::<Text, _>(flow_instance_id)
                                            .load(&mut conn)
                                            .map_err(PersistenceError::from)
        })?;
        Ok(rows.into_iter()
               .map(|r| HistoryItem { record_id: r.record_id,
                                      node_code: r.node_code,
                                      node_name: r.node_name,
                                      processor: r.processor,
                                      process_time: r.process_time,
                                      out_data: r.out_data,
                                      status: r.status })
               .collect())
    }
}

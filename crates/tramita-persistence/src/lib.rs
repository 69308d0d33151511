//! tramita-persistence
//!
//! Backend Postgres del contrato `FlowStore` de `tramita-core`:
//! - `pg`: implementación Diesel con pool r2d2, transacciones por operación y
//!   retry/backoff para errores transitorios.
//! - `migrations`: runner embebido de migraciones Diesel (se ejecuta al
//!   construir el pool).
//! - `config`: carga de configuración desde `.env` / entorno.
//! - `schema`: tablas Diesel declaradas para compilar queries.

pub mod config;
pub mod error;
pub mod migrations;
pub mod pg;
pub mod schema;

pub use config::{init_dotenv, DbConfig};
pub use error::PersistenceError;
pub use pg::{build_pool, PgFlowStore, PgPool};

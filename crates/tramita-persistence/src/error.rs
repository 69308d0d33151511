//! Errores de persistencia.
//! Mapea errores de Diesel / conexión a variantes semánticas, y de ahí al
//! `StoreError` que consume el motor.

use diesel::result::{DatabaseErrorKind, Error as DieselError};
use thiserror::Error;
use tramita_core::StoreError;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("unique violation: {0}")]
    UniqueViolation(String),
    #[error("foreign key violation: {0}")]
    ForeignKeyViolation(String),
    #[error("not found")]
    NotFound,
    #[error("serialization conflict (retryable)")]
    SerializationConflict,
    #[error("transient IO / connection pool error: {0}")]
    TransientIo(String),
    #[error("unknown database error: {0}")]
    Unknown(String),
}

impl From<DieselError> for PersistenceError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::NotFound => Self::NotFound,
            DieselError::DatabaseError(kind, info) => match kind {
                DatabaseErrorKind::UniqueViolation => Self::UniqueViolation(info.message().to_string()),
                DatabaseErrorKind::ForeignKeyViolation => Self::ForeignKeyViolation(info.message().to_string()),
                DatabaseErrorKind::SerializationFailure => Self::SerializationConflict,
                DatabaseErrorKind::ClosedConnection => Self::TransientIo(info.message().to_string()),
                other => Self::Unknown(format!("db error kind {:?}: {}", other, info.message())),
            },
            DieselError::BrokenTransactionManager => Self::TransientIo("broken transaction manager".into()),
            other => Self::Unknown(format!("diesel error: {other}")),
        }
    }
}

impl From<PersistenceError> for StoreError {
    fn from(err: PersistenceError) -> Self {
        match err {
            PersistenceError::NotFound => StoreError::NotFound,
            PersistenceError::UniqueViolation(m) | PersistenceError::ForeignKeyViolation(m) => {
                StoreError::Conflict(m)
            }
            PersistenceError::SerializationConflict => {
                StoreError::Transient("serialization conflict".into())
            }
            PersistenceError::TransientIo(m) => StoreError::Transient(m),
            PersistenceError::Unknown(m) => StoreError::Backend(m),
        }
    }
}

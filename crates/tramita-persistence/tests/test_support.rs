use once_cell::sync::Lazy;
use tramita_persistence::config::DbConfig;
use tramita_persistence::pg::{build_pool, PgPool};

pub static TEST_POOL: Lazy<Option<PgPool>> = Lazy::new(|| {
    if std::env::var("DATABASE_URL").is_err() {
        return None;
    }
    let mut cfg = DbConfig::from_env();
    // usar 1x2 estable para tests
    cfg.min_connections = 1;
    cfg.max_connections = 2;
    match build_pool(&cfg) {
        Ok(p) => Some(p),
        Err(e) => {
            eprintln!("No se pudo construir pool de test: {e}");
            None
        }
    }
});

pub fn with_pool<F, R>(f: F) -> Option<R>
    where F: FnOnce(&PgPool) -> R
{
    TEST_POOL.as_ref().map(|p| f(p))
}

//! Pruebas básicas de configuración y pool (requieren DATABASE_URL válido en
//! el entorno; sin él se omiten).

use tramita_persistence::{build_pool, DbConfig};

#[test]
fn create_pool_from_env() {
    if std::env::var("DATABASE_URL").is_err() {
        eprintln!("DATABASE_URL no definido: omitiendo test");
        return;
    }
    let cfg = DbConfig::from_env();
    let pool = build_pool(&cfg).expect("pool");
    let mut conn = pool.get().expect("conn");
    use diesel::connection::SimpleConnection;
    conn.batch_execute("SELECT 1;").expect("select 1");
}

//! Configuración de conexión desde variables de entorno.
//! Convención `DATABASE_URL` más parámetros opcionales de pool.

use std::env;
use std::time::Duration;

use dotenvy::dotenv;
use once_cell::sync::Lazy;

// Carga perezosa del archivo .env una sola vez por proceso.
static DOTENV_LOADED: Lazy<()> = Lazy::new(|| {
    let _ = dotenv();
});

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub min_connections: u32,
    pub max_connections: u32,
    /// Vida máxima de una conexión del pool antes de reciclarla.
    pub max_lifetime: Duration,
}

impl DbConfig {
    /// Lee `DATABASE_URL` (obligatoria) y los límites del pool:
    /// `DATABASE_MIN_CONNECTIONS`, `DATABASE_MAX_CONNECTIONS`,
    /// `DATABASE_MAX_LIFETIME_SECS`.
    pub fn from_env() -> Self {
        Lazy::force(&DOTENV_LOADED);
        let url = env::var("DATABASE_URL").expect("DATABASE_URL no definido");
        let min_connections = env_parse("DATABASE_MIN_CONNECTIONS", 2);
        let max_connections = env_parse("DATABASE_MAX_CONNECTIONS", 16);
        let max_lifetime = Duration::from_secs(env_parse("DATABASE_MAX_LIFETIME_SECS", 2 * 3600));
        Self { url, min_connections, max_connections, max_lifetime }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Forzar carga temprana de .env desde aplicaciones externas si se desea.
pub fn init_dotenv() {
    Lazy::force(&DOTENV_LOADED);
}

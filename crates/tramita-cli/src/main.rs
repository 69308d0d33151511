//! CLI operacional mínima:
//!   tramita load --file <ruta>
//!   tramita start --flow <code> --node <code> --user <id> [--input <json>]
//!   tramita handle --instance <record_id> --user <id> [--input <json>]
//!   tramita todo --user <id> [--flow <code>]
//!   tramita history --instance <flow_instance_record_id>
//!
//! Requiere DATABASE_URL (directa o vía .env). Códigos de salida: 2 uso
//! inválido, 4 condición de negocio, 5 error de backend.

use tramita::{DbConfig, EngineError};

fn main() {
    env_logger::init();
    tramita::init_dotenv();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        usage();
        std::process::exit(2);
    }

    if std::env::var("DATABASE_URL").is_err() {
        eprintln!("[tramita] requiere DATABASE_URL para operar");
        std::process::exit(2);
    }
    tramita::init(&DbConfig::from_env());

    let opts = Opts::parse(&args[2..]);
    match args[1].as_str() {
        "load" => {
            let Some(file) = opts.get("file") else { exit_usage("load requiere --file") };
            match tramita::load_file(file) {
                Ok(flow) => println!("cargado: code={} version={}", flow.code, flow.version),
                Err(e) => exit_engine_error(e),
            }
        }
        "start" => {
            let (Some(flow), Some(node), Some(user)) = (opts.get("flow"), opts.get("node"), opts.get("user"))
            else {
                exit_usage("start requiere --flow, --node y --user")
            };
            let input = opts.get("input").cloned().unwrap_or_else(|| "{}".to_string());
            match tramita::start_flow(flow, node, user, input.as_bytes()) {
                Ok(result) => println!("{result}"),
                Err(e) => exit_engine_error(e),
            }
        }
        "handle" => {
            let (Some(instance), Some(user)) = (opts.get("instance"), opts.get("user")) else {
                exit_usage("handle requiere --instance y --user")
            };
            let input = opts.get("input").cloned().unwrap_or_else(|| "{}".to_string());
            match tramita::handle_flow(instance, user, input.as_bytes()) {
                Ok(result) => println!("{result}"),
                Err(e) => exit_engine_error(e),
            }
        }
        "todo" => {
            let Some(user) = opts.get("user") else { exit_usage("todo requiere --user") };
            match tramita::query_todo_flows(opts.get("flow").map(String::as_str), user) {
                Ok(items) => {
                    for item in items {
                        println!("{}", serde_json::to_string(&item).unwrap_or_default());
                    }
                }
                Err(e) => exit_engine_error(e),
            }
        }
        "history" => {
            let Some(instance) = opts.get("instance") else { exit_usage("history requiere --instance") };
            match tramita::query_history(instance) {
                Ok(items) => {
                    for item in items {
                        println!("{}", serde_json::to_string(&item).unwrap_or_default());
                    }
                }
                Err(e) => exit_engine_error(e),
            }
        }
        other => {
            eprintln!("[tramita] subcomando desconocido: {other}");
            usage();
            std::process::exit(2);
        }
    }
}

/// Flags `--clave valor` sueltos, al estilo de la casa.
struct Opts(Vec<(String, String)>);

impl Opts {
    fn parse(args: &[String]) -> Self {
        let mut pairs = Vec::new();
        let mut i = 0;
        while i < args.len() {
            if let Some(key) = args[i].strip_prefix("--") {
                i += 1;
                if i < args.len() {
                    pairs.push((key.to_string(), args[i].clone()));
                }
            }
            i += 1;
        }
        Self(pairs)
    }

    fn get(&self, key: &str) -> Option<&String> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

fn usage() {
    eprintln!("uso: tramita <load|start|handle|todo|history> [--flag valor ...]");
}

fn exit_usage(msg: &str) -> ! {
    eprintln!("[tramita] {msg}");
    std::process::exit(2);
}

fn exit_engine_error(e: EngineError) -> ! {
    eprintln!("[tramita] {e}");
    let code = match e {
        EngineError::Store(_) | EngineError::Io(_) => 5,
        _ => 4,
    };
    std::process::exit(code);
}

//! Evaluación de expresiones.
//!
//! Guardas de routers y reglas de asignación se evalúan contra el mapa de
//! variables de la instancia a través del trait `Execer`. La implementación
//! por defecto usa Rhai en modo expresión: sin sentencias, sin estado entre
//! llamadas.

use serde_json::Value;

use crate::errors::EngineError;
use crate::vars::VarMap;

pub trait Execer: Send + Sync {
    /// Evalúa `expression` contra `vars`. Debe ser pura y sin efectos.
    fn eval(&self, expression: &str, vars: &VarMap) -> Result<Value, EngineError>;
}

/// Semántica truthy del motor: números distintos de cero, cadenas y
/// colecciones no vacías, `true`. Todo lo demás es falso.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Execer por defecto sobre Rhai.
pub struct RhaiExecer {
    engine: rhai::Engine,
}

impl RhaiExecer {
    pub fn new() -> Self {
        Self { engine: rhai::Engine::new() }
    }
}

impl Default for RhaiExecer {
    fn default() -> Self {
        Self::new()
    }
}

impl Execer for RhaiExecer {
    fn eval(&self, expression: &str, vars: &VarMap) -> Result<Value, EngineError> {
        let mut scope = rhai::Scope::new();
        for (key, value) in vars {
            let dynamic = rhai::serde::to_dynamic(value).map_err(|e| {
                              EngineError::ExprEval(format!("variable {key}: {e}"))
                          })?;
            scope.push_dynamic(key.clone(), dynamic);
        }

        let out: rhai::Dynamic =
            self.engine
                .eval_expression_with_scope(&mut scope, expression)
                .map_err(|e| EngineError::ExprEval(format!("{expression}: {e}")))?;

        rhai::serde::from_dynamic(&out).map_err(|e| EngineError::ExprEval(format!("{expression}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(v: Value) -> VarMap {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn evalua_comparaciones_numericas() {
        let ex = RhaiExecer::new();
        let vs = vars(json!({"day": 3}));
        assert!(truthy(&ex.eval("day > 2", &vs).unwrap()));
        assert!(!truthy(&ex.eval("day <= 2", &vs).unwrap()));
    }

    #[test]
    fn evalua_igualdad_de_cadenas() {
        let ex = RhaiExecer::new();
        let vs = vars(json!({"action": "pass"}));
        assert!(truthy(&ex.eval("action == \"pass\"", &vs).unwrap()));
        assert!(!truthy(&ex.eval("action == \"back\"", &vs).unwrap()));
    }

    #[test]
    fn devuelve_cadenas_y_listas_para_candidatos() {
        let ex = RhaiExecer::new();
        let vs = vars(json!({"bzr": "T002"}));
        assert_eq!(ex.eval("bzr", &vs).unwrap(), json!("T002"));
        assert_eq!(ex.eval("[\"U1\", \"U2\"]", &vs).unwrap(), json!(["U1", "U2"]));
    }

    #[test]
    fn variable_desconocida_es_error_de_evaluacion() {
        let ex = RhaiExecer::new();
        let err = ex.eval("nope == 1", &VarMap::new()).unwrap_err();
        assert!(matches!(err, EngineError::ExprEval(_)));
    }

    #[test]
    fn semantica_truthy() {
        assert!(!truthy(&json!(null)));
        assert!(!truthy(&json!(0)));
        assert!(!truthy(&json!("")));
        assert!(!truthy(&json!([])));
        assert!(truthy(&json!(0.5)));
        assert!(truthy(&json!("x")));
        assert!(truthy(&json!([1])));
        assert!(truthy(&json!({"k": 1})));
    }
}

//! Blob de variables de instancia.
//!
//! `input_data` / `out_data` son bytes opacos por contrato de almacenamiento
//! pero JSON-objeto por convención. El merge es superficial y el dato
//! entrante gana en colisión de clave.

use serde_json::{Map, Value};

use crate::errors::EngineError;

pub type VarMap = Map<String, Value>;

/// Decodifica un blob a mapa de variables. Bytes vacíos equivalen a `{}`;
/// cualquier cosa que no sea un objeto JSON se rechaza.
pub fn decode(data: &[u8]) -> Result<VarMap, EngineError> {
    if data.is_empty() {
        return Ok(VarMap::new());
    }
    let value: Value =
        serde_json::from_slice(data).map_err(|e| EngineError::InvalidInput(e.to_string()))?;
    match value {
        Value::Object(map) => Ok(map),
        other => Err(EngineError::InvalidInput(format!("expected json object, got {other}"))),
    }
}

pub fn encode(vars: &VarMap) -> Vec<u8> {
    serde_json::to_vec(&Value::Object(vars.clone())).unwrap_or_default()
}

/// Merge superficial: las claves de `incoming` pisan las de `base`.
pub fn merge(mut base: VarMap, incoming: &VarMap) -> VarMap {
    for (k, v) in incoming {
        base.insert(k.clone(), v.clone());
    }
    base
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_superficial_gana_el_entrante() {
        let base = decode(br#"{"day": 1, "bzr": "T002"}"#).unwrap();
        let incoming = decode(br#"{"day": 3, "action": "pass"}"#).unwrap();
        let merged = merge(base, &incoming);
        assert_eq!(merged.get("day"), Some(&json!(3)));
        assert_eq!(merged.get("bzr"), Some(&json!("T002")));
        assert_eq!(merged.get("action"), Some(&json!("pass")));
    }

    #[test]
    fn bytes_vacios_decodifican_a_mapa_vacio() {
        assert!(decode(b"").unwrap().is_empty());
    }

    #[test]
    fn rechaza_json_que_no_es_objeto() {
        assert!(matches!(decode(b"[1,2]"), Err(EngineError::InvalidInput(_))));
        assert!(matches!(decode(b"{broken"), Err(EngineError::InvalidInput(_))));
    }

    #[test]
    fn roundtrip_encode_decode() {
        let m = decode(br#"{"a": 1}"#).unwrap();
        assert_eq!(decode(&encode(&m)).unwrap(), m);
    }
}

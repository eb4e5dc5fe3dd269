//! Hash helpers – abstracción para poder cambiar de algoritmo sin tocar el resto del core.

use std::io::Read;
use std::path::Path;

use blake3::Hasher;
use serde_json::Value;

use crate::model::ObjectId;

/// Hashea un slice de bytes y devuelve el `ObjectId` resultante.
pub fn hash_bytes(input: &[u8]) -> ObjectId {
    let mut h = Hasher::new();
    h.update(input);
    ObjectId::from_bytes(*h.finalize().as_bytes())
}

/// Hashea el contenido completo de un archivo en streaming.
pub fn hash_file(path: &Path) -> std::io::Result<ObjectId> {
    let mut file = std::fs::File::open(path)?;
    let mut h = Hasher::new();
    let mut buf = [0u8; 8192];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        h.update(&buf[..read]);
    }
    Ok(ObjectId::from_bytes(*h.finalize().as_bytes()))
}

/// Hashea un `serde_json::Value` canonicalizado (claves de objeto ordenadas).
pub fn hash_value(value: &Value) -> ObjectId {
    let canonical = canonicalize(value);
    // to_string sobre un Value con mapas ordenados es determinista
    hash_bytes(canonical.to_string().as_bytes())
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut out = serde_json::Map::new();
            for (k, v) in entries {
                out.insert(k.clone(), canonicalize(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hash_bytes_is_stable() {
        assert_eq!(hash_bytes(b"forge"), hash_bytes(b"forge"));
        assert_ne!(hash_bytes(b"forge"), hash_bytes(b"flow"));
    }

    #[test]
    fn hash_value_ignores_key_order() {
        let a = json!({ "x": 1, "y": [1, 2, { "b": 2, "a": 1 }] });
        let b = json!({ "y": [1, 2, { "a": 1, "b": 2 }], "x": 1 });
        assert_eq!(hash_value(&a), hash_value(&b));
    }
}

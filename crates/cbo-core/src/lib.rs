pub mod brain_contracts;
pub mod capability;
pub mod claim_contracts;
pub mod job_contracts;
pub mod query_contracts;
pub mod text;

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

pub const BRAIN_SCHEMA_VERSION: u32 = 1;

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut output = String::with_capacity(digest.len() * 2);
    for byte in digest {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let json = serde_json::to_value(value)?;
    serde_json::to_string(&canonicalize_value(json))
}

pub fn canonical_payload_hash<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let rendered = canonical_json(value)?;
    Ok(sha256_hex(rendered.as_bytes()))
}

/// Stable short identifier: `<prefix><first `len` hex chars of sha256(parts joined by NUL)>`.
pub fn short_hash_id(prefix: &str, parts: &[&str], len: usize) -> String {
    let joined = parts.join("\u{0}");
    let digest = sha256_hex(joined.as_bytes());
    format!("{prefix}{}", &digest[..len.min(digest.len())])
}

fn canonicalize_value(value: Value) -> Value {
    match value {
        Value::Object(object) => {
            let mut entries: Vec<(String, Value)> = object.into_iter().collect();
            entries.sort_by(|left, right| left.0.cmp(&right.0));

            let mut sorted = Map::new();
            for (key, value) in entries {
                sorted.insert(key, canonicalize_value(value));
            }
            Value::Object(sorted)
        }
        Value::Array(values) => Value::Array(values.into_iter().map(canonicalize_value).collect()),
        scalar => scalar,
    }
}

//! YAML definition file types
//!
//! These mirror the on-disk shape. Nothing here is validated; see
//! [`super::loader`] for resolution into engine operations.

use std::collections::BTreeMap;

use opsql_core::Row;
use serde::{Deserialize, Deserializer};

/// One definition file.
///
/// ```yaml
/// version: 1
/// params:
///   user_id: 42
/// operations:
///   - id: rename_user
///     sql: UPDATE users SET name = 'Bob' WHERE id = {{params.user_id}}
///     expected_changes:
///       update: 1
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DefinitionFile {
    #[serde(default)]
    pub version: u32,

    #[serde(default, deserialize_with = "scalar_params")]
    pub params: BTreeMap<String, String>,

    #[serde(default)]
    pub operations: Vec<RawOperation>,
}

/// An operation as written, before ids, types and templates are resolved.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawOperation {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub description: String,

    /// Optional; detected from the statement when empty.
    #[serde(rename = "type", default)]
    pub kind: String,

    #[serde(default)]
    pub sql: String,

    #[serde(default)]
    pub expected: Vec<Row>,

    /// Keyed by operation type name, e.g. `update: 1`.
    #[serde(default)]
    pub expected_changes: BTreeMap<String, u64>,
}

/// Accept numbers and booleans as param values and keep their text.
fn scalar_params<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let raw: Option<BTreeMap<String, serde_yaml::Value>> = Option::deserialize(deserializer)?;
    raw.unwrap_or_default()
        .into_iter()
        .map(|(key, value)| {
            let text = match value {
                serde_yaml::Value::Null => String::new(),
                serde_yaml::Value::Bool(b) => b.to_string(),
                serde_yaml::Value::Number(n) => n.to_string(),
                serde_yaml::Value::String(s) => s,
                _ => {
                    return Err(D::Error::custom(format!(
                        "param '{}' must be a scalar value",
                        key
                    )))
                }
            };
            Ok((key, text))
        })
        .collect()
}

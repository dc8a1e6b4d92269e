//! Definition loader
//!
//! Reads definition files, merges them, and resolves every operation into
//! an engine [`Operation`]: ids are defaulted, types detected, expectations
//! checked, and SQL templates rendered against the merged params.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use handlebars::Handlebars;
use opsql_core::{Expectation, Operation, OperationType};
use regex::Regex;
use tracing::{debug, info};

use super::types::{DefinitionFile, RawOperation};
use super::DefinitionError;

/// A merged, validated definition ready to run.
#[derive(Debug, Clone, PartialEq)]
pub struct Definition {
    pub version: u32,
    pub params: BTreeMap<String, String>,
    pub operations: Vec<Operation>,
}

/// Load and merge definition files in order.
///
/// All files must declare the same `version`. Params from later files
/// override earlier ones; operations are concatenated in file order.
pub fn load_definitions<P: AsRef<Path>>(paths: &[P]) -> Result<Definition, DefinitionError> {
    if paths.is_empty() {
        return Err(DefinitionError::NoFiles);
    }

    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| DefinitionError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file: DefinitionFile =
            serde_yaml::from_str(&content).map_err(|source| DefinitionError::Yaml {
                path: path.to_path_buf(),
                source,
            })?;
        debug!(
            "Loaded {} operations from {}",
            file.operations.len(),
            path.display()
        );
        files.push((path.to_path_buf(), file));
    }

    let definition = resolve(merge(files)?)?;
    info!(
        "Loaded {} operations from {} definition file(s)",
        definition.operations.len(),
        paths.len()
    );
    Ok(definition)
}

/// Parse a single definition from YAML text.
pub fn parse_definition(yaml: &str) -> Result<Definition, DefinitionError> {
    let file: DefinitionFile =
        serde_yaml::from_str(yaml).map_err(|source| DefinitionError::Yaml {
            path: PathBuf::from("<inline>"),
            source,
        })?;
    resolve(file)
}

fn merge(files: Vec<(PathBuf, DefinitionFile)>) -> Result<DefinitionFile, DefinitionError> {
    let mut files = files.into_iter();
    let Some((_, mut merged)) = files.next() else {
        return Err(DefinitionError::NoFiles);
    };

    for (path, file) in files {
        if file.version != merged.version {
            return Err(DefinitionError::VersionMismatch {
                path,
                expected: merged.version,
                found: file.version,
            });
        }
        merged.params.extend(file.params);
        merged.operations.extend(file.operations);
    }

    Ok(merged)
}

fn resolve(file: DefinitionFile) -> Result<Definition, DefinitionError> {
    if file.version > 1 {
        return Err(DefinitionError::Version(file.version));
    }

    let templates = template_engine();
    let context = serde_json::json!({ "params": &file.params });
    let mut seen = HashSet::new();
    let mut operations = Vec::with_capacity(file.operations.len());

    for (index, raw) in file.operations.into_iter().enumerate() {
        let op = resolve_operation(index, raw, &templates, &context)?;
        if !seen.insert(op.id.clone()) {
            return Err(DefinitionError::DuplicateId(op.id));
        }
        operations.push(op);
    }

    Ok(Definition {
        version: file.version,
        params: file.params,
        operations,
    })
}

fn resolve_operation(
    index: usize,
    raw: RawOperation,
    templates: &Handlebars<'static>,
    context: &serde_json::Value,
) -> Result<Operation, DefinitionError> {
    if raw.sql.trim().is_empty() {
        return Err(DefinitionError::MissingSql { index });
    }

    let id = if raw.id.is_empty() {
        format!("operation_{}", index)
    } else {
        raw.id
    };

    let sql = render_sql(templates, &id, &raw.sql, context)?;

    let kind = if raw.kind.trim().is_empty() {
        OperationType::detect(&sql).ok_or_else(|| DefinitionError::UndetectableType {
            id: id.clone(),
        })?
    } else {
        raw.kind
            .parse::<OperationType>()
            .map_err(|reason| DefinitionError::UnsupportedType {
                id: id.clone(),
                reason,
            })?
    };

    let expectation = if kind.is_dml() {
        if raw.expected_changes.is_empty() {
            return Err(DefinitionError::MissingExpectedChanges { id });
        }
        let mut counts = BTreeMap::new();
        for (key, count) in raw.expected_changes {
            let key_kind = key
                .parse::<OperationType>()
                .map_err(|reason| DefinitionError::UnsupportedType {
                    id: id.clone(),
                    reason,
                })?;
            counts.insert(key_kind, count);
        }
        Expectation::ChangeCounts(counts)
    } else {
        if raw.expected.is_empty() {
            return Err(DefinitionError::MissingExpected { id });
        }
        Expectation::Rows(raw.expected)
    };

    Ok(Operation {
        id,
        description: raw.description,
        kind,
        sql,
        expectation,
    })
}

fn template_engine() -> Handlebars<'static> {
    let mut handlebars = Handlebars::new();
    handlebars.set_strict_mode(true);
    // SQL is not HTML
    handlebars.register_escape_fn(handlebars::no_escape);
    handlebars
}

/// `{{.params.x}}` is accepted as a spelling of `{{params.x}}`.
fn dotted_params() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\{\{~?\s*)\.params\b").expect("static regex is valid"))
}

fn render_sql(
    templates: &Handlebars<'static>,
    id: &str,
    sql: &str,
    context: &serde_json::Value,
) -> Result<String, DefinitionError> {
    if !sql.contains("{{") {
        return Ok(sql.to_string());
    }
    let source = dotted_params().replace_all(sql, "${1}params");
    templates
        .render_template(&source, context)
        .map_err(|e| DefinitionError::Template {
            id: id.to_string(),
            message: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use opsql_core::Value;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_yaml(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_resolves_ids_types_and_templates() {
        let yaml = r#"
version: 1
params:
  user_id: 42
operations:
  - description: find the user
    sql: "  select id, name FROM users WHERE id = {{params.user_id}}"
    expected:
      - id: 42
        name: Alice
  - id: rename
    sql: UPDATE users SET name = 'Bob' WHERE id = {{.params.user_id}}
    expected_changes:
      update: 1
"#;
        let def = parse_definition(yaml).unwrap();

        assert_eq!(def.operations.len(), 2);
        let first = &def.operations[0];
        assert_eq!(first.id, "operation_0");
        assert_eq!(first.kind, OperationType::Select);
        assert_eq!(
            first.sql,
            "  select id, name FROM users WHERE id = 42"
        );
        match &first.expectation {
            Expectation::Rows(rows) => {
                assert_eq!(rows[0]["name"], Value::from("Alice"));
            }
            other => panic!("unexpected expectation: {:?}", other),
        }

        let second = &def.operations[1];
        assert_eq!(second.kind, OperationType::Update);
        assert_eq!(second.sql, "UPDATE users SET name = 'Bob' WHERE id = 42");
        assert_eq!(
            second.expectation,
            Expectation::ChangeCounts(BTreeMap::from([(OperationType::Update, 1)]))
        );
    }

    #[test]
    fn test_template_values_are_not_html_escaped() {
        let yaml = r#"
params:
  name: "O'Brien & <co>"
operations:
  - sql: "SELECT id FROM users WHERE name = \"{{params.name}}\""
    expected:
      - id: 1
"#;
        let def = parse_definition(yaml).unwrap();
        assert_eq!(
            def.operations[0].sql,
            "SELECT id FROM users WHERE name = \"O'Brien & <co>\""
        );
    }

    #[test]
    fn test_unknown_param_fails_to_render() {
        let yaml = r#"
operations:
  - id: missing
    sql: DELETE FROM users WHERE id = {{params.nope}}
    expected_changes:
      delete: 1
"#;
        let err = parse_definition(yaml).unwrap_err();
        assert!(matches!(err, DefinitionError::Template { ref id, .. } if id == "missing"));
    }

    #[test]
    fn test_validation_errors() {
        let cases = [
            (
                "version: 2\noperations: []\n",
                "unsupported version: 2",
            ),
            (
                "operations:\n  - id: a\n    sql: ''\n",
                "operation[0]: sql is required",
            ),
            (
                "operations:\n  - id: a\n    sql: TRUNCATE users\n",
                "operation[a]: unable to detect SQL type from query",
            ),
            (
                "operations:\n  - id: a\n    type: merge\n    sql: MERGE INTO t\n",
                "operation[a]: unsupported operation type: merge (allowed: select, insert, update, delete)",
            ),
            (
                "operations:\n  - id: a\n    sql: SELECT 1\n",
                "operation[a]: expected is required for SELECT",
            ),
            (
                "operations:\n  - id: a\n    sql: DELETE FROM t\n",
                "operation[a]: expected_changes is required for DML",
            ),
            (
                "operations:\n  - id: a\n    sql: DELETE FROM t\n    expected_changes:\n      remove: 1\n",
                "operation[a]: unsupported operation type: remove (allowed: select, insert, update, delete)",
            ),
        ];

        for (yaml, message) in cases {
            let err = parse_definition(yaml).unwrap_err();
            assert_eq!(err.to_string(), message, "for yaml:\n{}", yaml);
        }
    }

    #[test]
    fn test_duplicate_ids_are_rejected() {
        let yaml = r#"
operations:
  - id: same
    sql: SELECT 1 AS one
    expected:
      - one: 1
  - id: same
    sql: SELECT 2 AS two
    expected:
      - two: 2
"#;
        let err = parse_definition(yaml).unwrap_err();
        assert_eq!(err.to_string(), "duplicate operation ID: same");
    }

    #[test]
    fn test_explicit_type_wins_over_detection() {
        let yaml = r#"
operations:
  - type: INSERT
    sql: WITH src AS (SELECT 1) INSERT INTO t SELECT * FROM src
    expected_changes:
      insert: 1
"#;
        let def = parse_definition(yaml).unwrap();
        assert_eq!(def.operations[0].kind, OperationType::Insert);
    }

    #[test]
    fn test_load_merges_files_in_order() {
        let first = write_yaml(
            r#"
version: 1
params:
  table: users
  limit: "10"
operations:
  - id: count
    sql: SELECT COUNT(*) AS n FROM {{params.table}}
    expected:
      - n: 2
"#,
        );
        let second = write_yaml(
            r#"
version: 1
params:
  table: accounts
operations:
  - sql: DELETE FROM {{params.table}} WHERE id = 1
    expected_changes:
      delete: 1
"#,
        );

        let def = load_definitions(&[first.path(), second.path()]).unwrap();

        assert_eq!(def.params["table"], "accounts");
        assert_eq!(def.params["limit"], "10");
        let ids: Vec<_> = def.operations.iter().map(|op| op.id.as_str()).collect();
        assert_eq!(ids, vec!["count", "operation_1"]);
        // merged params apply to every file's templates
        assert_eq!(def.operations[0].sql, "SELECT COUNT(*) AS n FROM accounts");
        assert_eq!(def.operations[1].sql, "DELETE FROM accounts WHERE id = 1");
    }

    #[test]
    fn test_load_rejects_version_mismatch() {
        let first = write_yaml("version: 1\noperations: []\n");
        let second = write_yaml("operations: []\n");

        let err = load_definitions(&[first.path(), second.path()]).unwrap_err();
        assert!(matches!(
            err,
            DefinitionError::VersionMismatch {
                expected: 1,
                found: 0,
                ..
            }
        ));
    }

    #[test]
    fn test_load_reports_missing_file_and_bad_yaml() {
        let err = load_definitions(&["/nonexistent/opsql.yaml"]).unwrap_err();
        assert!(matches!(err, DefinitionError::Io { .. }));

        let bad = write_yaml("operations: [\n");
        let err = load_definitions(&[bad.path()]).unwrap_err();
        assert!(matches!(err, DefinitionError::Yaml { .. }));

        let none: [&Path; 0] = [];
        assert!(matches!(
            load_definitions(&none),
            Err(DefinitionError::NoFiles)
        ));
    }
}

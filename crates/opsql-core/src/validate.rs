//! Pure validation of observed results against declared expectations.

use std::collections::BTreeMap;

use crate::compare::compare;
use crate::operation::OperationType;
use crate::value::Row;

pub const PASSED: &str = "assertion passed";

/// Outcome of one validation: pass flag and diagnostic message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub pass: bool,
    pub message: String,
}

impl Verdict {
    pub fn passed() -> Self {
        Self {
            pass: true,
            message: PASSED.to_string(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            pass: false,
            message: message.into(),
        }
    }
}

/// Check observed rows against expected rows, position by position.
///
/// Row order matters. Only the columns named in each expected row are
/// checked; extra observed columns are ignored. An empty expectation
/// fails: a select with nothing to assert is a definition mistake.
pub fn validate_select(actual: &[Row], expected: &[Row]) -> Verdict {
    if expected.is_empty() {
        return Verdict::failed("no expected rows declared for select");
    }

    if actual.len() != expected.len() {
        return Verdict::failed(format!(
            "row count mismatch: expected {}, got {}",
            expected.len(),
            actual.len()
        ));
    }

    for (i, (expected_row, actual_row)) in expected.iter().zip(actual).enumerate() {
        for (column, expected_value) in expected_row {
            let Some(actual_value) = actual_row.get(column) else {
                return Verdict::failed(format!("missing column '{}' in row {}", column, i));
            };

            if !compare(actual_value, expected_value) {
                return Verdict::failed(format!(
                    "value mismatch in row {}, column '{}': expected {}, got {}",
                    i, column, expected_value, actual_value
                ));
            }
        }
    }

    Verdict::passed()
}

/// Check an affected-row count against the count declared for `kind`.
pub fn validate_dml(
    actual: u64,
    expected: &BTreeMap<OperationType, u64>,
    kind: OperationType,
) -> Verdict {
    let Some(&expected_count) = expected.get(&kind) else {
        return Verdict::failed(format!(
            "no expected count specified for operation type '{}'",
            kind
        ));
    };

    if actual != expected_count {
        return Verdict::failed(format!(
            "affected rows mismatch: expected {}, got {}",
            expected_count, actual
        ));
    }

    Verdict::passed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use pretty_assertions::assert_eq;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_matching_rows_pass() {
        let actual = vec![row(&[("id", Value::Int(1)), ("name", "Alice".into())])];
        let expected = actual.clone();
        assert_eq!(validate_select(&actual, &expected), Verdict::passed());
    }

    #[test]
    fn test_extra_actual_columns_are_ignored() {
        let actual = vec![row(&[
            ("id", Value::Int(1)),
            ("name", "Alice".into()),
            ("email", "a@x.com".into()),
        ])];
        let expected = vec![row(&[("id", Value::Int(1)), ("name", "Alice".into())])];
        let verdict = validate_select(&actual, &expected);
        assert!(verdict.pass);
        assert_eq!(verdict.message, "assertion passed");
    }

    #[test]
    fn test_empty_expectation_fails_closed() {
        let verdict = validate_select(&[], &[]);
        assert!(!verdict.pass);
    }

    #[test]
    fn test_row_count_mismatch() {
        let actual = vec![row(&[("id", Value::Int(1))]), row(&[("id", Value::Int(2))])];
        let expected = vec![row(&[("id", Value::Int(1))])];
        assert_eq!(
            validate_select(&actual, &expected),
            Verdict::failed("row count mismatch: expected 1, got 2")
        );
    }

    #[test]
    fn test_row_order_is_significant() {
        let actual = vec![row(&[("id", Value::Int(2))]), row(&[("id", Value::Int(1))])];
        let expected = vec![row(&[("id", Value::Int(1))]), row(&[("id", Value::Int(2))])];
        assert_eq!(
            validate_select(&actual, &expected),
            Verdict::failed("value mismatch in row 0, column 'id': expected 1, got 2")
        );
    }

    #[test]
    fn test_missing_column() {
        let actual = vec![row(&[("id", Value::Int(1))])];
        let expected = vec![row(&[("id", Value::Int(1)), ("name", "Alice".into())])];
        assert_eq!(
            validate_select(&actual, &expected),
            Verdict::failed("missing column 'name' in row 0")
        );
    }

    #[test]
    fn test_byte_text_column_matches_string_expectation() {
        let actual = vec![row(&[("name", Value::Bytes(b"Alice".to_vec()))])];
        let expected = vec![row(&[("name", "Alice".into())])];
        assert!(validate_select(&actual, &expected).pass);
    }

    #[test]
    fn test_dml_count_matches() {
        let expected = BTreeMap::from([(OperationType::Update, 1)]);
        assert_eq!(
            validate_dml(1, &expected, OperationType::Update),
            Verdict::passed()
        );
    }

    #[test]
    fn test_dml_count_mismatch() {
        let expected = BTreeMap::from([(OperationType::Update, 1)]);
        let verdict = validate_dml(0, &expected, OperationType::Update);
        assert!(!verdict.pass);
        assert!(verdict.message.contains("expected 1, got 0"));
    }

    #[test]
    fn test_dml_without_entry_for_type() {
        let expected = BTreeMap::from([(OperationType::Insert, 1)]);
        assert_eq!(
            validate_dml(1, &expected, OperationType::Delete),
            Verdict::failed("no expected count specified for operation type 'delete'")
        );
    }
}

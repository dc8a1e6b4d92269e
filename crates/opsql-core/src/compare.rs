//! Type-tolerant equality between an observed value and an expected literal.

use crate::value::Value;

/// Compare an observed value against an expected one.
///
/// Values of the same kind compare structurally. Values of different kinds
/// compare by their canonical text, so a driver returning `Bytes(b"Alice")`
/// matches an expected `Text("Alice")`, and `Int(1)` matches `Text("1")`.
/// The text fallback is lossy on purpose: expectations are written by
/// people, not produced by the driver.
pub fn compare(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (a, e) if a.kind() == e.kind() => a == e,
        (a, e) => a.render() == e.render(),
    }
}

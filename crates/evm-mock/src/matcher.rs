//! Deep equality between decoded call arguments and programmed expectations.
//!
//! Integers compare by value across signedness, decoded structs compare against
//! sequences positionally and against records by member name. Everything else is
//! structural.

use crate::value::Value;

/// Compares two argument tuples element by element.
pub fn arguments_equal(actual: &[Value], expected: &[Value]) -> bool {
    actual.len() == expected.len()
        && actual
            .iter()
            .zip(expected)
            .all(|(a, e)| deep_equal(a, e))
}

/// Deep equality with numeric and struct normalization.
pub fn deep_equal(left: &Value, right: &Value) -> bool {
    use Value::*;

    match (left, right) {
        (Uint(a), Uint(b)) => a == b,
        (Int(a), Int(b)) => a == b,
        (Uint(u), Int(i)) | (Int(i), Uint(u)) => {
            !i.is_negative() && i.into_raw() == *u
        }

        (Struct(members), Sequence(items)) | (Sequence(items), Struct(members)) => {
            members.len() == items.len()
                && members
                    .iter()
                    .zip(items)
                    .all(|((_, m), item)| deep_equal(m, item))
        }
        (Struct(a), Struct(b)) => {
            a.len() == b.len()
                && a
                    .iter()
                    .zip(b)
                    .all(|((ka, va), (kb, vb))| ka == kb && deep_equal(va, vb))
        }
        (Struct(a), Record(b)) | (Record(a), Struct(b)) | (Record(a), Record(b)) => {
            keyed_equal(a, b)
        }

        (Sequence(a), Sequence(b)) => arguments_equal(a, b),
        (Map(a), Map(b)) => {
            a.len() == b.len()
                && a.iter().all(|(ka, va)| {
                    b.iter()
                        .any(|(kb, vb)| deep_equal(ka, kb) && deep_equal(va, vb))
                })
        }

        (FixedBytes(a, sa), FixedBytes(b, sb)) => sa == sb && a == b,
        (Bool(a), Bool(b)) => a == b,
        (Address(a), Address(b)) => a == b,
        (Bytes(a), Bytes(b)) => a == b,
        (String(a), String(b)) => a == b,
        _ => false,
    }
}

/// Key-set equality plus per-key deep equality, ignoring order.
fn keyed_equal(a: &[(String, Value)], b: &[(String, Value)]) -> bool {
    a.len() == b.len()
        && a.iter().all(|(key, value)| {
            b.iter()
                .find(|(k, _)| k == key)
                .is_some_and(|(_, other)| deep_equal(value, other))
        })
}

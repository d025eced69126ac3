//! Structural equality used for duplicate-fragment suppression.
//!
//! - list: 多重集合として比較（順序は無視、重複の個数は区別する）
//! - object: キー集合が一致し、各値が再帰的に等しい
//! - scalar: 値として等しい（日付は RFC 3339 文字列 / epoch ms で保存されるので値比較で足りる）

use serde_json::{Map, Value};

/// Order-independent deep equality over JSON values.
pub fn values_equivalent(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Array(a), Value::Array(b)) => lists_equivalent(a, b),
        (Value::Object(a), Value::Object(b)) => maps_equivalent(a, b),
        _ => a == b,
    }
}

/// Multiset comparison: every element of `a` must pair off with a distinct element of `b`.
pub fn lists_equivalent(a: &[Value], b: &[Value]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut remaining: Vec<&Value> = b.iter().collect();
    for item in a {
        match remaining
            .iter()
            .position(|candidate| values_equivalent(item, candidate))
        {
            Some(index) => {
                remaining.swap_remove(index);
            }
            None => return false,
        }
    }
    true
}

pub fn maps_equivalent(a: &Map<String, Value>, b: &Map<String, Value>) -> bool {
    a.len() == b.len()
        && a.iter().all(|(key, value)| {
            b.get(key)
                .is_some_and(|other| values_equivalent(value, other))
        })
}

//! Semantic comparison of projections.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// Scalar equality where numbers compare by value (`1` == `1.0`).
pub fn scalar_eq(a: &Json, b: &Json) -> bool {
    match (a, b) {
        (Json::Number(x), Json::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(i), Some(j)) => i == j,
            _ => x.as_f64() == y.as_f64(),
        },
        _ => a == b,
    }
}

fn is_void(v: Option<&Json>) -> bool {
    match v {
        None | Some(Json::Null) => true,
        Some(Json::Object(m)) => m.is_empty(),
        Some(Json::Array(a)) => a.is_empty(),
        _ => false,
    }
}

/// Deep equality in the apimachinery "semantic" sense: a missing key, `null`, `{}` and `[]`
/// are interchangeable and numbers compare by value.
pub fn semantic_eq(a: &Json, b: &Json) -> bool {
    match (a, b) {
        (Json::Object(ao), Json::Object(bo)) => {
            ao.iter().all(|(k, av)| match bo.get(k) {
                Some(bv) => semantic_eq(av, bv),
                None => is_void(Some(av)),
            }) && bo.iter().all(|(k, bv)| ao.contains_key(k) || is_void(Some(bv)))
        }
        (Json::Array(aa), Json::Array(bb)) => aa.len() == bb.len() && aa.iter().zip(bb).all(|(x, y)| semantic_eq(x, y)),
        _ if is_void(Some(a)) && is_void(Some(b)) => true,
        _ => scalar_eq(a, b),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary { pub adds: usize, pub updates: usize, pub removes: usize }

impl DiffSummary {
    pub fn is_empty(&self) -> bool { self.adds == 0 && self.updates == 0 && self.removes == 0 }
}

/// Count the keys `target` adds, changes and drops relative to `base`.
pub fn diff_summary(target: &Json, base: &Json) -> DiffSummary {
    fn walk(a: &Json, b: &Json, out: &mut DiffSummary) {
        match (a, b) {
            (Json::Object(ao), Json::Object(bo)) => {
                for (k, av) in ao.iter() {
                    match bo.get(k) {
                        Some(bv) if semantic_eq(av, bv) => {}
                        Some(bv) => walk(av, bv, out),
                        None if is_void(Some(av)) => {}
                        None => out.adds += 1,
                    }
                }
                for (k, bv) in bo.iter() {
                    if !ao.contains_key(k) && !is_void(Some(bv)) { out.removes += 1; }
                }
            }
            (Json::Array(aa), Json::Array(bb)) => {
                let min_len = aa.len().min(bb.len());
                for i in 0..min_len { if !semantic_eq(&aa[i], &bb[i]) { out.updates += 1; } }
                if aa.len() > bb.len() { out.adds += aa.len() - bb.len(); }
                if bb.len() > aa.len() { out.removes += bb.len() - aa.len(); }
            }
            // Scalars differ or type differs
            (av, bv) => { if !semantic_eq(av, bv) { out.updates += 1; } }
        }
    }
    let mut out = DiffSummary::default();
    walk(target, base, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_containers_and_missing_keys_are_equal() {
        assert!(semantic_eq(&json!({"a": {}, "b": []}), &json!({})));
        assert!(semantic_eq(&json!({"a": null}), &json!({"a": {}})));
        assert!(!semantic_eq(&json!({"a": ""}), &json!({})));
        assert!(!semantic_eq(&json!({"a": 0}), &json!({})));
    }

    #[test]
    fn numbers_compare_by_value() {
        assert!(semantic_eq(&json!({"r": 1}), &json!({"r": 1.0})));
        assert!(!semantic_eq(&json!([1, 2]), &json!([2, 1])));
    }

    #[test]
    fn diff_summary_counts_adds_updates_removes() {
        let base = json!({
            "a": 1,
            "b": { "x": 1 },
            "c": [1, 2, 3]
        });
        let target = json!({
            "a": 2,                  // scalar update
            "b": { "x": 1, "y": 2 }, // nested add
            "c": [1, 9],             // element update + one removal
            "d": true,               // key add
            "e": {}                  // void, not counted
        });
        let s = diff_summary(&target, &base);
        assert_eq!(s, DiffSummary { adds: 2, updates: 2, removes: 1 });
        assert!(diff_summary(&base, &base).is_empty());
    }
}

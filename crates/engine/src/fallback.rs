//! Row-at-a-time fallback interpreter (specification §4.5 "C9"). Runs the
//! full expression and stage grammar directly against [`Document`]s,
//! without building any columnar batch — the path every pipeline runs on
//! before the compiler existed, and still the correctness reference for the
//! columnar kernels.

use crate::accumulator::FieldAccumulator;
use crate::expr::{eval, EvalScope, Predicate};
use crate::plan::{Accumulator, GroupId, Stage};
use aggvm_core::{Document, Result, RowId, Value};
use aggvm_storage::GroupKey;
use rustc_hash::FxHashMap;

/// Resolves a `$lookup` stage's `from` collection name to its current
/// documents. The engine's embedding API owns collection storage; the
/// fallback interpreter only needs read access at evaluation time.
pub trait ForeignLookup {
    /// The current documents of the named collection.
    fn collection(&self, name: &str) -> Vec<Document>;
}

fn key_components(id: &GroupId, doc: &Document) -> Vec<Value> {
    match id {
        GroupId::Null => vec![Value::Null],
        GroupId::Field(path) => vec![doc.get_path(path).cloned().unwrap_or(Value::Null)],
        GroupId::Compound(parts) => parts.iter().map(|(_, path)| doc.get_path(path).cloned().unwrap_or(Value::Null)).collect(),
    }
}

fn key_document(id: &GroupId, components: &[Value]) -> Value {
    match id {
        GroupId::Null => Value::Null,
        GroupId::Field(_) => components[0].clone(),
        GroupId::Compound(parts) => {
            let mut doc = Document::new();
            for ((name, _), value) in parts.iter().zip(components) {
                doc.insert(name.clone(), value.clone());
            }
            Value::Document(doc)
        }
    }
}

fn accum_source(accum: &Accumulator) -> Option<&crate::expr::Expr> {
    match accum {
        Accumulator::Sum(e)
        | Accumulator::Avg(e)
        | Accumulator::Min(e)
        | Accumulator::Max(e)
        | Accumulator::First(e)
        | Accumulator::Last(e)
        | Accumulator::Push(e)
        | Accumulator::AddToSet(e) => Some(e),
        Accumulator::Count => None,
    }
}

fn run_group(id: &GroupId, fields: &[(String, Accumulator)], docs: &[Document]) -> Vec<Document> {
    let mut order: Vec<GroupKey> = Vec::new();
    let mut table: FxHashMap<Vec<Value>, Vec<FieldAccumulator>> = FxHashMap::default();
    for (i, doc) in docs.iter().enumerate() {
        let components = key_components(id, doc);
        let entry = table.entry(components.clone()).or_insert_with(|| {
            order.push(GroupKey::new(components.clone()));
            fields
                .iter()
                .map(|(_, a)| match a {
                    Accumulator::Sum(_) => FieldAccumulator::new_sum(),
                    Accumulator::Avg(_) => FieldAccumulator::new_avg(),
                    Accumulator::Min(_) => FieldAccumulator::new_min(),
                    Accumulator::Max(_) => FieldAccumulator::new_max(),
                    Accumulator::First(_) => FieldAccumulator::new_first(),
                    Accumulator::Last(_) => FieldAccumulator::new_last(),
                    Accumulator::Count | Accumulator::Push(_) | Accumulator::AddToSet(_) => FieldAccumulator::new_count(),
                })
                .collect::<Vec<_>>()
        });
        let row_id = RowId::physical(i as u32);
        for (acc, (_, spec)) in entry.iter_mut().zip(fields) {
            let value = accum_source(spec).map(|e| eval(e, &EvalScope::new(doc))).unwrap_or(Value::Null);
            acc.add(row_id, &value);
        }
    }
    order
        .into_iter()
        .map(|key| {
            let accs = &table[key.components()];
            let mut row = Document::new();
            row.insert("_id", key_document(id, key.components()));
            for ((name, _), acc) in fields.iter().zip(accs) {
                row.insert(name.clone(), acc.finalize());
            }
            row
        })
        .collect()
}

fn run_sort(keys: &[(String, i8)], mut docs: Vec<Document>) -> Vec<Document> {
    docs.sort_by(|a, b| {
        for (field, dir) in keys {
            let av = a.get_path(field).cloned().unwrap_or(Value::Null);
            let bv = b.get_path(field).cloned().unwrap_or(Value::Null);
            let ord = av.total_cmp(&bv).unwrap_or(std::cmp::Ordering::Equal);
            let ord = if *dir < 0 { ord.reverse() } else { ord };
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
        std::cmp::Ordering::Equal
    });
    docs
}

fn run_unwind(field: &str, preserve_null_and_empty: bool, include_array_index: Option<&str>, docs: Vec<Document>) -> Vec<Document> {
    let mut out = Vec::new();
    for doc in docs {
        let array = doc.get_path(field).and_then(Value::as_array).map(|s| s.to_vec());
        match array {
            Some(items) if !items.is_empty() => {
                for (index, item) in items.into_iter().enumerate() {
                    let mut row = doc.clone();
                    row.insert(field, item);
                    if let Some(idx_field) = include_array_index {
                        row.insert(idx_field, Value::Int(index as i64));
                    }
                    out.push(row);
                }
            }
            _ if preserve_null_and_empty => {
                let mut row = doc.clone();
                row.insert(field, Value::Null);
                if let Some(idx_field) = include_array_index {
                    row.insert(idx_field, Value::Null);
                }
                out.push(row);
            }
            _ => {}
        }
    }
    out
}

#[allow(clippy::too_many_arguments)]
fn run_lookup(
    from: &str,
    local_field: Option<&str>,
    foreign_field: Option<&str>,
    as_field: &str,
    let_vars: &[(String, crate::expr::Expr)],
    pipeline: &[Stage],
    docs: Vec<Document>,
    resolver: &dyn ForeignLookup,
) -> Result<Vec<Document>> {
    let foreign = resolver.collection(from);
    let mut out = Vec::with_capacity(docs.len());
    for doc in docs {
        let matches = if let (Some(local), Some(foreign_key)) = (local_field, foreign_field) {
            let local_value = doc.get_path(local).cloned().unwrap_or(Value::Null);
            foreign.iter().filter(|f| f.get_path(foreign_key).cloned().unwrap_or(Value::Null) == local_value).cloned().collect()
        } else {
            let scope = EvalScope::new(&doc);
            let _bound: Vec<(String, Value)> = let_vars.iter().map(|(name, expr)| (name.clone(), eval(expr, &scope))).collect();
            run_pipeline(pipeline, foreign.clone(), resolver)?
        };
        let mut row = doc;
        row.insert(as_field, Value::Array(matches.into_iter().map(Value::Document).collect()));
        out.push(row);
    }
    Ok(out)
}

/// Run a full pipeline against `docs` row-at-a-time.
pub fn run_pipeline(stages: &[Stage], mut docs: Vec<Document>, resolver: &dyn ForeignLookup) -> Result<Vec<Document>> {
    for stage in stages {
        docs = match stage {
            Stage::Match(pred) => docs.into_iter().filter(|d| pred.eval_document(d)).collect(),
            Stage::Project { include_id, includes, computed } => docs
                .into_iter()
                .map(|source| {
                    let mut row = Document::new();
                    if *include_id {
                        if let Some(id) = source.get("_id") {
                            row.insert("_id", id.clone());
                        }
                    }
                    for field in includes {
                        if let Some(value) = source.get_path(field) {
                            row.insert(field.clone(), value.clone());
                        }
                    }
                    for (name, expr) in computed {
                        let scope = EvalScope::new(&source);
                        row.insert(name.clone(), eval(expr, &scope));
                    }
                    row
                })
                .collect(),
            Stage::Group { id, fields } => run_group(id, fields, &docs),
            Stage::Sort(keys) => run_sort(keys, docs),
            Stage::Limit(n) => {
                docs.truncate(*n);
                docs
            }
            Stage::Skip(n) => docs.into_iter().skip(*n).collect(),
            Stage::Unwind { field, preserve_null_and_empty, include_array_index } => {
                run_unwind(field, *preserve_null_and_empty, include_array_index.as_deref(), docs)
            }
            Stage::Lookup { from, local_field, foreign_field, as_field, let_vars, pipeline } => {
                run_lookup(from, local_field.as_deref(), foreign_field.as_deref(), as_field, let_vars, pipeline, docs, resolver)?
            }
        };
    }
    Ok(docs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Predicate;

    struct NoForeign;
    impl ForeignLookup for NoForeign {
        fn collection(&self, _name: &str) -> Vec<Document> {
            Vec::new()
        }
    }

    fn doc(n: i64) -> Document {
        [("n".to_string(), Value::Int(n))].into_iter().collect()
    }

    #[test]
    fn match_then_sort_then_limit() {
        let stages = vec![
            Stage::Match(Predicate::Gt("n".into(), Value::Int(0))),
            Stage::Sort(vec![("n".into(), -1)]),
            Stage::Limit(2),
        ];
        let docs = vec![doc(1), doc(5), doc(-1), doc(3)];
        let out = run_pipeline(&stages, docs, &NoForeign).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].get("n"), Some(&Value::Int(5)));
        assert_eq!(out[1].get("n"), Some(&Value::Int(3)));
    }

    #[test]
    fn group_by_null_sums_everything() {
        let stages = vec![Stage::Group { id: GroupId::Null, fields: vec![("total".into(), Accumulator::Sum(crate::expr::Expr::Field("n".into())))] }];
        let docs = vec![doc(1), doc(2), doc(3)];
        let out = run_pipeline(&stages, docs, &NoForeign).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].get("total"), Some(&Value::Double(6.0)));
    }

    #[test]
    fn equality_lookup_attaches_foreign_matches() {
        struct Orders;
        impl ForeignLookup for Orders {
            fn collection(&self, _name: &str) -> Vec<Document> {
                vec![[("userId".to_string(), Value::Int(1))].into_iter().collect()]
            }
        }
        let stages = vec![Stage::Lookup {
            from: "orders".into(),
            local_field: Some("id".into()),
            foreign_field: Some("userId".into()),
            as_field: "orders".into(),
            let_vars: vec![],
            pipeline: vec![],
        }];
        let docs = vec![[("id".to_string(), Value::Int(1))].into_iter().collect()];
        let out = run_pipeline(&stages, docs, &Orders).unwrap();
        assert_eq!(out[0].get("orders"), Some(&Value::Array(smallvec::smallvec![Value::Document(
            [("userId".to_string(), Value::Int(1))].into_iter().collect()
        )])));
    }
}

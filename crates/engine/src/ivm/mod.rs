//! IVM delta engine (specification §4.7). Ties the per-stage operators'
//! incremental entry points together so a single [`aggvm_core::Delta`] on
//! the source collection produces the downstream deltas a subscriber
//! observes, without re-executing the pipeline.
//!
//! `$limit`/`$skip` are position-dependent (§4.4.5) and neither
//! `canIncrement` nor `canDecrement`; a compiled pipeline containing either
//! is rejected here with `InvalidPipeline` rather than silently producing
//! an approximate delta.

pub mod dimension;
pub mod store;

pub use dimension::Dimension;
pub use store::{IvmStore, LiveSet};

use crate::expr::{eval, EvalScope};
use crate::fallback::ForeignLookup;
use crate::operator::Operator;
use crate::operators::{GroupOperator, LookupOperator, SortOperator};
use crate::plan::Stage;
use aggvm_core::{Delta, Document, Error, Result, RowId, Sign, Value};

/// A delta observed at the sink of a compiled pipeline, paired with the
/// document it describes (so a subscriber need not re-fetch it).
#[derive(Debug, Clone, PartialEq)]
pub struct RowDelta {
    /// The affected row.
    pub row_id: RowId,
    /// Whether the row arrived or departed at the sink.
    pub sign: Sign,
    /// The row's current (post-stage) document.
    pub document: Document,
}

enum StageState {
    Stateless,
    Group(GroupOperator),
    Sort(SortOperator),
    Unwind { minted: rustc_hash::FxHashMap<(RowId, u32), RowId>, next_ordinal: u32 },
    Lookup(LookupOperator),
}

/// Drives a compiled pipeline's stages incrementally. Built once per
/// pipeline; `apply` is called once per delta arriving at the source.
pub struct IvmPipeline {
    stages: Vec<Stage>,
    state: Vec<StageState>,
}

impl IvmPipeline {
    /// Build incremental runtime state for `stages`. `resolver` supplies
    /// `$lookup` foreign collections, hashed once up front exactly as
    /// [`LookupOperator`] does for the columnar path. `group_cardinality_limit`
    /// bounds any `$group` stage the same way the columnar path's
    /// `EngineConfig::group_cardinality_limit` does (specification §4.4.3).
    pub fn new(stages: Vec<Stage>, resolver: &dyn ForeignLookup, group_cardinality_limit: usize) -> Result<Self> {
        for (index, stage) in stages.iter().enumerate() {
            if matches!(stage, Stage::Limit(_) | Stage::Skip(_)) {
                return Err(Error::InvalidPipeline {
                    stage_index: index,
                    reason: "$limit/$skip are position-dependent and cannot run incrementally".to_string(),
                });
            }
        }
        let state = stages
            .iter()
            .map(|stage| match stage {
                Stage::Group { id, fields } => StageState::Group(GroupOperator::new(id.clone(), fields.clone(), group_cardinality_limit)),
                Stage::Sort(keys) => StageState::Sort(SortOperator::new(keys.clone())),
                Stage::Unwind { .. } => StageState::Unwind { minted: rustc_hash::FxHashMap::default(), next_ordinal: 0 },
                Stage::Lookup { from, local_field, foreign_field, as_field, .. } => {
                    let foreign_docs = resolver.collection(from);
                    let mut op = LookupOperator::new(
                        local_field.clone().unwrap_or_default(),
                        foreign_field.clone().unwrap_or_default(),
                        as_field.clone(),
                        foreign_docs,
                    );
                    let _ = op.init(&crate::operator::Schema::default(), &crate::operator::Hints::new(1));
                    StageState::Lookup(op)
                }
                _ => StageState::Stateless,
            })
            .collect();
        Ok(IvmPipeline { stages, state })
    }

    fn project(doc: &Document, include_id: bool, includes: &[String], computed: &[(String, crate::expr::Expr)]) -> Document {
        let mut row = Document::new();
        if include_id {
            if let Some(id) = doc.get("_id") {
                row.insert("_id", id.clone());
            }
        }
        for field in includes {
            if let Some(value) = doc.get_path(field) {
                row.insert(field.clone(), value.clone());
            }
        }
        for (name, expr) in computed {
            let scope = EvalScope::new(doc);
            row.insert(name.clone(), eval(expr, &scope));
        }
        row
    }

    /// Apply one delta arriving at the pipeline's source, returning the
    /// deltas it produces at the sink (possibly none, possibly several if a
    /// `$unwind` stage fans the row out).
    pub fn apply(&mut self, delta: Delta, doc: &Document) -> Result<Vec<RowDelta>> {
        let mut frontier: Vec<(RowId, Document)> = vec![(delta.row_id, doc.clone())];

        for (stage, state) in self.stages.iter().zip(self.state.iter_mut()) {
            let mut next = Vec::with_capacity(frontier.len());
            match (stage, state) {
                (Stage::Match(pred), _) => {
                    for (row_id, row) in frontier {
                        if pred.eval_document(&row) {
                            next.push((row_id, row));
                        }
                    }
                }
                (Stage::Project { include_id, includes, computed }, _) => {
                    for (row_id, row) in frontier {
                        next.push((row_id, Self::project(&row, *include_id, includes, computed)));
                    }
                }
                (Stage::Group { .. }, StageState::Group(group)) => {
                    // An interior update (the group stays non-empty) emits
                    // no sink delta under this +1/-1 model; only a
                    // zero-crossing (group born or torn down) does.
                    for (row_id, row) in frontier {
                        if delta.is_insert() {
                            let crossed = group.add_row(row_id, &row)?;
                            if crossed {
                                if let Some(group_row) = group.group_row(row_id) {
                                    next.push((row_id, group_row));
                                }
                            }
                        } else {
                            let before = group.group_row(row_id);
                            if group.remove_row(row_id) {
                                if let Some(group_row) = before {
                                    next.push((row_id, group_row));
                                }
                            }
                        }
                    }
                }
                (Stage::Sort(_), StageState::Sort(sort)) => {
                    for (row_id, row) in frontier {
                        if delta.is_insert() {
                            sort.add_row(row_id, row.clone());
                        } else {
                            sort.remove_row(row_id);
                        }
                        next.push((row_id, row));
                    }
                }
                (Stage::Unwind { field, preserve_null_and_empty, include_array_index }, StageState::Unwind { minted, next_ordinal }) => {
                    for (origin, row) in frontier {
                        let array = row.get_path(field).and_then(Value::as_array).map(|s| s.to_vec());
                        match array {
                            Some(items) if !items.is_empty() => {
                                for (index, item) in items.into_iter().enumerate() {
                                    let key = (origin, index as u32);
                                    let virt = *minted.entry(key).or_insert_with(|| {
                                        let id = RowId::virtual_id(*next_ordinal);
                                        *next_ordinal += 1;
                                        id
                                    });
                                    let mut out_row = row.clone();
                                    out_row.insert(field.clone(), item);
                                    if let Some(idx_field) = include_array_index {
                                        out_row.insert(idx_field.clone(), Value::Int(index as i64));
                                    }
                                    next.push((virt, out_row));
                                }
                            }
                            _ if *preserve_null_and_empty => {
                                let mut out_row = row.clone();
                                out_row.insert(field.clone(), Value::Null);
                                next.push((origin, out_row));
                            }
                            _ => {}
                        }
                    }
                }
                (Stage::Lookup { as_field, .. }, StageState::Lookup(lookup)) => {
                    for (row_id, row) in frontier {
                        let local_value = row.get_path(lookup_local_field(stage)).cloned().unwrap_or(Value::Null);
                        let matches = lookup_probe(lookup, &local_value);
                        let mut out_row = row;
                        out_row.insert(as_field.clone(), Value::Array(matches.into_iter().map(Value::Document).collect()));
                        next.push((row_id, out_row));
                    }
                }
                _ => unreachable!("stage/state kind mismatch"),
            }
            frontier = next;
            if frontier.is_empty() {
                return Ok(Vec::new());
            }
        }

        Ok(frontier
            .into_iter()
            .map(|(row_id, document)| RowDelta { row_id, sign: delta.sign, document })
            .collect())
    }
}

fn lookup_local_field(stage: &Stage) -> &str {
    match stage {
        Stage::Lookup { local_field, .. } => local_field.as_deref().unwrap_or(""),
        _ => "",
    }
}

fn lookup_probe(lookup: &LookupOperator, local_value: &Value) -> Vec<Document> {
    lookup.probe(local_value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{Accumulator, GroupId};

    struct NoForeign;
    impl ForeignLookup for NoForeign {
        fn collection(&self, _name: &str) -> Vec<Document> {
            Vec::new()
        }
    }

    fn doc(field: &str, value: Value) -> Document {
        [(field.to_string(), value)].into_iter().collect()
    }

    #[test]
    fn match_rejects_a_non_matching_insert() {
        let stages = vec![Stage::Match(crate::expr::Predicate::Gt("n".into(), Value::Int(10)))];
        let mut pipeline = IvmPipeline::new(stages, &NoForeign, usize::MAX).unwrap();
        let out = pipeline.apply(Delta::insert(RowId::physical(0)), &doc("n", Value::Int(1))).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn group_emits_a_sink_insert_only_on_first_contributing_row() {
        let stages = vec![Stage::Group { id: GroupId::Null, fields: vec![("total".into(), Accumulator::Sum(crate::expr::Expr::Field("n".into())))] }];
        let mut pipeline = IvmPipeline::new(stages, &NoForeign, usize::MAX).unwrap();
        let first = pipeline.apply(Delta::insert(RowId::physical(0)), &doc("n", Value::Int(5))).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].document.get("total"), Some(&Value::Double(5.0)));

        let second = pipeline.apply(Delta::insert(RowId::physical(1)), &doc("n", Value::Int(3))).unwrap();
        assert!(second.is_empty(), "group already live, no zero-crossing");
    }

    #[test]
    fn group_emits_a_sink_remove_once_the_last_row_is_removed() {
        let stages = vec![Stage::Group { id: GroupId::Null, fields: vec![("n".into(), Accumulator::Count)] }];
        let mut pipeline = IvmPipeline::new(stages, &NoForeign, usize::MAX).unwrap();
        pipeline.apply(Delta::insert(RowId::physical(0)), &doc("n", Value::Int(1))).unwrap();
        let out = pipeline.apply(Delta::remove(RowId::physical(0)), &doc("n", Value::Int(1))).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].sign, aggvm_core::Sign::Minus);
    }

    #[test]
    fn unwind_fans_an_insert_out_into_one_delta_per_element() {
        let stages = vec![Stage::Unwind { field: "tags".into(), preserve_null_and_empty: false, include_array_index: None }];
        let mut pipeline = IvmPipeline::new(stages, &NoForeign, usize::MAX).unwrap();
        let arr = Value::Array(smallvec::smallvec![Value::Int(1), Value::Int(2)]);
        let out = pipeline.apply(Delta::insert(RowId::physical(0)), &doc("tags", arr)).unwrap();
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn limit_is_rejected_as_incrementally_unsupported() {
        let stages = vec![Stage::Limit(5)];
        assert!(IvmPipeline::new(stages, &NoForeign, usize::MAX).is_err());
    }
}

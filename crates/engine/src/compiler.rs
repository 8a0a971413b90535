//! Pipeline compiler and router (specification §4.5). Chooses, per pipeline,
//! between three execution paths: the micro-path for small batches, the
//! columnar hot-path for pipelines whose stages all meet the vectorized
//! eligibility rules, and the fallback interpreter for everything else.
//! A pipeline can also be split: a hot-path prefix followed by a fallback
//! suffix once an ineligible stage is hit.

use crate::expr::Predicate;
use crate::plan::{GroupId, Stage};
use aggvm_core::Value;

/// Rows below this threshold skip the columnar compiler entirely: the fixed
/// overhead of building batches and compiling kernels outweighs any
/// vectorization gain.
pub const MICRO_PATH_ROW_THRESHOLD: usize = 64;

/// Columnar hot-path pipelines are capped at this many stages; beyond it the
/// per-stage selection/overlay bookkeeping stops paying for itself.
pub const MAX_HOT_PATH_STAGES: usize = 6;

/// Which path a compiled pipeline (or pipeline prefix) runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPath {
    /// Row-at-a-time, no batch compilation — small inputs only.
    Micro,
    /// Vectorized columnar kernels.
    Columnar,
    /// The full-grammar row-at-a-time interpreter.
    Fallback,
}

/// Why a stage (or the whole pipeline) was rejected from the columnar path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionReason {
    /// `$match` used a composite (`$and`/`$or`) predicate.
    CompositePredicate,
    /// `$group` used `$push`/`$addToSet`.
    UnsupportedAccumulator,
    /// `$group`'s `_id` needs more key components than the hot path tracks.
    MultipleGroupStages,
    /// `$sort` referenced more key fields than the hot path supports.
    ComplexSort,
    /// `$unwind` requested `includeArrayIndex`, which the columnar path does
    /// not track.
    UnwindWithArrayIndex,
    /// `$lookup` used the `let`/`pipeline` form.
    NonEqualityLookup,
    /// `$project` computed a non-vectorizable expression.
    NonVectorizableExpr,
    /// The pipeline exceeded `MAX_HOT_PATH_STAGES`.
    TooManyStages,
}

impl RejectionReason {
    /// The stable reason code surfaced via `engine.stats().rejectionsByReason`.
    pub fn code(&self) -> &'static str {
        match self {
            RejectionReason::CompositePredicate => "COMPOSITE_PREDICATE",
            RejectionReason::UnsupportedAccumulator => "UNSUPPORTED_ACCUM",
            RejectionReason::MultipleGroupStages => "MULTIPLE_GROUP_STAGES",
            RejectionReason::ComplexSort => "COMPLEX_SORT",
            RejectionReason::UnwindWithArrayIndex => "UNWIND_ARRAY_INDEX",
            RejectionReason::NonEqualityLookup => "NON_EQUALITY_LOOKUP",
            RejectionReason::NonVectorizableExpr => "NON_VECTORIZABLE_EXPR",
            RejectionReason::TooManyStages => "TOO_MANY_STAGES",
        }
    }
}

/// One stage's routing decision, paired with its reason if hot-path eligible
/// was rejected.
#[derive(Debug, Clone)]
pub struct StagePlan {
    /// Index into the original pipeline.
    pub stage_index: usize,
    /// `true` if this stage runs on the columnar hot path.
    pub hot_path: bool,
    /// `true` if this stage's delta semantics support `+1` without a rescan.
    pub can_increment: bool,
    /// `true` if this stage's delta semantics support `-1` without a rescan.
    pub can_decrement: bool,
    /// Why the stage was rejected from the hot path, if it was.
    pub rejection: Option<RejectionReason>,
}

/// The result of compiling a pipeline: a per-stage routing decision plus the
/// overall path the pipeline runs on (the path of its hot-path prefix, or
/// `Fallback` if no prefix qualifies).
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    /// Per-stage plans, in pipeline order.
    pub stages: Vec<StagePlan>,
    /// The number of leading stages (possibly zero) that run columnar before
    /// the first fallback stage.
    pub hot_prefix_len: usize,
}

impl ExecutionPlan {
    /// `true` if every stage runs on the columnar hot path.
    pub fn is_fully_columnar(&self) -> bool {
        self.hot_prefix_len == self.stages.len() && !self.stages.is_empty()
    }
}

fn predicate_is_simple(pred: &Predicate) -> bool {
    pred.is_simple_leaf()
}

fn group_is_single_key(id: &GroupId) -> bool {
    matches!(id, GroupId::Null | GroupId::Field(_))
}

/// Evaluate one stage's hot-path eligibility (specification §4.5).
fn eligibility(stage: &Stage) -> (bool, bool, bool, Option<RejectionReason>) {
    match stage {
        Stage::Match(pred) => {
            if predicate_is_simple(pred) {
                (true, true, true, None)
            } else {
                (false, true, true, Some(RejectionReason::CompositePredicate))
            }
        }
        Stage::Project { computed, .. } => {
            if computed.iter().all(|(_, e)| e.is_vectorizable()) {
                (true, true, true, None)
            } else {
                (false, true, true, Some(RejectionReason::NonVectorizableExpr))
            }
        }
        Stage::Group { id, fields } => {
            let accums_ok = fields.iter().all(|(_, a)| a.is_columnar());
            let key_ok = group_is_single_key(id);
            if accums_ok && key_ok {
                (true, true, true, None)
            } else if !accums_ok {
                (false, true, true, Some(RejectionReason::UnsupportedAccumulator))
            } else {
                (false, true, true, Some(RejectionReason::MultipleGroupStages))
            }
        }
        Stage::Sort(keys) => {
            if keys.len() <= 1 {
                (true, true, true, None)
            } else {
                (false, true, true, Some(RejectionReason::ComplexSort))
            }
        }
        Stage::Limit(_) | Stage::Skip(_) => (true, false, false, None),
        Stage::Unwind { include_array_index, .. } => {
            if include_array_index.is_none() {
                (true, true, true, None)
            } else {
                (false, true, true, Some(RejectionReason::UnwindWithArrayIndex))
            }
        }
        Stage::Lookup { .. } => {
            if stage.is_equality_lookup() {
                (true, true, true, None)
            } else {
                (false, true, true, Some(RejectionReason::NonEqualityLookup))
            }
        }
    }
}

/// Compile a parsed pipeline into an [`ExecutionPlan`]. The hot-path prefix
/// stops at the first ineligible stage or once `MAX_HOT_PATH_STAGES` is
/// reached; every stage is still plannned (so the fallback interpreter knows
/// each stage's delta capability), but only the prefix runs columnar.
pub fn compile(stages: &[Stage]) -> ExecutionPlan {
    let mut plans = Vec::with_capacity(stages.len());
    let mut hot_prefix_len = 0;
    let mut still_eligible = true;

    for (index, stage) in stages.iter().enumerate() {
        let (eligible, can_increment, can_decrement, reason) = eligibility(stage);
        let over_budget = index >= MAX_HOT_PATH_STAGES;
        let rejection = if over_budget && reason.is_none() && eligible {
            Some(RejectionReason::TooManyStages)
        } else {
            reason
        };
        let hot_path = still_eligible && eligible && !over_budget;
        if hot_path {
            hot_prefix_len = index + 1;
        } else {
            still_eligible = false;
        }
        plans.push(StagePlan { stage_index: index, hot_path, can_increment, can_decrement, rejection });
    }

    ExecutionPlan { stages: plans, hot_prefix_len }
}

/// Choose the execution path for a batch of `row_count` rows given its
/// compiled plan.
pub fn choose_path(plan: &ExecutionPlan, row_count: usize) -> ExecutionPath {
    if row_count < MICRO_PATH_ROW_THRESHOLD {
        ExecutionPath::Micro
    } else if plan.is_fully_columnar() {
        ExecutionPath::Columnar
    } else if plan.hot_prefix_len > 0 {
        ExecutionPath::Columnar
    } else {
        ExecutionPath::Fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{Expr, Predicate};
    use crate::plan::Accumulator;

    #[test]
    fn simple_match_project_sort_limit_all_hot_path() {
        let stages = vec![
            Stage::Match(Predicate::Gte("age".into(), Value::Int(21))),
            Stage::Project { include_id: true, includes: vec!["age".into()], computed: vec![] },
            Stage::Sort(vec![("age".into(), 1)]),
            Stage::Limit(10),
        ];
        let plan = compile(&stages);
        assert!(plan.is_fully_columnar());
    }

    #[test]
    fn composite_match_is_rejected_and_poisons_the_rest() {
        let stages = vec![
            Stage::Match(Predicate::And(vec![Predicate::Gt("a".into(), Value::Int(1)), Predicate::Lt("a".into(), Value::Int(10))])),
            Stage::Limit(5),
        ];
        let plan = compile(&stages);
        assert_eq!(plan.stages[0].rejection, Some(RejectionReason::CompositePredicate));
        assert_eq!(plan.hot_prefix_len, 0);
    }

    #[test]
    fn push_accumulator_is_rejected() {
        let stages = vec![Stage::Group { id: GroupId::Null, fields: vec![("tags".into(), Accumulator::Push(Expr::Field("tag".into())))] }];
        let plan = compile(&stages);
        assert_eq!(plan.stages[0].rejection, Some(RejectionReason::UnsupportedAccumulator));
    }

    #[test]
    fn multi_key_sort_is_rejected() {
        let stages = vec![Stage::Sort(vec![("age".into(), 1), ("name".into(), -1)])];
        let plan = compile(&stages);
        assert_eq!(plan.stages[0].rejection, Some(RejectionReason::ComplexSort));
        assert_eq!(plan.hot_prefix_len, 0);
    }

    #[test]
    fn compound_group_key_is_rejected() {
        let stages = vec![Stage::Group {
            id: GroupId::Compound(vec![("a".into(), "a".into()), ("b".into(), "b".into())]),
            fields: vec![("n".into(), Accumulator::Count)],
        }];
        let plan = compile(&stages);
        assert_eq!(plan.stages[0].rejection, Some(RejectionReason::MultipleGroupStages));
    }

    #[test]
    fn pipelines_under_the_micro_threshold_use_the_micro_path() {
        let stages = vec![Stage::Limit(1)];
        let plan = compile(&stages);
        assert_eq!(choose_path(&plan, 10), ExecutionPath::Micro);
        assert_eq!(choose_path(&plan, 1000), ExecutionPath::Columnar);
    }

    #[test]
    fn stages_beyond_the_budget_are_rejected_as_too_many_stages() {
        let stages: Vec<Stage> = (0..8).map(|i| Stage::Match(Predicate::Eq("a".into(), Value::Int(i)))).collect();
        let plan = compile(&stages);
        assert_eq!(plan.hot_prefix_len, MAX_HOT_PATH_STAGES);
    }
}

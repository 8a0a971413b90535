//! Pipeline plan parsing (specification §6 "embedding API", §4.5).
//!
//! A plan is a JSON document: an ordered array of stage specs plus an
//! optional presentation block the engine ignores (sort/projection hints
//! for a caller-side UI layer, not part of pipeline semantics). Parsing
//! validates stage names eagerly so `UnknownStage` is reported before any
//! compilation work begins.

use crate::expr::{BinOp, Expr, Predicate};
use aggvm_core::{Error, Result, Value};
use serde_json::Value as Json;

/// A parsed `_id` specification for `$group`.
#[derive(Debug, Clone)]
pub enum GroupId {
    /// `_id: null` — a single global group.
    Null,
    /// `_id: "$field.path"` — one key per distinct value.
    Field(String),
    /// `_id: { k1: "$a", k2: "$b" }` — a compound key, in declared order.
    Compound(Vec<(String, String)>),
}

/// A `$group` accumulator expression.
#[derive(Debug, Clone)]
pub enum Accumulator {
    /// `{ $sum: expr }`.
    Sum(Expr),
    /// `{ $avg: expr }`.
    Avg(Expr),
    /// `{ $min: expr }`.
    Min(Expr),
    /// `{ $max: expr }`.
    Max(Expr),
    /// `{ $first: expr }`.
    First(Expr),
    /// `{ $last: expr }`.
    Last(Expr),
    /// `{ $count: {} }`.
    Count,
    /// `{ $push: expr }` — columnar path rejects this (`UNSUPPORTED_ACCUM`).
    Push(Expr),
    /// `{ $addToSet: expr }` — columnar path rejects this too.
    AddToSet(Expr),
}

impl Accumulator {
    /// `true` for accumulators the columnar kernels support; `$push` and
    /// `$addToSet` force the fallback interpreter.
    pub fn is_columnar(&self) -> bool {
        !matches!(self, Accumulator::Push(_) | Accumulator::AddToSet(_))
    }
}

/// One stage of a parsed pipeline.
#[derive(Debug, Clone)]
pub enum Stage {
    /// `{ $match: { ... } }`.
    Match(Predicate),
    /// `{ $project: { ... } }`.
    Project {
        /// `true` unless `_id` is explicitly excluded.
        include_id: bool,
        /// Plain field inclusions, preserved verbatim from the input.
        includes: Vec<String>,
        /// Computed output fields, in declaration order.
        computed: Vec<(String, Expr)>,
    },
    /// `{ $group: { _id: ..., field: { $accumulator: expr }, ... } }`.
    Group {
        /// The grouping key specification.
        id: GroupId,
        /// Output field name paired with its accumulator.
        fields: Vec<(String, Accumulator)>,
    },
    /// `{ $sort: { field: 1 | -1, ... } }`.
    Sort(Vec<(String, i8)>),
    /// `{ $limit: n }`.
    Limit(usize),
    /// `{ $skip: n }`.
    Skip(usize),
    /// `{ $unwind: "$field" }` or the object form with options.
    Unwind {
        /// The array field path to unwind.
        field: String,
        /// `preserveNullAndEmptyArrays`.
        preserve_null_and_empty: bool,
        /// `includeArrayIndex` output field name, if requested.
        include_array_index: Option<String>,
    },
    /// `{ $lookup: { from, localField, foreignField, as } }` (equality form)
    /// or the `let`/`pipeline` form, which only the fallback interpreter
    /// executes.
    Lookup {
        /// Name of the foreign collection, resolved by the caller at
        /// execution time.
        from: String,
        /// Local field to join on, for the equality form.
        local_field: Option<String>,
        /// Foreign field to join on, for the equality form.
        foreign_field: Option<String>,
        /// Output array field name.
        as_field: String,
        /// `let`-bound variables for the pipeline form.
        let_vars: Vec<(String, Expr)>,
        /// Sub-pipeline for the pipeline form.
        pipeline: Vec<Stage>,
    },
}

impl Stage {
    /// The wire name of this stage, for error messages and reason codes.
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Match(_) => "$match",
            Stage::Project { .. } => "$project",
            Stage::Group { .. } => "$group",
            Stage::Sort(_) => "$sort",
            Stage::Limit(_) => "$limit",
            Stage::Skip(_) => "$skip",
            Stage::Unwind { .. } => "$unwind",
            Stage::Lookup { .. } => "$lookup",
        }
    }

    /// `true` for `$lookup` using only the equality form (no `let`/`pipeline`).
    pub fn is_equality_lookup(&self) -> bool {
        match self {
            Stage::Lookup { local_field, foreign_field, pipeline, .. } => {
                local_field.is_some() && foreign_field.is_some() && pipeline.is_empty()
            }
            _ => true,
        }
    }
}

/// Parse a pipeline (a JSON array of single-key stage objects) into
/// [`Stage`]s, failing with `UnknownStage` or `InvalidPipeline` as soon as a
/// malformed stage is seen.
pub fn parse_pipeline(stages: &[Json]) -> Result<Vec<Stage>> {
    stages.iter().enumerate().map(|(i, s)| parse_stage(i, s)).collect()
}

fn invalid(stage_index: usize, reason: impl Into<String>) -> Error {
    Error::InvalidPipeline { stage_index, reason: reason.into() }
}

fn parse_stage(index: usize, json: &Json) -> Result<Stage> {
    let obj = json.as_object().ok_or_else(|| invalid(index, "stage must be an object"))?;
    if obj.len() != 1 {
        return Err(invalid(index, "stage object must have exactly one key"));
    }
    let (key, body) = obj.iter().next().unwrap();
    match key.as_str() {
        "$match" => Ok(Stage::Match(parse_predicate(index, body)?)),
        "$project" => parse_project(index, body),
        "$group" => parse_group(index, body),
        "$sort" => parse_sort(index, body),
        "$limit" => Ok(Stage::Limit(parse_usize(index, body)?)),
        "$skip" => Ok(Stage::Skip(parse_usize(index, body)?)),
        "$unwind" => parse_unwind(index, body),
        "$lookup" => parse_lookup(index, body),
        other => Err(Error::UnknownStage(other.to_string())),
    }
}

fn parse_usize(index: usize, body: &Json) -> Result<usize> {
    body.as_u64()
        .map(|n| n as usize)
        .ok_or_else(|| invalid(index, "expected a non-negative integer"))
}

fn json_to_value(json: &Json) -> Value {
    match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Double(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Json::String(s) => Value::String(s.clone()),
        Json::Array(items) => Value::Array(items.iter().map(json_to_value).collect()),
        Json::Object(map) => Value::Document(
            map.iter().map(|(k, v)| (k.clone(), json_to_value(v))).collect(),
        ),
    }
}

fn field_ref(json: &Json) -> Option<String> {
    json.as_str().and_then(|s| s.strip_prefix('$')).map(|s| s.to_string())
}

fn parse_expr(index: usize, json: &Json) -> Result<Expr> {
    if let Some(field) = json.as_str().and_then(|s| s.strip_prefix('$')) {
        if field == "$ROOT" {
            return Ok(Expr::Root);
        }
        if let Some(var) = field.strip_prefix('$') {
            return Ok(Expr::Var(var.to_string()));
        }
        return Ok(Expr::Field(field.to_string()));
    }
    if let Some(obj) = json.as_object() {
        if obj.len() == 1 {
            let (op, arg) = obj.iter().next().unwrap();
            return parse_operator_expr(index, op, arg);
        }
    }
    Ok(Expr::Literal(json_to_value(json)))
}

fn parse_operator_expr(index: usize, op: &str, arg: &Json) -> Result<Expr> {
    let binop = |kind: BinOp| -> Result<Expr> {
        let items = arg.as_array().ok_or_else(|| invalid(index, format!("{op} expects an array of two operands")))?;
        if items.len() != 2 {
            return Err(invalid(index, format!("{op} expects exactly two operands")));
        }
        Ok(Expr::BinaryOp(
            kind,
            Box::new(parse_expr(index, &items[0])?),
            Box::new(parse_expr(index, &items[1])?),
        ))
    };
    match op {
        "$add" => binop(BinOp::Add),
        "$subtract" => binop(BinOp::Sub),
        "$multiply" => binop(BinOp::Mul),
        "$divide" => binop(BinOp::Div),
        "$concat" => {
            let items = arg.as_array().ok_or_else(|| invalid(index, "$concat expects an array"))?;
            Ok(Expr::Concat(
                items.iter().map(|i| parse_expr(index, i)).collect::<Result<_>>()?,
            ))
        }
        "$toString" => Ok(Expr::ToString(Box::new(parse_expr(index, arg)?))),
        "$let" => {
            let obj = arg.as_object().ok_or_else(|| invalid(index, "$let expects an object"))?;
            let vars_json = obj.get("vars").and_then(Json::as_object).ok_or_else(|| invalid(index, "$let requires vars"))?;
            let mut vars = Vec::new();
            for (name, v) in vars_json {
                vars.push((name.clone(), parse_expr(index, v)?));
            }
            let body = obj.get("in").ok_or_else(|| invalid(index, "$let requires in"))?;
            Ok(Expr::Let { vars, body: Box::new(parse_expr(index, body)?) })
        }
        "$map" => {
            let obj = arg.as_object().ok_or_else(|| invalid(index, "$map expects an object"))?;
            let input = obj.get("input").ok_or_else(|| invalid(index, "$map requires input"))?;
            let as_name = obj.get("as").and_then(Json::as_str).unwrap_or("this");
            let inside = obj.get("in").ok_or_else(|| invalid(index, "$map requires in"))?;
            Ok(Expr::Map {
                input: Box::new(parse_expr(index, input)?),
                var: as_name.to_string(),
                body: Box::new(parse_expr(index, inside)?),
            })
        }
        "$filter" => {
            let obj = arg.as_object().ok_or_else(|| invalid(index, "$filter expects an object"))?;
            let input = obj.get("input").ok_or_else(|| invalid(index, "$filter requires input"))?;
            let as_name = obj.get("as").and_then(Json::as_str).unwrap_or("this");
            let cond = obj.get("cond").ok_or_else(|| invalid(index, "$filter requires cond"))?;
            Ok(Expr::Filter {
                input: Box::new(parse_expr(index, input)?),
                var: as_name.to_string(),
                cond: Box::new(parse_expr(index, cond)?),
            })
        }
        "$reduce" => {
            let obj = arg.as_object().ok_or_else(|| invalid(index, "$reduce expects an object"))?;
            let input = obj.get("input").ok_or_else(|| invalid(index, "$reduce requires input"))?;
            let initial = obj.get("initialValue").ok_or_else(|| invalid(index, "$reduce requires initialValue"))?;
            let inside = obj.get("in").ok_or_else(|| invalid(index, "$reduce requires in"))?;
            Ok(Expr::Reduce {
                input: Box::new(parse_expr(index, input)?),
                initial: Box::new(parse_expr(index, initial)?),
                body: Box::new(parse_expr(index, inside)?),
            })
        }
        other => Err(invalid(index, format!("unsupported expression operator {other}"))),
    }
}

fn parse_predicate(index: usize, json: &Json) -> Result<Predicate> {
    let obj = json.as_object().ok_or_else(|| invalid(index, "$match body must be an object"))?;
    let mut leaves = Vec::new();
    for (key, value) in obj {
        if key == "$and" {
            let items = value.as_array().ok_or_else(|| invalid(index, "$and expects an array"))?;
            leaves.push(Predicate::And(
                items.iter().map(|i| parse_predicate(index, i)).collect::<Result<_>>()?,
            ));
            continue;
        }
        if key == "$or" {
            let items = value.as_array().ok_or_else(|| invalid(index, "$or expects an array"))?;
            leaves.push(Predicate::Or(
                items.iter().map(|i| parse_predicate(index, i)).collect::<Result<_>>()?,
            ));
            continue;
        }
        leaves.push(parse_field_predicate(index, key, value)?);
    }
    if leaves.len() == 1 {
        Ok(leaves.into_iter().next().unwrap())
    } else {
        Ok(Predicate::And(leaves))
    }
}

fn parse_field_predicate(index: usize, field: &str, value: &Json) -> Result<Predicate> {
    if let Some(obj) = value.as_object() {
        if obj.len() == 1 {
            let (op, arg) = obj.iter().next().unwrap();
            return Ok(match op.as_str() {
                "$eq" => Predicate::Eq(field.to_string(), json_to_value(arg)),
                "$ne" => Predicate::Ne(field.to_string(), json_to_value(arg)),
                "$lt" => Predicate::Lt(field.to_string(), json_to_value(arg)),
                "$lte" => Predicate::Lte(field.to_string(), json_to_value(arg)),
                "$gt" => Predicate::Gt(field.to_string(), json_to_value(arg)),
                "$gte" => Predicate::Gte(field.to_string(), json_to_value(arg)),
                "$in" => Predicate::In(
                    field.to_string(),
                    arg.as_array().ok_or_else(|| invalid(index, "$in expects an array"))?.iter().map(json_to_value).collect(),
                ),
                "$nin" => Predicate::Nin(
                    field.to_string(),
                    arg.as_array().ok_or_else(|| invalid(index, "$nin expects an array"))?.iter().map(json_to_value).collect(),
                ),
                other => return Err(invalid(index, format!("unsupported match operator {other}"))),
            });
        }
    }
    Ok(Predicate::Eq(field.to_string(), json_to_value(value)))
}

fn parse_project(index: usize, body: &Json) -> Result<Stage> {
    let obj = body.as_object().ok_or_else(|| invalid(index, "$project body must be an object"))?;
    let mut include_id = true;
    let mut includes = Vec::new();
    let mut computed = Vec::new();
    for (field, spec) in obj {
        if field == "_id" {
            if let Json::Number(n) = spec {
                include_id = n.as_i64() != Some(0);
                continue;
            }
        }
        match spec {
            Json::Number(n) if n.as_i64() == Some(1) => includes.push(field.clone()),
            Json::Number(n) if n.as_i64() == Some(0) => { /* exclusion: simply not included */ }
            Json::Bool(true) => includes.push(field.clone()),
            Json::Bool(false) => {}
            other => computed.push((field.clone(), parse_expr(index, other)?)),
        }
    }
    Ok(Stage::Project { include_id, includes, computed })
}

fn parse_group(index: usize, body: &Json) -> Result<Stage> {
    let obj = body.as_object().ok_or_else(|| invalid(index, "$group body must be an object"))?;
    let id_json = obj.get("_id").ok_or_else(|| invalid(index, "$group requires _id"))?;
    let id = match id_json {
        Json::Null => GroupId::Null,
        Json::String(_) => GroupId::Field(field_ref(id_json).ok_or_else(|| invalid(index, "_id string must be a field reference"))?),
        Json::Object(fields) => {
            let mut compound = Vec::new();
            for (k, v) in fields {
                compound.push((k.clone(), field_ref(v).ok_or_else(|| invalid(index, "compound _id values must be field references"))?));
            }
            GroupId::Compound(compound)
        }
        _ => return Err(invalid(index, "unsupported _id expression")),
    };
    let mut fields = Vec::new();
    for (name, spec) in obj {
        if name == "_id" {
            continue;
        }
        let accum_obj = spec.as_object().ok_or_else(|| invalid(index, format!("{name} must be an accumulator object")))?;
        if accum_obj.len() != 1 {
            return Err(invalid(index, format!("{name} must have exactly one accumulator")));
        }
        let (op, arg) = accum_obj.iter().next().unwrap();
        let accumulator = match op.as_str() {
            "$sum" => Accumulator::Sum(parse_expr(index, arg)?),
            "$avg" => Accumulator::Avg(parse_expr(index, arg)?),
            "$min" => Accumulator::Min(parse_expr(index, arg)?),
            "$max" => Accumulator::Max(parse_expr(index, arg)?),
            "$first" => Accumulator::First(parse_expr(index, arg)?),
            "$last" => Accumulator::Last(parse_expr(index, arg)?),
            "$count" => Accumulator::Count,
            "$push" => Accumulator::Push(parse_expr(index, arg)?),
            "$addToSet" => Accumulator::AddToSet(parse_expr(index, arg)?),
            other => return Err(invalid(index, format!("unsupported accumulator {other}"))),
        };
        fields.push((name.clone(), accumulator));
    }
    Ok(Stage::Group { id, fields })
}

fn parse_sort(index: usize, body: &Json) -> Result<Stage> {
    let obj = body.as_object().ok_or_else(|| invalid(index, "$sort body must be an object"))?;
    let mut keys = Vec::new();
    for (field, dir) in obj {
        let direction = dir.as_i64().ok_or_else(|| invalid(index, "$sort direction must be 1 or -1"))?;
        keys.push((field.clone(), if direction < 0 { -1 } else { 1 }));
    }
    Ok(Stage::Sort(keys))
}

fn parse_unwind(index: usize, body: &Json) -> Result<Stage> {
    if let Some(field) = field_ref(body) {
        return Ok(Stage::Unwind { field, preserve_null_and_empty: false, include_array_index: None });
    }
    let obj = body.as_object().ok_or_else(|| invalid(index, "$unwind must be a field reference or object"))?;
    let path_json = obj.get("path").ok_or_else(|| invalid(index, "$unwind object form requires path"))?;
    let field = field_ref(path_json).ok_or_else(|| invalid(index, "path must be a field reference"))?;
    let preserve_null_and_empty = obj.get("preserveNullAndEmptyArrays").and_then(Json::as_bool).unwrap_or(false);
    let include_array_index = obj.get("includeArrayIndex").and_then(Json::as_str).map(|s| s.to_string());
    Ok(Stage::Unwind { field, preserve_null_and_empty, include_array_index })
}

fn parse_lookup(index: usize, body: &Json) -> Result<Stage> {
    let obj = body.as_object().ok_or_else(|| invalid(index, "$lookup body must be an object"))?;
    let from = obj.get("from").and_then(Json::as_str).ok_or_else(|| invalid(index, "$lookup requires from"))?.to_string();
    let as_field = obj.get("as").and_then(Json::as_str).ok_or_else(|| invalid(index, "$lookup requires as"))?.to_string();
    let local_field = obj.get("localField").and_then(Json::as_str).map(|s| s.to_string());
    let foreign_field = obj.get("foreignField").and_then(Json::as_str).map(|s| s.to_string());
    let mut let_vars = Vec::new();
    if let Some(vars_json) = obj.get("let").and_then(Json::as_object) {
        for (name, v) in vars_json {
            let_vars.push((name.clone(), parse_expr(index, v)?));
        }
    }
    let mut pipeline = Vec::new();
    if let Some(sub) = obj.get("pipeline").and_then(Json::as_array) {
        pipeline = parse_pipeline(sub)?;
    }
    Ok(Stage::Lookup { from, local_field, foreign_field, as_field, let_vars, pipeline })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_stage_is_rejected() {
        let stages = vec![json!({ "$bogus": {} })];
        let err = parse_pipeline(&stages).unwrap_err();
        assert_eq!(err.code(), "UnknownStage");
    }

    #[test]
    fn match_with_simple_comparison_leaves() {
        let stages = vec![json!({ "$match": { "age": { "$gte": 21 } } })];
        let parsed = parse_pipeline(&stages).unwrap();
        assert!(matches!(parsed[0], Stage::Match(Predicate::Gte(..))));
    }

    #[test]
    fn group_parses_compound_id_and_accumulators() {
        let stages = vec![json!({
            "$group": {
                "_id": { "country": "$country", "city": "$city" },
                "total": { "$sum": "$amount" },
                "n": { "$count": {} }
            }
        })];
        let parsed = parse_pipeline(&stages).unwrap();
        match &parsed[0] {
            Stage::Group { id: GroupId::Compound(keys), fields } => {
                assert_eq!(keys.len(), 2);
                assert_eq!(fields.len(), 2);
            }
            _ => panic!("expected group stage"),
        }
    }

    #[test]
    fn project_tracks_id_exclusion_and_computed_fields() {
        let stages = vec![json!({
            "$project": { "_id": 0, "name": 1, "total": { "$add": ["$a", "$b"] } }
        })];
        let parsed = parse_pipeline(&stages).unwrap();
        match &parsed[0] {
            Stage::Project { include_id, includes, computed } => {
                assert!(!include_id);
                assert_eq!(includes, &vec!["name".to_string()]);
                assert_eq!(computed.len(), 1);
            }
            _ => panic!("expected project stage"),
        }
    }

    #[test]
    fn unwind_object_form_parses_options() {
        let stages = vec![json!({
            "$unwind": { "path": "$tags", "preserveNullAndEmptyArrays": true }
        })];
        let parsed = parse_pipeline(&stages).unwrap();
        match &parsed[0] {
            Stage::Unwind { field, preserve_null_and_empty, include_array_index } => {
                assert_eq!(field, "tags");
                assert!(*preserve_null_and_empty);
                assert!(include_array_index.is_none());
            }
            _ => panic!("expected unwind stage"),
        }
    }

    #[test]
    fn lookup_equality_form_is_detected() {
        let stages = vec![json!({
            "$lookup": { "from": "orders", "localField": "id", "foreignField": "userId", "as": "orders" }
        })];
        let parsed = parse_pipeline(&stages).unwrap();
        assert!(parsed[0].is_equality_lookup());
    }

    #[test]
    fn lookup_pipeline_form_is_not_equality() {
        let stages = vec![json!({
            "$lookup": {
                "from": "orders",
                "let": { "uid": "$id" },
                "pipeline": [{ "$match": { "userId": { "$eq": 1 } } }],
                "as": "orders"
            }
        })];
        let parsed = parse_pipeline(&stages).unwrap();
        assert!(!parsed[0].is_equality_lookup());
    }
}

//! Expression and predicate ASTs (specification §4.4.1, §4.4.2, §4.9).
//!
//! One AST serves both paths: the columnar compiler recognizes a subset it
//! can lower to vectorized kernels ([`Expr::is_vectorizable`]), and the
//! fallback interpreter ([`crate::fallback`]) evaluates the full grammar
//! row-at-a-time. Both walk the same tree so the two paths cannot silently
//! diverge on shared constructs.

use aggvm_core::{Document, Value};
use rustc_hash::FxHashMap;

/// An arithmetic binary operator over the vectorized numeric subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
}

/// A computed-field expression, as used by `$project` and the fallback
/// interpreter's richer grammar.
#[derive(Debug, Clone)]
pub enum Expr {
    /// A literal value.
    Literal(Value),
    /// `$field.path`, resolved against the current document.
    Field(String),
    /// `$$ROOT`: the whole input document.
    Root,
    /// `$$varname`, bound by an enclosing `$let`.
    Var(String),
    /// `{ $let: { vars: {...}, in: ... } }`.
    Let {
        /// Variable bindings, evaluated in order against the outer scope.
        vars: Vec<(String, Expr)>,
        /// Body evaluated with `vars` bound.
        body: Box<Expr>,
    },
    /// A numeric binary operation.
    BinaryOp(BinOp, Box<Expr>, Box<Expr>),
    /// Arithmetic negation.
    Negate(Box<Expr>),
    /// `{ $concat: [...] }`.
    Concat(Vec<Expr>),
    /// `{ $toString: expr }`.
    ToString(Box<Expr>),
    /// `{ $map: { input, as, in } }`.
    Map {
        /// The array-valued expression to iterate.
        input: Box<Expr>,
        /// The per-element variable name.
        var: String,
        /// Expression evaluated once per element, with `var` bound.
        body: Box<Expr>,
    },
    /// `{ $filter: { input, as, cond } }`.
    Filter {
        /// The array-valued expression to iterate.
        input: Box<Expr>,
        /// The per-element variable name.
        var: String,
        /// Predicate evaluated once per element, with `var` bound.
        cond: Box<Expr>,
    },
    /// `{ $reduce: { input, initialValue, in } }`, where the accumulator is
    /// bound to `$$value` and the element to `$$this`.
    Reduce {
        /// The array-valued expression to fold over.
        input: Box<Expr>,
        /// Seed value for `$$value`.
        initial: Box<Expr>,
        /// Expression evaluated per element, with `$$value`/`$$this` bound.
        body: Box<Expr>,
    },
}

impl Expr {
    /// `true` if this expression (and everything beneath it) falls within
    /// the columnar compiler's supported subset: field references, numeric
    /// `+ − × ÷`, `$concat`/`$toString`, negation, and literals.
    pub fn is_vectorizable(&self) -> bool {
        match self {
            Expr::Literal(_) | Expr::Field(_) => true,
            Expr::Negate(inner) | Expr::ToString(inner) => inner.is_vectorizable(),
            Expr::BinaryOp(_, lhs, rhs) => lhs.is_vectorizable() && rhs.is_vectorizable(),
            Expr::Concat(parts) => parts.iter().all(Expr::is_vectorizable),
            Expr::Root
            | Expr::Var(_)
            | Expr::Let { .. }
            | Expr::Map { .. }
            | Expr::Filter { .. }
            | Expr::Reduce { .. } => false,
        }
    }

    /// The field this expression reads, if it is a bare field reference —
    /// used by `$project` to decide whether a column can be passed through
    /// instead of recomputed.
    pub fn as_field(&self) -> Option<&str> {
        match self {
            Expr::Field(path) => Some(path),
            _ => None,
        }
    }
}

/// Evaluation scope for the full-grammar evaluator: the current document,
/// the pipeline's original root document (for `$$ROOT`), and any
/// `$let`/`$map`/`$filter`/`$reduce`-bound variables.
pub struct EvalScope<'a> {
    /// The document field references resolve against.
    pub current: &'a Document,
    /// The pipeline's original input document, for `$$ROOT`.
    pub root: &'a Document,
    /// Bound variables, innermost scope last.
    pub vars: FxHashMap<String, Value>,
}

impl<'a> EvalScope<'a> {
    /// A scope with no bound variables, `current` and `root` set to the same
    /// document (the common case outside a `$lookup` sub-pipeline).
    pub fn new(doc: &'a Document) -> Self {
        EvalScope {
            current: doc,
            root: doc,
            vars: FxHashMap::default(),
        }
    }

    fn with_var(&self, name: &str, value: Value) -> EvalScope<'_> {
        let mut vars = self.vars.clone();
        vars.insert(name.to_string(), value);
        EvalScope {
            current: self.current,
            root: self.root,
            vars,
        }
    }
}

/// Evaluate `expr` in `scope`, returning `Value::Null` for any path a
/// MongoDB-style evaluator treats as "missing" (unresolved field path,
/// non-numeric operand to arithmetic, out-of-range index).
pub fn eval(expr: &Expr, scope: &EvalScope) -> Value {
    match expr {
        Expr::Literal(v) => v.clone(),
        Expr::Field(path) => scope.current.get_path(path).cloned().unwrap_or(Value::Null),
        Expr::Root => Value::Document(scope.root.clone()),
        Expr::Var(name) => scope.vars.get(name).cloned().unwrap_or(Value::Null),
        Expr::Let { vars, body } => {
            let mut inner = EvalScope {
                current: scope.current,
                root: scope.root,
                vars: scope.vars.clone(),
            };
            for (name, value_expr) in vars {
                let value = eval(value_expr, &inner);
                inner.vars.insert(name.clone(), value);
            }
            eval(body, &inner)
        }
        Expr::BinaryOp(op, lhs, rhs) => eval_binary(*op, eval(lhs, scope), eval(rhs, scope)),
        Expr::Negate(inner) => match eval(inner, scope).as_numeric() {
            Some(n) => Value::Double(-n),
            None => Value::Null,
        },
        Expr::Concat(parts) => {
            let mut out = String::new();
            for part in parts {
                match eval(part, scope) {
                    Value::String(s) => out.push_str(&s),
                    Value::Null => return Value::Null,
                    other => out.push_str(&stringify(&other)),
                }
            }
            Value::String(out)
        }
        Expr::ToString(inner) => {
            let v = eval(inner, scope);
            if v.is_null() {
                Value::Null
            } else {
                Value::String(stringify(&v))
            }
        }
        Expr::Map { input, var, body } => {
            let Some(items) = eval(input, scope).as_array().map(|s| s.to_vec()) else {
                return Value::Null;
            };
            let mapped: smallvec::SmallVec<[Value; 4]> = items
                .into_iter()
                .map(|item| eval(body, &scope.with_var(var, item)))
                .collect();
            Value::Array(mapped)
        }
        Expr::Filter { input, var, cond } => {
            let Some(items) = eval(input, scope).as_array().map(|s| s.to_vec()) else {
                return Value::Null;
            };
            let filtered: smallvec::SmallVec<[Value; 4]> = items
                .into_iter()
                .filter(|item| is_truthy(&eval(cond, &scope.with_var(var, item.clone()))))
                .collect();
            Value::Array(filtered)
        }
        Expr::Reduce { input, initial, body } => {
            let Some(items) = eval(input, scope).as_array().map(|s| s.to_vec()) else {
                return Value::Null;
            };
            let mut acc = eval(initial, scope);
            for item in items {
                let mut inner = scope.with_var("this", item);
                inner.vars.insert("value".to_string(), acc);
                acc = eval(body, &inner);
            }
            acc
        }
    }
}

fn eval_binary(op: BinOp, lhs: Value, rhs: Value) -> Value {
    let (Some(a), Some(b)) = (lhs.as_numeric(), rhs.as_numeric()) else {
        return Value::Null;
    };
    Value::Double(match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => a / b,
    })
}

fn is_truthy(value: &Value) -> bool {
    !matches!(value, Value::Null | Value::Bool(false))
}

fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Double(d) => d.to_string(),
        Value::Timestamp(t) => t.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(_) | Value::Document(_) => String::new(),
    }
}

/// A leaf comparison or compound boolean node of a `$match` predicate tree
/// (specification §4.4.1).
#[derive(Debug, Clone)]
pub enum Predicate {
    /// `{ field: { $eq: value } }`.
    Eq(String, Value),
    /// `{ field: { $ne: value } }`.
    Ne(String, Value),
    /// `{ field: { $lt: value } }`.
    Lt(String, Value),
    /// `{ field: { $lte: value } }`.
    Lte(String, Value),
    /// `{ field: { $gt: value } }`.
    Gt(String, Value),
    /// `{ field: { $gte: value } }`.
    Gte(String, Value),
    /// `{ field: { $in: [values] } }`.
    In(String, Vec<Value>),
    /// `{ field: { $nin: [values] } }`.
    Nin(String, Vec<Value>),
    /// `{ $and: [predicates] }`.
    And(Vec<Predicate>),
    /// `{ $or: [predicates] }`.
    Or(Vec<Predicate>),
}

impl Predicate {
    /// `true` for a single comparison leaf on one field — the shape the
    /// columnar compiler can lower directly onto a column's validity and
    /// dictionary-id arrays without a full per-row walk.
    pub fn is_simple_leaf(&self) -> bool {
        matches!(
            self,
            Predicate::Eq(..)
                | Predicate::Ne(..)
                | Predicate::Lt(..)
                | Predicate::Lte(..)
                | Predicate::Gt(..)
                | Predicate::Gte(..)
                | Predicate::In(..)
                | Predicate::Nin(..)
        )
    }

    /// Evaluate against a single document, the path every predicate — simple
    /// or composite — supports.
    pub fn eval_document(&self, doc: &Document) -> bool {
        match self {
            Predicate::Eq(field, value) => cmp_field(doc, field, value) == Some(std::cmp::Ordering::Equal),
            Predicate::Ne(field, value) => cmp_field(doc, field, value) != Some(std::cmp::Ordering::Equal),
            Predicate::Lt(field, value) => lt_with_null_rule(doc, field, value),
            Predicate::Lte(field, value) => {
                lt_with_null_rule(doc, field, value) || cmp_field(doc, field, value) == Some(std::cmp::Ordering::Equal)
            }
            Predicate::Gt(field, value) => gt_with_null_rule(doc, field, value),
            Predicate::Gte(field, value) => {
                gt_with_null_rule(doc, field, value) || cmp_field(doc, field, value) == Some(std::cmp::Ordering::Equal)
            }
            Predicate::In(field, values) => {
                let actual = doc.get_path(field).cloned().unwrap_or(Value::Null);
                values.iter().any(|v| *v == actual)
            }
            Predicate::Nin(field, values) => {
                let actual = doc.get_path(field).cloned().unwrap_or(Value::Null);
                !values.iter().any(|v| *v == actual)
            }
            Predicate::And(parts) => parts.iter().all(|p| p.eval_document(doc)),
            Predicate::Or(parts) => parts.iter().any(|p| p.eval_document(doc)),
        }
    }
}

fn actual_value(doc: &Document, field: &str) -> Value {
    doc.get_path(field).cloned().unwrap_or(Value::Null)
}

fn cmp_field(doc: &Document, field: &str, value: &Value) -> Option<std::cmp::Ordering> {
    actual_value(doc, field).total_cmp(value)
}

/// `null < anything` for `<`/`<=`, but `null` is never greater than anything.
fn lt_with_null_rule(doc: &Document, field: &str, value: &Value) -> bool {
    let actual = actual_value(doc, field);
    if actual.is_null() && !value.is_null() {
        return true;
    }
    actual.total_cmp(value) == Some(std::cmp::Ordering::Less)
}

fn gt_with_null_rule(doc: &Document, field: &str, value: &Value) -> bool {
    let actual = actual_value(doc, field);
    if actual.is_null() {
        return false;
    }
    actual.total_cmp(value) == Some(std::cmp::Ordering::Greater)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(fields: &[(&str, Value)]) -> Document {
        fields.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn arithmetic_is_vectorizable_field_and_literal_chains() {
        let expr = Expr::BinaryOp(
            BinOp::Add,
            Box::new(Expr::Field("a".into())),
            Box::new(Expr::Literal(Value::Int(1))),
        );
        assert!(expr.is_vectorizable());
    }

    #[test]
    fn let_and_map_are_not_vectorizable() {
        let let_expr = Expr::Let {
            vars: vec![("x".into(), Expr::Literal(Value::Int(1)))],
            body: Box::new(Expr::Var("x".into())),
        };
        assert!(!let_expr.is_vectorizable());
    }

    #[test]
    fn eval_resolves_dotted_field_paths() {
        let d = doc(&[("a", Value::Int(5))]);
        let scope = EvalScope::new(&d);
        assert_eq!(eval(&Expr::Field("a".into()), &scope), Value::Int(5));
    }

    #[test]
    fn eval_let_binds_variables_for_body() {
        let d = Document::new();
        let scope = EvalScope::new(&d);
        let expr = Expr::Let {
            vars: vec![("total".into(), Expr::Literal(Value::Int(42)))],
            body: Box::new(Expr::Var("total".into())),
        };
        assert_eq!(eval(&expr, &scope), Value::Int(42));
    }

    #[test]
    fn eval_map_applies_body_per_element() {
        let d = doc(&[(
            "items",
            Value::Array(smallvec::smallvec![Value::Int(1), Value::Int(2), Value::Int(3)]),
        )]);
        let scope = EvalScope::new(&d);
        let expr = Expr::Map {
            input: Box::new(Expr::Field("items".into())),
            var: "x".into(),
            body: Box::new(Expr::BinaryOp(
                BinOp::Mul,
                Box::new(Expr::Var("x".into())),
                Box::new(Expr::Literal(Value::Int(2))),
            )),
        };
        assert_eq!(
            eval(&expr, &scope),
            Value::Array(smallvec::smallvec![Value::Double(2.0), Value::Double(4.0), Value::Double(6.0)])
        );
    }

    #[test]
    fn eval_reduce_folds_with_this_and_value() {
        let d = doc(&[(
            "items",
            Value::Array(smallvec::smallvec![Value::Int(1), Value::Int(2), Value::Int(3)]),
        )]);
        let scope = EvalScope::new(&d);
        let expr = Expr::Reduce {
            input: Box::new(Expr::Field("items".into())),
            initial: Box::new(Expr::Literal(Value::Int(0))),
            body: Box::new(Expr::BinaryOp(
                BinOp::Add,
                Box::new(Expr::Var("value".into())),
                Box::new(Expr::Var("this".into())),
            )),
        };
        assert_eq!(eval(&expr, &scope), Value::Double(6.0));
    }

    #[test]
    fn null_sorts_below_everything_for_lt_but_not_above_for_gt() {
        let d = doc(&[("a", Value::Null)]);
        assert!(Predicate::Lt("a".into(), Value::Int(1)).eval_document(&d));
        assert!(!Predicate::Gt("a".into(), Value::Int(-1)).eval_document(&d));
    }

    #[test]
    fn and_or_compose_leaves() {
        let d = doc(&[("a", Value::Int(5)), ("b", Value::Int(10))]);
        let pred = Predicate::And(vec![
            Predicate::Gt("a".into(), Value::Int(1)),
            Predicate::Lt("b".into(), Value::Int(20)),
        ]);
        assert!(pred.eval_document(&d));
        let pred_or = Predicate::Or(vec![
            Predicate::Eq("a".into(), Value::Int(0)),
            Predicate::Eq("b".into(), Value::Int(10)),
        ]);
        assert!(pred_or.eval_document(&d));
    }
}

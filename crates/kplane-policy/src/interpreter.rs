//! Step-bounded expression interpreter.
//!
//! The interpreter can only read the [`EvalContext`] it is handed; there
//! is no assignment, no I/O, and no access to anything outside the
//! candidate and workload snapshot. Identical inputs always yield
//! identical outputs.

use std::cell::Cell;
use std::collections::BTreeMap;

use kplane_core::config::LocationConfig;
use kplane_core::{Candidate, Labels, ResourceQuantity, WorkloadRequest};

use crate::ast::{BinaryOp, Expr, UnaryOp};
use crate::builtins;
use crate::error::{PolicyError, PolicyResult};
use crate::value::{PolicyOutcome, Value};

static NULL: Value = Value::Null;

/// Read-only view of one (workload, candidate) pair.
pub struct EvalContext<'a> {
    pub candidate: &'a Candidate,
    pub workload: &'a WorkloadRequest,
    pub location: &'a LocationConfig,
    cluster: Value,
    workload_value: Value,
}

impl<'a> EvalContext<'a> {
    pub fn new(candidate: &'a Candidate, workload: &'a WorkloadRequest, location: &'a LocationConfig) -> Self {
        Self {
            candidate,
            workload,
            location,
            cluster: cluster_value(candidate),
            workload_value: workload_value(workload),
        }
    }

    /// Resources this workload would reserve on the candidate.
    pub fn reservation(&self) -> ResourceQuantity {
        self.workload.reservation_estimate()
    }

    fn root(&self, name: &str) -> Option<&Value> {
        match name {
            "cluster" => Some(&self.cluster),
            "workload" => Some(&self.workload_value),
            _ => None,
        }
    }
}

/// Root identifiers an expression may reference.
pub const ROOTS: &[&str] = &["cluster", "workload"];

fn labels_value(labels: &Labels) -> Value {
    Value::Map(
        labels
            .iter()
            .map(|(k, v)| (k.clone(), Value::Str(v.clone())))
            .collect(),
    )
}

fn quantity_value(q: &ResourceQuantity) -> Value {
    let mut m = BTreeMap::new();
    m.insert("cpu".to_string(), Value::Number(q.cpu_millis as f64));
    m.insert("memory".to_string(), Value::Number(q.memory_bytes as f64));
    Value::Map(m)
}

fn cluster_value(c: &Candidate) -> Value {
    let free = ResourceQuantity::new(
        c.capacity.cpu_millis.saturating_sub(c.allocated.cpu_millis),
        c.capacity.memory_bytes.saturating_sub(c.allocated.memory_bytes),
    );
    let mut m = BTreeMap::new();
    m.insert("name".to_string(), Value::str(&c.cluster));
    m.insert("workspace".to_string(), Value::str(&c.workspace));
    m.insert("labels".to_string(), labels_value(&c.labels));
    m.insert("healthy".to_string(), Value::Bool(c.healthy));
    m.insert("utilization".to_string(), Value::Number(c.utilization()));
    m.insert("capacity".to_string(), quantity_value(&c.capacity));
    m.insert("allocated".to_string(), quantity_value(&c.allocated));
    m.insert("free".to_string(), quantity_value(&free));
    Value::Map(m)
}

fn workload_value(w: &WorkloadRequest) -> Value {
    let mut m = BTreeMap::new();
    m.insert("id".to_string(), Value::Str(w.id()));
    m.insert("name".to_string(), Value::str(&w.name));
    m.insert("namespace".to_string(), Value::str(&w.namespace));
    m.insert("workspace".to_string(), Value::str(&w.workspace));
    m.insert("class".to_string(), Value::str(&w.class));
    m.insert("labels".to_string(), labels_value(&w.labels));
    m.insert("replicas".to_string(), Value::Number(f64::from(w.replicas)));
    m.insert("clusters".to_string(), Value::Number(f64::from(w.clusters)));
    m.insert("cpu".to_string(), Value::Number(w.resources.cpu_millis as f64));
    m.insert("memory".to_string(), Value::Number(w.resources.memory_bytes as f64));
    Value::Map(m)
}

/// Evaluate `expr` to a raw value.
pub fn evaluate(expr: &Expr, ctx: &EvalContext<'_>, max_steps: u64) -> PolicyResult<Value> {
    Interpreter {
        ctx,
        steps: Cell::new(0),
        max_steps,
    }
    .eval(expr)
}

/// Evaluate `expr` and classify the result.
pub fn outcome(expr: &Expr, ctx: &EvalContext<'_>, max_steps: u64) -> PolicyOutcome {
    match evaluate(expr, ctx, max_steps).and_then(classify) {
        Ok(outcome) => outcome,
        Err(e) => PolicyOutcome::Error(e.to_string()),
    }
}

fn classify(value: Value) -> PolicyResult<PolicyOutcome> {
    match value {
        Value::Bool(b) => Ok(PolicyOutcome::Verdict(b)),
        Value::Number(n) if n.is_finite() => Ok(PolicyOutcome::Score(n.clamp(0.0, 100.0))),
        Value::Number(n) => Err(PolicyError::Eval(format!("non-finite score {n}"))),
        other => Err(PolicyError::ResultType(other.type_name().to_string())),
    }
}

struct Interpreter<'c, 'a> {
    ctx: &'c EvalContext<'a>,
    steps: Cell<u64>,
    max_steps: u64,
}

impl<'c, 'a> Interpreter<'c, 'a> {
    fn tick(&self) -> PolicyResult<()> {
        let n = self.steps.get() + 1;
        if n > self.max_steps {
            return Err(PolicyError::StepBudget {
                limit: self.max_steps,
            });
        }
        self.steps.set(n);
        Ok(())
    }

    /// Resolve an identifier/member path by reference, without cloning
    /// intermediate maps. `None` means `expr` is not a pure path.
    fn lookup(&self, expr: &Expr) -> PolicyResult<Option<&'c Value>> {
        match expr {
            Expr::Ident(name) => {
                self.tick()?;
                self.ctx
                    .root(name)
                    .map(Some)
                    .ok_or_else(|| PolicyError::UnknownIdentifier(name.clone()))
            }
            Expr::Member(inner, field) => {
                let Some(base) = self.lookup(inner)? else {
                    return Ok(None);
                };
                self.tick()?;
                member(base, field).map(Some)
            }
            _ => Ok(None),
        }
    }

    fn eval(&self, expr: &Expr) -> PolicyResult<Value> {
        if let Some(v) = self.lookup(expr)? {
            return Ok(v.clone());
        }
        self.tick()?;
        match expr {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Ident(name) => Err(PolicyError::UnknownIdentifier(name.clone())),
            Expr::List(items) => items
                .iter()
                .map(|e| self.eval(e))
                .collect::<PolicyResult<Vec<_>>>()
                .map(Value::List),
            Expr::Member(inner, field) => {
                let base = self.eval(inner)?;
                member(&base, field).cloned()
            }
            Expr::Index(base, index) => {
                let base = self.eval(base)?;
                let index = self.eval(index)?;
                index_value(&base, &index)
            }
            Expr::Unary(op, inner) => {
                let v = self.eval(inner)?;
                match (op, v) {
                    (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                    (UnaryOp::Neg, Value::Number(n)) => Ok(Value::Number(-n)),
                    (UnaryOp::Not, other) => Err(type_err("!", &other)),
                    (UnaryOp::Neg, other) => Err(type_err("unary -", &other)),
                }
            }
            Expr::Binary(BinaryOp::And, lhs, rhs) => {
                if !self.eval_bool(lhs, "&&")? {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(self.eval_bool(rhs, "&&")?))
            }
            Expr::Binary(BinaryOp::Or, lhs, rhs) => {
                if self.eval_bool(lhs, "||")? {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(self.eval_bool(rhs, "||")?))
            }
            Expr::Binary(op, lhs, rhs) => {
                let l = self.eval(lhs)?;
                let r = self.eval(rhs)?;
                binary(*op, l, r)
            }
            Expr::Ternary(cond, then, otherwise) => {
                if self.eval_bool(cond, "?:")? {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            Expr::Call(name, args) => {
                let values = args
                    .iter()
                    .map(|e| self.eval(e))
                    .collect::<PolicyResult<Vec<_>>>()?;
                builtins::call(name, &values, self.ctx)
            }
        }
    }

    fn eval_bool(&self, expr: &Expr, op: &str) -> PolicyResult<bool> {
        match self.eval(expr)? {
            Value::Bool(b) => Ok(b),
            other => Err(type_err(op, &other)),
        }
    }
}

fn type_err(op: &str, v: &Value) -> PolicyError {
    PolicyError::Type(format!("`{op}` cannot be applied to {}", v.type_name()))
}

/// Field access; missing fields and fields of `null` are `null`.
fn member<'v>(base: &'v Value, field: &str) -> PolicyResult<&'v Value> {
    match base {
        Value::Map(m) => Ok(m.get(field).unwrap_or(&NULL)),
        Value::Null => Ok(&NULL),
        other => Err(PolicyError::Type(format!(
            "cannot access field `{field}` on {}",
            other.type_name()
        ))),
    }
}

fn index_value(base: &Value, index: &Value) -> PolicyResult<Value> {
    match (base, index) {
        (Value::List(items), Value::Number(n)) => {
            if n.fract() != 0.0 || *n < 0.0 {
                return Err(PolicyError::Type(format!("invalid list index {n}")));
            }
            Ok(items.get(*n as usize).cloned().unwrap_or(Value::Null))
        }
        (Value::Map(m), Value::Str(k)) => Ok(m.get(k).cloned().unwrap_or(Value::Null)),
        (Value::Null, _) => Ok(Value::Null),
        (b, i) => Err(PolicyError::Type(format!(
            "cannot index {} with {}",
            b.type_name(),
            i.type_name()
        ))),
    }
}

fn binary(op: BinaryOp, l: Value, r: Value) -> PolicyResult<Value> {
    use BinaryOp::*;
    match op {
        Eq => Ok(Value::Bool(l == r)),
        Ne => Ok(Value::Bool(l != r)),
        Lt | Le | Gt | Ge => {
            let ord = match (&l, &r) {
                (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
                (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
                _ => None,
            }
            .ok_or_else(|| {
                PolicyError::Type(format!("cannot compare {} with {}", l.type_name(), r.type_name()))
            })?;
            Ok(Value::Bool(match op {
                Lt => ord.is_lt(),
                Le => ord.is_le(),
                Gt => ord.is_gt(),
                _ => ord.is_ge(),
            }))
        }
        In => match (&l, &r) {
            (_, Value::List(items)) => Ok(Value::Bool(items.contains(&l))),
            (Value::Str(k), Value::Map(m)) => Ok(Value::Bool(m.contains_key(k))),
            (Value::Str(needle), Value::Str(hay)) => Ok(Value::Bool(hay.contains(needle.as_str()))),
            (_, Value::Null) => Ok(Value::Bool(false)),
            _ => Err(PolicyError::Type(format!(
                "`in` cannot test {} against {}",
                l.type_name(),
                r.type_name()
            ))),
        },
        Add => match (l, r) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
            (Value::Str(a), Value::Str(b)) => Ok(Value::Str(a + &b)),
            (a, b) => Err(PolicyError::Type(format!(
                "cannot add {} and {}",
                a.type_name(),
                b.type_name()
            ))),
        },
        Sub | Mul | Div | Rem => {
            let (Value::Number(a), Value::Number(b)) = (&l, &r) else {
                return Err(PolicyError::Type(format!(
                    "arithmetic on {} and {}",
                    l.type_name(),
                    r.type_name()
                )));
            };
            if matches!(op, Div | Rem) && *b == 0.0 {
                return Err(PolicyError::Eval("division by zero".to_string()));
            }
            Ok(Value::Number(match op {
                Sub => a - b,
                Mul => a * b,
                Div => a / b,
                _ => a % b,
            }))
        }
        And | Or => unreachable!("short-circuit operators are evaluated by the interpreter"),
    }
}

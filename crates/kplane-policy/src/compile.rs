//! Policy compilation: size limit, parse, static checks.

use kplane_core::config::PolicyConfig;
use kplane_core::{LabelSelector, PlacementPolicy};

use crate::ast::Expr;
use crate::builtins;
use crate::error::{PolicyError, PolicyResult};
use crate::interpreter::{self, EvalContext, ROOTS};
use crate::value::{PolicyOutcome, Value};

/// Resource limits applied to every policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileLimits {
    pub max_expression_len: usize,
    pub max_depth: usize,
    pub max_eval_steps: u64,
}

impl From<&PolicyConfig> for CompileLimits {
    fn from(config: &PolicyConfig) -> Self {
        Self {
            max_expression_len: config.max_expression_len,
            max_depth: config.max_depth,
            max_eval_steps: config.max_eval_steps,
        }
    }
}

impl Default for CompileLimits {
    fn default() -> Self {
        Self::from(&PolicyConfig::default())
    }
}

/// A policy expression that parsed and passed static checks.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledPolicy {
    pub id: String,
    pub version: u64,
    pub expr: Expr,
    pub max_eval_steps: u64,
}

impl CompiledPolicy {
    /// Evaluate against one candidate. Never panics; failures come back
    /// as [`PolicyOutcome::Error`].
    pub fn evaluate(&self, ctx: &EvalContext<'_>) -> PolicyOutcome {
        interpreter::outcome(&self.expr, ctx, self.max_eval_steps)
    }
}

pub fn compile(policy: &PlacementPolicy, limits: CompileLimits) -> PolicyResult<CompiledPolicy> {
    let expr = compile_expression(&policy.expression, limits)?;
    Ok(CompiledPolicy {
        id: policy.id.clone(),
        version: policy.version,
        expr,
        max_eval_steps: limits.max_eval_steps,
    })
}

/// Compile bare expression text; used by tooling that has no policy record.
pub fn compile_expression(src: &str, limits: CompileLimits) -> PolicyResult<Expr> {
    if src.len() > limits.max_expression_len {
        return Err(PolicyError::TooLong {
            len: src.len(),
            limit: limits.max_expression_len,
        });
    }
    let expr = crate::parser::parse(src, limits.max_depth)?;
    check(&expr)?;
    Ok(expr)
}

/// Static checks: known roots, known functions with valid arity, and
/// literal selector arguments that parse.
fn check(expr: &Expr) -> PolicyResult<()> {
    let mut first_error = None;
    expr.walk(&mut |node| {
        if first_error.is_some() {
            return;
        }
        let result = match node {
            Expr::Ident(name) if !ROOTS.contains(&name.as_str()) => {
                Err(PolicyError::UnknownIdentifier(name.clone()))
            }
            Expr::Call(name, args) => builtins::check_call(name, args.len()).and_then(|()| {
                match (name.as_str(), args.first()) {
                    ("matches", Some(Expr::Literal(Value::Str(sel)))) => LabelSelector::parse(sel)
                        .map(|_| ())
                        .map_err(|e| PolicyError::Eval(format!("matches(): {e}"))),
                    _ => Ok(()),
                }
            }),
            _ => Ok(()),
        };
        if let Err(e) = result {
            first_error = Some(e);
        }
    });
    first_error.map_or(Ok(()), Err)
}

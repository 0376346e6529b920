//! Built-in functions callable from policy expressions.

use kplane_core::{LabelSelector, workspace_contains};

use crate::error::{PolicyError, PolicyResult};
use crate::interpreter::EvalContext;
use crate::value::Value;

/// Signature of a built-in: name and accepted argument count.
#[derive(Debug, Clone, Copy)]
pub struct Builtin {
    pub name: &'static str,
    pub min_args: usize,
    /// `None` means variadic.
    pub max_args: Option<usize>,
}

impl Builtin {
    const fn fixed(name: &'static str, n: usize) -> Self {
        Self {
            name,
            min_args: n,
            max_args: Some(n),
        }
    }

    pub fn accepts(&self, n: usize) -> bool {
        n >= self.min_args && self.max_args.is_none_or(|max| n <= max)
    }

    pub fn expected(&self) -> String {
        match self.max_args {
            Some(max) if max == self.min_args => max.to_string(),
            Some(max) => format!("{}..={max}", self.min_args),
            None => format!("at least {}", self.min_args),
        }
    }
}

pub const BUILTINS: &[Builtin] = &[
    Builtin::fixed("label", 1),
    Builtin {
        name: "has_label",
        min_args: 1,
        max_args: Some(2),
    },
    Builtin::fixed("workload_label", 1),
    Builtin {
        name: "in_namespace",
        min_args: 1,
        max_args: None,
    },
    Builtin::fixed("in_workspace", 1),
    Builtin::fixed("utilization", 0),
    Builtin::fixed("has_capacity", 1),
    Builtin::fixed("matches", 1),
    Builtin::fixed("distance", 1),
    Builtin {
        name: "min",
        min_args: 1,
        max_args: None,
    },
    Builtin {
        name: "max",
        min_args: 1,
        max_args: None,
    },
    Builtin::fixed("len", 1),
];

pub fn lookup(name: &str) -> Option<&'static Builtin> {
    BUILTINS.iter().find(|b| b.name == name)
}

/// Check a call's name and arity without evaluating it.
pub fn check_call(name: &str, argc: usize) -> PolicyResult<()> {
    let builtin = lookup(name).ok_or_else(|| PolicyError::UnknownFunction(name.to_string()))?;
    if builtin.accepts(argc) {
        Ok(())
    } else {
        Err(PolicyError::Arity {
            name: name.to_string(),
            expected: builtin.expected(),
            got: argc,
        })
    }
}

pub fn call(name: &str, args: &[Value], ctx: &EvalContext<'_>) -> PolicyResult<Value> {
    check_call(name, args.len())?;
    match name {
        "label" => {
            let key = string_arg(name, args, 0)?;
            Ok(ctx
                .candidate
                .labels
                .get(key)
                .map(Value::str)
                .unwrap_or(Value::Null))
        }
        "has_label" => {
            let key = string_arg(name, args, 0)?;
            let found = ctx.candidate.labels.get(key);
            if args.len() == 1 {
                return Ok(Value::Bool(found.is_some()));
            }
            let want = string_arg(name, args, 1)?;
            Ok(Value::Bool(found.is_some_and(|v| v == want)))
        }
        "workload_label" => {
            let key = string_arg(name, args, 0)?;
            Ok(ctx
                .workload
                .labels
                .get(key)
                .map(Value::str)
                .unwrap_or(Value::Null))
        }
        "in_namespace" => {
            for i in 0..args.len() {
                if string_arg(name, args, i)? == ctx.workload.namespace {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        "in_workspace" => {
            let prefix = string_arg(name, args, 0)?;
            Ok(Value::Bool(workspace_contains(prefix, &ctx.workload.workspace)))
        }
        "utilization" => Ok(Value::Number(ctx.candidate.utilization())),
        "has_capacity" => {
            let threshold = number_arg(name, args, 0)?;
            let projected = ctx.candidate.projected_utilization(&ctx.reservation());
            Ok(Value::Bool(projected <= threshold))
        }
        "matches" => {
            let selector = LabelSelector::parse(string_arg(name, args, 0)?)
                .map_err(|e| PolicyError::Eval(format!("matches(): {e}")))?;
            Ok(Value::Bool(selector.matches(&ctx.candidate.labels)))
        }
        "distance" => {
            let location = string_arg(name, args, 0)?;
            Ok(Value::Number(ctx.location.distance(&ctx.candidate.labels, location)))
        }
        "min" | "max" => extremum(name, args),
        "len" => match &args[0] {
            Value::Str(s) => Ok(Value::Number(s.chars().count() as f64)),
            Value::List(items) => Ok(Value::Number(items.len() as f64)),
            Value::Map(m) => Ok(Value::Number(m.len() as f64)),
            Value::Null => Ok(Value::Number(0.0)),
            other => Err(arg_type(name, 0, "string, list or map", other)),
        },
        _ => Err(PolicyError::UnknownFunction(name.to_string())),
    }
}

fn extremum(name: &str, args: &[Value]) -> PolicyResult<Value> {
    // A single list argument is treated as the operand set.
    let operands: &[Value] = match args {
        [Value::List(items)] => items,
        _ => args,
    };
    let mut best: Option<f64> = None;
    for (i, v) in operands.iter().enumerate() {
        let n = v
            .as_number()
            .ok_or_else(|| arg_type(name, i, "number", v))?;
        best = Some(match best {
            None => n,
            Some(b) if name == "min" => b.min(n),
            Some(b) => b.max(n),
        });
    }
    best.map(Value::Number)
        .ok_or_else(|| PolicyError::Eval(format!("{name}() of an empty list")))
}

fn string_arg<'v>(name: &str, args: &'v [Value], i: usize) -> PolicyResult<&'v str> {
    args[i].as_str().ok_or_else(|| arg_type(name, i, "string", &args[i]))
}

fn number_arg(name: &str, args: &[Value], i: usize) -> PolicyResult<f64> {
    args[i].as_number().ok_or_else(|| arg_type(name, i, "number", &args[i]))
}

fn arg_type(name: &str, i: usize, expected: &str, got: &Value) -> PolicyError {
    PolicyError::Type(format!(
        "{name}() argument {} must be a {expected}, got {}",
        i + 1,
        got.type_name()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kplane_core::config::LocationConfig;
    use kplane_core::{Candidate, ResourceQuantity, WorkloadRequest};

    fn with_ctx<T>(f: impl FnOnce(&EvalContext<'_>) -> T) -> T {
        let candidate = Candidate::new(
            "eu-1",
            ResourceQuantity::new(1000, 1000),
            ResourceQuantity::new(500, 200),
        )
        .with_label("env", "prod")
        .with_label("topology.kubernetes.io/zone", "eu-west-1a")
        .with_label("topology.kubernetes.io/region", "eu-west");
        let mut workload = WorkloadRequest::new("root:org:team", "payments", "ledger");
        workload.resources = ResourceQuantity::new(100, 100);
        workload.replicas = 2;
        workload.labels.insert("tier".into(), "db".into());
        let location = LocationConfig::default();
        let ctx = EvalContext::new(&candidate, &workload, &location);
        f(&ctx)
    }

    fn run(name: &str, args: &[Value]) -> PolicyResult<Value> {
        with_ctx(|ctx| call(name, args, ctx))
    }

    #[test]
    fn label_lookups() {
        assert_eq!(run("label", &["env".into()]).unwrap(), Value::str("prod"));
        assert_eq!(run("label", &["nope".into()]).unwrap(), Value::Null);
        assert_eq!(run("has_label", &["env".into()]).unwrap(), Value::Bool(true));
        assert_eq!(run("has_label", &["env".into(), "dev".into()]).unwrap(), Value::Bool(false));
        assert_eq!(run("workload_label", &["tier".into()]).unwrap(), Value::str("db"));
    }

    #[test]
    fn scope_helpers() {
        assert_eq!(
            run("in_namespace", &["default".into(), "payments".into()]).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(run("in_workspace", &["root:org".into()]).unwrap(), Value::Bool(true));
        assert_eq!(run("in_workspace", &["root:other".into()]).unwrap(), Value::Bool(false));
    }

    #[test]
    fn capacity_uses_projected_reservation() {
        // Allocated 50% cpu; reserving 2 x 100m lands at 70%.
        assert_eq!(run("utilization", &[]).unwrap(), Value::Number(0.5));
        assert_eq!(run("has_capacity", &[0.7.into()]).unwrap(), Value::Bool(true));
        assert_eq!(run("has_capacity", &[0.6.into()]).unwrap(), Value::Bool(false));
    }

    #[test]
    fn selector_and_distance() {
        assert_eq!(run("matches", &["env in (prod,staging)".into()]).unwrap(), Value::Bool(true));
        assert!(matches!(run("matches", &["env in (prod".into()]), Err(PolicyError::Eval(_))));
        assert_eq!(run("distance", &["eu-west-1a".into()]).unwrap(), Value::Number(0.0));
        assert_eq!(run("distance", &["mars".into()]).unwrap(), Value::Number(1.0));
    }

    #[test]
    fn numeric_helpers() {
        assert_eq!(run("min", &[3.0.into(), 1.0.into()]).unwrap(), Value::Number(1.0));
        assert_eq!(
            run("max", &[Value::List(vec![3.0.into(), 9.0.into()])]).unwrap(),
            Value::Number(9.0)
        );
        assert!(run("max", &[Value::List(vec![])]).is_err());
        assert_eq!(run("len", &["abc".into()]).unwrap(), Value::Number(3.0));
    }

    #[test]
    fn arity_and_types_are_checked() {
        assert!(matches!(run("label", &[]), Err(PolicyError::Arity { .. })));
        assert!(matches!(run("label", &[1.0.into()]), Err(PolicyError::Type(_))));
        assert!(matches!(run("nope", &[]), Err(PolicyError::UnknownFunction(_))));
    }
}

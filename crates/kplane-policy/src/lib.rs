//! kplane-policy: placement policy expressions.
//!
//! Operators attach small declarative expressions to placement policies.
//! This crate compiles them into an AST, evaluates them per candidate in a
//! sandbox that can only read the supplied context, and caches compiled
//! forms keyed by policy id and version.
//!
//! # Components
//!
//! - **`lexer`** / **`parser`**: source text to [`ast::Expr`]
//! - **`compile`**: limits and static checks, producing [`CompiledPolicy`]
//! - **`interpreter`** / **`builtins`**: step-bounded evaluation
//! - **`cache`**: bounded, versioned, TTL'd compiled-policy cache
//! - **`evaluator`**: per-candidate aggregation into verdicts and scores
//!
//! # Example expressions
//!
//! ```text
//! label("env") == "prod" && has_capacity(0.8)
//! matches("region in (eu-west, eu-central)") ? 100 : 20
//! !in_namespace("kube-system") || cluster.labels.tier == "system"
//! 100 * (1 - distance("us-east-1"))
//! ```

pub mod ast;
pub mod builtins;
pub mod cache;
pub mod compile;
pub mod error;
pub mod evaluator;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod value;

pub use cache::{CacheStats, PolicyCache};
pub use compile::{CompileLimits, CompiledPolicy, compile};
pub use error::{PolicyError, PolicyResult};
pub use evaluator::{
    CandidatePolicyResult, Contradiction, PolicyContribution, PolicyEvaluator, PreparedPolicies,
    Verdict,
};
pub use interpreter::EvalContext;
pub use value::{PolicyOutcome, Value};

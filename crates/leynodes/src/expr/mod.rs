//! Small sandboxed expression language used by `transform` and `filter` nodes.
//!
//! Expressions are pure: they read the bindings they are given and a fixed
//! table of builtins, and nothing else. Source length, nesting depth and the
//! number of evaluation steps are all bounded.
//!
//! ```text
//! item.price * 1.2
//! len(item.tags) > 0 && item.active
//! return (acc ?? 0) + item.value;
//! ```

mod eval;
mod lexer;
mod parser;

use leycore::{NodeContext, NodeError, NodeSpec, Value};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

pub const MAX_SOURCE_LEN: usize = 4096;
pub const MAX_DEPTH: usize = 64;
pub const MAX_STEPS: usize = 100_000;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExprError {
    #[error("Syntax error at {pos}: {message}")]
    Syntax { pos: usize, message: String },

    #[error("Expression longer than {0} characters")]
    TooLong(usize),

    #[error("Expression nested deeper than {0} levels")]
    TooDeep(usize),

    #[error("Evaluation exceeded {0} steps")]
    BudgetExceeded(usize),

    #[error("{0} is not defined")]
    UnknownIdentifier(String),

    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    #[error("{name}() expects {expected} argument(s), got {got}")]
    Arity {
        name: String,
        expected: &'static str,
        got: usize,
    },

    #[error("Type error: {0}")]
    Type(String),
}

impl From<ExprError> for NodeError {
    fn from(err: ExprError) -> Self {
        match err {
            ExprError::Type(msg) => NodeError::InvalidInputType {
                field: "expression".to_string(),
                expected: "compatible operands".to_string(),
                actual: msg,
            },
            other => NodeError::ExecutionFailed(other.to_string()),
        }
    }
}

/// A parsed expression, reusable across evaluations.
#[derive(Debug, Clone)]
pub struct Expression {
    source: String,
    ast: parser::Expr,
}

impl Expression {
    pub fn parse(source: &str) -> Result<Self, ExprError> {
        if source.len() > MAX_SOURCE_LEN {
            return Err(ExprError::TooLong(MAX_SOURCE_LEN));
        }
        let ast = parser::parse(source.trim())?;
        Ok(Self {
            source: source.to_string(),
            ast,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn eval(&self, scope: &Scope) -> Result<Value, ExprError> {
        eval::Evaluator::new(scope).eval(&self.ast)
    }
}

/// Parse the expression stored in a node property.
pub fn compile_property(node: &NodeSpec, key: &str) -> Result<Expression, NodeError> {
    let source = node
        .property_str(key)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| NodeError::Configuration(format!("property '{}' is required", key)))?;
    Expression::parse(source)
        .map_err(|e| NodeError::Configuration(format!("invalid {}: {}", key, e)))
}

/// Names visible to an expression.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    bindings: HashMap<String, Value>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scope with `variables` and `context` bound for one node call
    pub fn for_node(ctx: &NodeContext) -> Self {
        let variables: BTreeMap<String, Value> = ctx
            .variables
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let mut context = BTreeMap::new();
        context.insert("executionId".to_string(), Value::from(ctx.execution_id.to_string()));
        context.insert("workflowId".to_string(), Value::from(ctx.workflow_id.as_str()));
        context.insert("nodeId".to_string(), Value::from(ctx.node_id.as_str()));

        Self::new()
            .with("variables", variables)
            .with("context", context)
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.bind(name, value);
        self
    }

    pub fn bind(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.bindings.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }
}

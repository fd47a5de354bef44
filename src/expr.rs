//! jq expression engine
//!
//! Thin wrapper around jaq that compiles expressions once and caches the
//! compiled filter keyed by `(source, sorted variable names)`. Evaluation is
//! pure; the cache tolerates concurrent readers with safe insertion.
//!
//! Merge rules and transformers run under a single-result contract: callers
//! use [`ExprEngine::eval_one`] / [`ExprEngine::eval_one_with_vars`], which
//! fail with `WrongCardinality` unless exactly one value is produced.

use std::sync::Arc;

use dashmap::DashMap;
use jaq_interpret::{Ctx, Filter, FilterT, ParseCtx, RcIter, Val};
use serde_json::Value;

use crate::error::{CrawlError, Result};

/// Variable name for the incoming merge value
pub const VAR_RES: &str = "res";
/// Variable name for the template-context snapshot
pub const VAR_CTX: &str = "ctx";
/// Variable name for the aggregated forEach sequence
pub const VAR_NEW: &str = "new";

/// Compile cache keyed by (source, sorted variable names)
#[derive(Default, Debug)]
pub struct ExprEngine {
    cache: DashMap<(String, Vec<String>), Arc<Filter>>,
}

impl ExprEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate an expression against an input, collecting all produced values
    pub fn eval(&self, src: &str, input: &Value) -> Result<Vec<Value>> {
        self.eval_with_vars(src, input, &[])
    }

    /// Evaluate with bound variables (`$res`, `$ctx`, `$new`, …)
    pub fn eval_with_vars(
        &self,
        src: &str,
        input: &Value,
        vars: &[(&str, &Value)],
    ) -> Result<Vec<Value>> {
        // Canonical order: variables are positional in the compiled filter,
        // so both the cache key and the value list are sorted by name.
        let mut bound: Vec<(&str, &Value)> = vars.to_vec();
        bound.sort_by_key(|(name, _)| *name);

        let names: Vec<String> = bound.iter().map(|(name, _)| name.to_string()).collect();
        let filter = self.compiled(src, names)?;

        let inputs = RcIter::new(core::iter::empty());
        let ctx = Ctx::new(
            bound.iter().map(|(_, v)| Val::from((*v).clone())),
            &inputs,
        );

        let mut out = Vec::new();
        for res in filter.run((ctx, Val::from(input.clone()))) {
            match res {
                Ok(v) => out.push(Value::from(v)),
                Err(e) => {
                    return Err(CrawlError::EvaluationError {
                        expression: src.to_string(),
                        details: e.to_string(),
                    })
                }
            }
        }
        Ok(out)
    }

    /// Evaluate, asserting exactly one result
    pub fn eval_one(&self, src: &str, input: &Value) -> Result<Value> {
        self.eval_one_with_vars(src, input, &[])
    }

    /// Evaluate with variables, asserting exactly one result
    pub fn eval_one_with_vars(
        &self,
        src: &str,
        input: &Value,
        vars: &[(&str, &Value)],
    ) -> Result<Value> {
        let mut values = self.eval_with_vars(src, input, vars)?;
        if values.len() != 1 {
            return Err(CrawlError::WrongCardinality {
                expression: src.to_string(),
                count: values.len(),
            });
        }
        Ok(values.pop().expect("length checked above"))
    }

    fn compiled(&self, src: &str, var_names: Vec<String>) -> Result<Arc<Filter>> {
        let key = (src.to_string(), var_names.clone());
        if let Some(cached) = self.cache.get(&key) {
            return Ok(Arc::clone(&cached));
        }

        let mut defs = ParseCtx::new(var_names);
        defs.insert_natives(jaq_core::core());
        defs.insert_defs(jaq_std::std());

        let (main, parse_errs) = jaq_parse::parse(src, jaq_parse::main());
        if !parse_errs.is_empty() {
            let details = parse_errs
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(CrawlError::InvalidExpression {
                expression: src.to_string(),
                details,
            });
        }
        let main = main.ok_or_else(|| CrawlError::InvalidExpression {
            expression: src.to_string(),
            details: "empty expression".to_string(),
        })?;

        let filter = defs.compile(main);
        if !defs.errs.is_empty() {
            return Err(CrawlError::InvalidExpression {
                expression: src.to_string(),
                details: format!("{} compile error(s)", defs.errs.len()),
            });
        }

        let filter = Arc::new(filter);
        self.cache.insert(key, Arc::clone(&filter));
        Ok(filter)
    }
}

/// jq truthiness: everything except null and false
pub fn is_truthy(value: &Value) -> bool {
    !matches!(value, Value::Null | Value::Bool(false))
}

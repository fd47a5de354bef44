//! Manifest types parsed from the YAML crawl definition
//!
//! The manifest is a tree of step descriptors:
//! - `request`: HTTP call with optional pagination, transform and merge
//! - `forEach`: iteration over extracted items or literal values
//!
//! Steps are deserialized into a loose struct (all fields optional) and
//! checked by `validate::validate_manifest` before execution, so that a
//! single pass can report every problem with its dotted location.

mod auth;
mod pagination;

pub use auth::AuthConfig;
pub use pagination::{Compare, Pagination, Param, ParamLocation, ParamType, StopCondition};

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use crate::error::Result;

/// Top-level crawl manifest
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Initial root context data; must be a sequence or a mapping
    pub root_context: Option<Value>,
    /// Global authenticator applied to every request without an override
    #[serde(default)]
    pub auth: Option<AuthConfig>,
    /// Headers applied to every request (lowest priority)
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Emit top-level records incrementally; requires a sequence root
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Manifest {
    /// Parse a manifest from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load and parse a manifest file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml(&raw)
    }
}

/// A single step: `request` or `forEach`, plus its merge directive
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Step {
    /// "request" or "forEach"
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    /// forEach: jq expression selecting items from the current context
    pub path: String,
    /// Name of the child context this step introduces
    #[serde(rename = "as")]
    pub as_key: String,
    /// forEach: literal items, each exposed as `{value: v}`
    pub values: Option<Vec<Value>>,
    pub steps: Vec<Step>,
    pub request: Option<RequestConfig>,
    /// jq expression applied to each decoded page (single result required)
    pub result_transformer: Option<String>,
    pub merge_on: Option<String>,
    pub merge_with_parent_on: Option<String>,
    pub merge_with_context: Option<MergeWithContextRule>,
    pub noop_merge: bool,
    /// forEach: run iterations on a bounded worker pool
    pub parallel: bool,
    pub max_concurrency: Option<usize>,
    pub rate_limit: Option<RateLimitConfig>,
}

/// Default worker pool size for `parallel: true`
pub const DEFAULT_MAX_CONCURRENCY: usize = 10;

/// Which merge rule applies to a step's result, in precedence order
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MergeDirective<'a> {
    /// Discard the result
    Noop,
    /// jq rule against the current context
    On(&'a str),
    /// jq rule against the current context's parent
    WithParent(&'a str),
    /// jq rule against an arbitrary in-scope context
    WithContext(&'a MergeWithContextRule),
    /// Shallow merge (append / overlay / replace)
    Default,
}

impl Step {
    pub fn is_request(&self) -> bool {
        self.kind.eq_ignore_ascii_case("request")
    }

    pub fn is_for_each(&self) -> bool {
        self.kind.eq_ignore_ascii_case("foreach")
    }

    /// Resolve the step's merge directive; exactly one applies
    pub fn merge_directive(&self) -> MergeDirective<'_> {
        if self.noop_merge {
            MergeDirective::Noop
        } else if let Some(rule) = self.merge_on.as_deref() {
            MergeDirective::On(rule)
        } else if let Some(rule) = self.merge_with_parent_on.as_deref() {
            MergeDirective::WithParent(rule)
        } else if let Some(rule) = &self.merge_with_context {
            MergeDirective::WithContext(rule)
        } else {
            MergeDirective::Default
        }
    }

    /// Worker pool size for parallel iteration
    pub fn concurrency(&self) -> usize {
        self.max_concurrency
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_MAX_CONCURRENCY)
    }
}

/// Cross-scope merge: apply `rule` to the context called `name`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MergeWithContextRule {
    pub name: String,
    pub rule: String,
}

/// Token-bucket settings for a forEach step
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitConfig {
    pub requests_per_second: f64,
    #[serde(default = "default_burst")]
    pub burst: usize,
}

fn default_burst() -> usize {
    1
}

/// HTTP request description, shared by request steps and login sub-requests
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestConfig {
    /// URL template; placeholders are `{{ .context.field }}`
    pub url: String,
    /// GET or POST
    pub method: String,
    pub headers: HashMap<String, String>,
    pub content_type: Option<String>,
    /// Structured body; serialized per content type
    pub body: Option<serde_json::Map<String, Value>>,
    pub pagination: Option<Pagination>,
    /// Per-request authenticator override
    pub auth: Option<AuthConfig>,
}

impl RequestConfig {
    /// Content type from the dedicated field or the headers, case-insensitive
    pub fn content_type(&self) -> Option<&str> {
        if let Some(ct) = self.content_type.as_deref() {
            return Some(ct);
        }
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
            .map(|(_, v)| v.as_str())
    }
}

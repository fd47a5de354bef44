//! URL template resolver
//!
//! Renders `{{ .context.field }}` placeholders against the template-context
//! snapshot built from the context store. Templates are tokenized once and
//! the token stream is cached, so repeated pages and iterations only pay for
//! the lookup.
//!
//! Scalars render bare (strings unquoted, numbers/bools via Display); arrays
//! and objects render as compact JSON. A placeholder whose path is missing
//! from the context is an error — URLs with silently-empty segments are
//! worse to debug than a failed render.

use std::ops::Range;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

use crate::error::{CrawlError, Result};

/// A parsed template fragment
#[derive(Debug, Clone)]
enum Token {
    /// Literal text (byte range in the original template)
    Literal(Range<usize>),
    /// Placeholder path: `{{ .a.b.c }}` → ["a", "b", "c"]
    Path(Vec<String>),
}

/// Template resolver with a tokenization cache
#[derive(Default)]
pub struct TemplateResolver {
    cache: DashMap<String, Arc<Vec<Token>>>,
}

impl TemplateResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render a template against the context snapshot
    pub fn render(&self, template: &str, context: &Value) -> Result<String> {
        let tokens = self.tokenize(template)?;

        let mut out = String::with_capacity(template.len());
        for token in tokens.iter() {
            match token {
                Token::Literal(range) => out.push_str(&template[range.clone()]),
                Token::Path(path) => {
                    let mut current = context;
                    for segment in path {
                        current = current.get(segment).ok_or_else(|| {
                            CrawlError::TemplateError {
                                template: template.to_string(),
                                reason: format!(
                                    "'{}' not found in template context",
                                    path.join(".")
                                ),
                            }
                        })?;
                    }
                    render_value(current, &mut out);
                }
            }
        }
        Ok(out)
    }

    fn tokenize(&self, template: &str) -> Result<Arc<Vec<Token>>> {
        if let Some(cached) = self.cache.get(template) {
            return Ok(Arc::clone(&cached));
        }

        let mut tokens = Vec::new();
        let mut rest = 0usize;
        let bytes = template.as_bytes();
        let mut i = 0usize;

        while i + 1 < bytes.len() {
            if &bytes[i..i + 2] == b"{{" {
                let close = template[i + 2..].find("}}").ok_or_else(|| {
                    CrawlError::TemplateError {
                        template: template.to_string(),
                        reason: "unterminated '{{' placeholder".to_string(),
                    }
                })?;
                let inner = template[i + 2..i + 2 + close].trim();
                let path = parse_path(inner).ok_or_else(|| CrawlError::TemplateError {
                    template: template.to_string(),
                    reason: format!("malformed placeholder '{{{{{inner}}}}}'"),
                })?;

                if rest < i {
                    tokens.push(Token::Literal(rest..i));
                }
                tokens.push(Token::Path(path));
                i += 2 + close + 2;
                rest = i;
            } else {
                i += 1;
            }
        }
        if rest < template.len() {
            tokens.push(Token::Literal(rest..template.len()));
        }

        let tokens = Arc::new(tokens);
        self.cache
            .insert(template.to_string(), Arc::clone(&tokens));
        Ok(tokens)
    }
}

/// Parse `.a.b.c` into segments; anything else is malformed
fn parse_path(inner: &str) -> Option<Vec<String>> {
    let path = inner.strip_prefix('.')?;
    if path.is_empty() {
        return None;
    }
    let segments: Vec<String> = path.split('.').map(str::to_string).collect();
    if segments.iter().any(|s| s.is_empty()) {
        return None;
    }
    Some(segments)
}

fn render_value(value: &Value, out: &mut String) {
    match value {
        Value::String(s) => out.push_str(s),
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        composite => out.push_str(&composite.to_string()),
    }
}

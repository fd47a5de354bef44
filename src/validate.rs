//! Pre-execution manifest validation
//!
//! Walks the manifest and collects every problem into a list of diagnostics
//! with dotted locations (`steps[0].request.url`), so a single run surfaces
//! all mistakes at once. Execution refuses to start while diagnostics exist.

use std::fmt;

use serde_json::Value;

use crate::manifest::{
    AuthConfig, Manifest, Pagination, Param, ParamType, RequestConfig, Step, StopCondition,
};

/// A single validation finding with its manifest location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub message: String,
    /// Dotted path into the manifest, e.g. "steps[0].request.url"
    pub location: String,
}

impl Diagnostic {
    pub fn new(message: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            location: location.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.location.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.location, self.message)
        }
    }
}

/// Validate a manifest, returning every diagnostic found
pub fn validate_manifest(manifest: &Manifest) -> Vec<Diagnostic> {
    let mut diags = Vec::new();

    match &manifest.root_context {
        None => diags.push(Diagnostic::new("rootContext is required", "rootContext")),
        Some(Value::Array(_)) | Some(Value::Object(_)) => {}
        Some(_) => diags.push(Diagnostic::new("rootContext must be [] or {}", "rootContext")),
    }

    if manifest.stream && !matches!(manifest.root_context, Some(Value::Array(_))) {
        diags.push(Diagnostic::new(
            "stream=true requires rootContext to be an array",
            "stream",
        ));
    }

    if let Some(auth) = &manifest.auth {
        validate_auth(auth, "auth", &mut diags);
    }

    if manifest.steps.is_empty() {
        diags.push(Diagnostic::new("steps must be a non-empty array", "steps"));
    } else {
        for (i, step) in manifest.steps.iter().enumerate() {
            validate_step(step, &format!("steps[{i}]"), &mut diags);
        }
    }

    diags
}

fn validate_step(step: &Step, location: &str, diags: &mut Vec<Diagnostic>) {
    if !step.is_request() && !step.is_for_each() {
        diags.push(Diagnostic::new(
            format!(
                "step.type must be 'request' or 'forEach', got '{}'",
                step.kind
            ),
            format!("{location}.type"),
        ));
        return;
    }

    if step.is_for_each() {
        let has_path = !step.path.is_empty();
        let has_values = step.values.is_some();
        if !has_path && !has_values {
            diags.push(Diagnostic::new(
                "forEach step requires path or values",
                format!("{location}.path"),
            ));
        }
        if has_path && has_values {
            diags.push(Diagnostic::new(
                "forEach step cannot set both path and values",
                format!("{location}.values"),
            ));
        }
        if step.as_key.is_empty() {
            diags.push(Diagnostic::new(
                "forEach step requires as",
                format!("{location}.as"),
            ));
        }
        if let Some(rl) = &step.rate_limit {
            if rl.requests_per_second <= 0.0 {
                diags.push(Diagnostic::new(
                    "rateLimit.requestsPerSecond must be positive",
                    format!("{location}.rateLimit.requestsPerSecond"),
                ));
            }
        }
        if let Some(n) = step.max_concurrency {
            if n == 0 {
                diags.push(Diagnostic::new(
                    "maxConcurrency must be a positive integer",
                    format!("{location}.maxConcurrency"),
                ));
            }
        }
    } else {
        match &step.request {
            None => {
                diags.push(Diagnostic::new(
                    "request step requires a request field",
                    format!("{location}.request"),
                ));
                return;
            }
            Some(req) => validate_request(req, &format!("{location}.request"), diags),
        }
    }

    for (i, nested) in step.steps.iter().enumerate() {
        validate_step(nested, &format!("{location}.steps[{i}]"), diags);
    }

    if let Some(rule) = &step.merge_with_context {
        if rule.name.is_empty() {
            diags.push(Diagnostic::new(
                "mergeWithContext.name is required",
                format!("{location}.mergeWithContext.name"),
            ));
        }
        if rule.rule.is_empty() {
            diags.push(Diagnostic::new(
                "mergeWithContext.rule is required",
                format!("{location}.mergeWithContext.rule"),
            ));
        }
    }

    // Exactly one merge directive may be set
    let directives = [
        step.merge_on.is_some(),
        step.merge_with_parent_on.is_some(),
        step.merge_with_context.is_some(),
    ];
    let set = directives.iter().filter(|b| **b).count();
    if step.noop_merge && set > 0 {
        diags.push(Diagnostic::new(
            "noopMerge cannot be used with mergeOn, mergeWithParentOn, or mergeWithContext",
            format!("{location}.noopMerge"),
        ));
    } else if set > 1 {
        diags.push(Diagnostic::new(
            "only one of mergeOn, mergeWithParentOn, mergeWithContext may be set",
            format!("{location}.mergeOn"),
        ));
    }
}

fn validate_request(req: &RequestConfig, location: &str, diags: &mut Vec<Diagnostic>) {
    if req.url.is_empty() {
        diags.push(Diagnostic::new(
            "request.url is required",
            format!("{location}.url"),
        ));
    }
    if req.method.is_empty() {
        diags.push(Diagnostic::new(
            "request.method is required",
            format!("{location}.method"),
        ));
    } else {
        let method = req.method.to_ascii_uppercase();
        if method != "GET" && method != "POST" {
            diags.push(Diagnostic::new(
                "request.method must be GET or POST",
                format!("{location}.method"),
            ));
        }
        if method == "POST" && req.body.is_some() && req.content_type().is_none() {
            diags.push(Diagnostic::new(
                "POST requests with a body must specify contentType or a Content-Type header",
                format!("{location}.contentType"),
            ));
        }
    }

    if let Some(auth) = &req.auth {
        validate_auth(auth, &format!("{location}.auth"), diags);
    }

    if let Some(pagination) = &req.pagination {
        if !pagination.is_empty() {
            validate_pagination(pagination, &format!("{location}.pagination"), diags);
        }
    }
}

fn validate_pagination(p: &Pagination, location: &str, diags: &mut Vec<Diagnostic>) {
    if p.params.is_empty() && p.next_page_url_selector.is_none() {
        diags.push(Diagnostic::new(
            "pagination must have either params or nextPageUrlSelector",
            location,
        ));
    }

    if let Some(selector) = &p.next_page_url_selector {
        validate_selector(
            selector,
            &format!("{location}.nextPageUrlSelector"),
            diags,
        );
    }

    for (i, param) in p.params.iter().enumerate() {
        validate_param(param, &format!("{location}.params[{i}]"), diags);
    }

    if p.stop_on.is_empty() && p.next_page_url_selector.is_none() {
        diags.push(Diagnostic::new(
            "pagination.stopOn must be a non-empty array if not using 'nextPageUrlSelector'",
            format!("{location}.stopOn"),
        ));
    }
    for (i, stop) in p.stop_on.iter().enumerate() {
        validate_stop(stop, &format!("{location}.stopOn[{i}]"), diags);
    }
}

fn validate_param(param: &Param, location: &str, diags: &mut Vec<Diagnostic>) {
    if param.name.is_empty() {
        diags.push(Diagnostic::new(
            "pagination param name is required",
            format!("{location}.name"),
        ));
    }
    if param.kind == ParamType::Datetime && param.format.is_none() {
        diags.push(Diagnostic::new(
            "pagination param format is required when type is datetime",
            format!("{location}.format"),
        ));
    }
    if param.kind == ParamType::Dynamic {
        match &param.source {
            None => diags.push(Diagnostic::new(
                "pagination param source is required when type is dynamic",
                format!("{location}.source"),
            )),
            Some(source) => validate_selector(source, &format!("{location}.source"), diags),
        }
    }
}

fn validate_stop(stop: &StopCondition, location: &str, diags: &mut Vec<Diagnostic>) {
    if !stop.is_response_body() && !stop.is_request_param() && !stop.is_page_num() {
        diags.push(Diagnostic::new(
            "pagination stop type must be one of [responseBody, requestParam, pageNum]",
            format!("{location}.type"),
        ));
        return;
    }

    if stop.is_response_body() && stop.expression.as_deref().unwrap_or("").is_empty() {
        diags.push(Diagnostic::new(
            "pagination stop expression is required when type is responseBody",
            format!("{location}.expression"),
        ));
    }

    if stop.is_request_param() {
        if stop.param.as_deref().unwrap_or("").is_empty() {
            diags.push(Diagnostic::new(
                "pagination stop param is required when type is requestParam",
                format!("{location}.param"),
            ));
        }
        if stop.compare.is_none() {
            diags.push(Diagnostic::new(
                "pagination stop compare is required when type is requestParam",
                format!("{location}.compare"),
            ));
        }
        if stop.value.is_none() {
            diags.push(Diagnostic::new(
                "pagination stop value is required when type is requestParam",
                format!("{location}.value"),
            ));
        }
    }

    if stop.is_page_num() && !matches!(&stop.value, Some(Value::Number(n)) if n.is_u64() || n.is_i64())
    {
        diags.push(Diagnostic::new(
            "pagination stop value is required and must be an integer when type is pageNum",
            format!("{location}.value"),
        ));
    }
}

fn validate_selector(selector: &str, location: &str, diags: &mut Vec<Diagnostic>) {
    let valid = selector
        .strip_prefix("body:")
        .or_else(|| selector.strip_prefix("header:"))
        .map(|rest| !rest.is_empty())
        .unwrap_or(false);
    if !valid {
        diags.push(Diagnostic::new(
            "selector must be 'body:<jq>' or 'header:<name>'",
            location,
        ));
    }
}

pub fn validate_auth(auth: &AuthConfig, location: &str, diags: &mut Vec<Diagnostic>) {
    let kind = auth.kind.to_ascii_lowercase();
    match kind.as_str() {
        "basic" => {
            if auth.username.is_empty() {
                diags.push(Diagnostic::new(
                    "auth.username is required when type is basic",
                    format!("{location}.username"),
                ));
            }
            if auth.password.is_empty() {
                diags.push(Diagnostic::new(
                    "auth.password is required when type is basic",
                    format!("{location}.password"),
                ));
            }
        }
        "bearer" => {
            if auth.token.is_empty() {
                diags.push(Diagnostic::new(
                    "auth.token is required when type is bearer",
                    format!("{location}.token"),
                ));
            }
        }
        "oauth" => validate_oauth(auth, location, diags),
        "cookie" | "jwt" | "custom" => validate_login_auth(auth, &kind, location, diags),
        _ => diags.push(Diagnostic::new(
            format!(
                "auth.type must be one of [basic, bearer, oauth, cookie, jwt, custom], got '{}'",
                auth.kind
            ),
            format!("{location}.type"),
        )),
    }
}

fn validate_oauth(auth: &AuthConfig, location: &str, diags: &mut Vec<Diagnostic>) {
    match auth.method.as_str() {
        "" => diags.push(Diagnostic::new(
            "auth.method is required when type is oauth",
            format!("{location}.method"),
        )),
        "password" => {
            if auth.username.is_empty() {
                diags.push(Diagnostic::new(
                    "auth.username is required when method is password",
                    format!("{location}.username"),
                ));
            }
            if auth.password.is_empty() {
                diags.push(Diagnostic::new(
                    "auth.password is required when method is password",
                    format!("{location}.password"),
                ));
            }
        }
        "client_credentials" => {
            if auth.client_id.is_empty() {
                diags.push(Diagnostic::new(
                    "auth.clientId is required when method is client_credentials",
                    format!("{location}.clientId"),
                ));
            }
            if auth.client_secret.is_empty() {
                diags.push(Diagnostic::new(
                    "auth.clientSecret is required when method is client_credentials",
                    format!("{location}.clientSecret"),
                ));
            }
        }
        _ => diags.push(Diagnostic::new(
            "auth.method must be password or client_credentials",
            format!("{location}.method"),
        )),
    }
    if auth.token_url.is_empty() {
        diags.push(Diagnostic::new(
            "auth.tokenUrl is required when type is oauth",
            format!("{location}.tokenUrl"),
        ));
    }
}

fn validate_login_auth(auth: &AuthConfig, kind: &str, location: &str, diags: &mut Vec<Diagnostic>) {
    match &auth.login_request {
        None => diags.push(Diagnostic::new(
            format!("auth.loginRequest is required when type is {kind}"),
            format!("{location}.loginRequest"),
        )),
        Some(login) => {
            if login.url.is_empty() {
                diags.push(Diagnostic::new(
                    "auth.loginRequest.url is required",
                    format!("{location}.loginRequest.url"),
                ));
            }
            if login.method.is_empty() {
                diags.push(Diagnostic::new(
                    "auth.loginRequest.method is required",
                    format!("{location}.loginRequest.method"),
                ));
            }
        }
    }

    if auth.extract_selector.is_empty() {
        diags.push(Diagnostic::new(
            format!("auth.extractSelector is required when type is {kind}"),
            format!("{location}.extractSelector"),
        ));
    }

    if kind == "custom" {
        if !matches!(auth.extract_from.as_str(), "cookie" | "header" | "body") {
            diags.push(Diagnostic::new(
                "auth.extractFrom must be one of [cookie, header, body]",
                format!("{location}.extractFrom"),
            ));
        }
        match auth.inject_into.as_str() {
            "cookie" | "bearer" => {}
            "header" | "query" => {
                if auth.inject_key.is_empty() {
                    diags.push(Diagnostic::new(
                        "auth.injectKey is required when injecting into a header or query param",
                        format!("{location}.injectKey"),
                    ));
                }
            }
            _ => diags.push(Diagnostic::new(
                "auth.injectInto must be one of [cookie, header, bearer, query]",
                format!("{location}.injectInto"),
            )),
        }
    }

    if kind == "jwt" && !matches!(auth.extract_from.as_str(), "" | "header" | "body") {
        diags.push(Diagnostic::new(
            "auth.extractFrom must be header or body when type is jwt",
            format!("{location}.extractFrom"),
        ));
    }
}

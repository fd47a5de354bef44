//! Crawler error types with stable error codes
//!
//! Error code ranges:
//! - TRAWL-00x: manifest / validation errors
//! - TRAWL-01x: expression errors
//! - TRAWL-02x: pagination errors
//! - TRAWL-03x: request errors
//! - TRAWL-04x: authentication errors
//! - TRAWL-05x: merge errors
//! - TRAWL-06x: runtime errors
//! - TRAWL-09x: IO / parse passthrough
//!
//! A non-2xx response to a main request is *not* an error: the body is
//! decoded as-is and stop conditions may inspect it. Login sub-requests are
//! the exception; see `LoginFailed`.

use thiserror::Error;

use crate::validate::Diagnostic;

pub type Result<T> = std::result::Result<T, CrawlError>;

/// Format validation diagnostics for the top-level error display
fn format_diagnostics(diags: &[Diagnostic]) -> String {
    if diags.is_empty() {
        return "no diagnostics".to_string();
    }
    if diags.len() == 1 {
        return diags[0].to_string();
    }
    format!(
        "{} problems: {}",
        diags.len(),
        diags
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    )
}

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

/// All error variants are part of the public API.
#[derive(Error, Debug)]
pub enum CrawlError {
    // ═══════════════════════════════════════════
    // MANIFEST / VALIDATION (00x)
    // ═══════════════════════════════════════════
    #[error("[TRAWL-001] manifest validation failed: {}", format_diagnostics(.diagnostics))]
    ValidationFailed { diagnostics: Vec<Diagnostic> },

    // ═══════════════════════════════════════════
    // EXPRESSIONS (01x)
    // ═══════════════════════════════════════════
    #[error("[TRAWL-010] invalid jq expression '{expression}': {details}")]
    InvalidExpression { expression: String, details: String },

    #[error("[TRAWL-011] jq evaluation of '{expression}' failed: {details}")]
    EvaluationError { expression: String, details: String },

    #[error("[TRAWL-012] expression '{expression}' must produce exactly one value, got {count}")]
    WrongCardinality { expression: String, count: usize },

    #[error("[TRAWL-013] type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    // ═══════════════════════════════════════════
    // PAGINATION (02x)
    // ═══════════════════════════════════════════
    #[error("[TRAWL-020] invalid pagination config: {reason}")]
    InvalidPaginationConfig { reason: String },

    #[error("[TRAWL-021] dynamic extraction from '{source_selector}' failed: {reason}")]
    DynamicExtractionFailed { source_selector: String, reason: String },

    #[error("[TRAWL-022] cannot parse '{value}': {reason}")]
    ParseError { value: String, reason: String },

    // ═══════════════════════════════════════════
    // REQUESTS (03x)
    // ═══════════════════════════════════════════
    #[error("[TRAWL-030] template '{template}' failed to render: {reason}")]
    TemplateError { template: String, reason: String },

    #[error("[TRAWL-031] invalid URL '{url}': {details}")]
    InvalidUrl { url: String, details: String },

    #[error("[TRAWL-032] unsupported content type '{content_type}'")]
    UnsupportedContentType { content_type: String },

    #[error("[TRAWL-033] failed to encode request body: {details}")]
    BodyEncodingFailed { details: String },

    #[error("[TRAWL-034] failed to build request: {details}")]
    RequestBuildFailed { details: String },

    #[error("[TRAWL-035] HTTP request to '{url}' failed: {details}")]
    HttpFailed { url: String, details: String },

    #[error("[TRAWL-036] failed to decode response from '{url}' as JSON: {details}")]
    ResponseDecodeFailed { url: String, details: String },

    // ═══════════════════════════════════════════
    // AUTHENTICATION (04x)
    // ═══════════════════════════════════════════
    #[error("[TRAWL-040] login failed{}: {reason}", .status.map(|s| format!(" with status {s}")).unwrap_or_default())]
    LoginFailed { status: Option<u16>, reason: String },

    #[error("[TRAWL-041] credential extraction via '{selector}' failed: {reason}")]
    ExtractionFailed { selector: String, reason: String },

    #[error("[TRAWL-042] invalid auth config: {reason}")]
    InvalidAuthConfig { reason: String },

    #[error("[TRAWL-043] unsupported credential injection target '{target}'")]
    UnsupportedInjection { target: String },

    // ═══════════════════════════════════════════
    // MERGES (05x)
    // ═══════════════════════════════════════════
    #[error("[TRAWL-050] merge target context '{name}' is not in scope")]
    MergeTargetMissing { name: String },

    #[error("[TRAWL-051] merge failed: {reason}")]
    MergeFailed { reason: String },

    // ═══════════════════════════════════════════
    // RUNTIME (06x)
    // ═══════════════════════════════════════════
    #[error("[TRAWL-060] crawl cancelled")]
    Cancelled,

    // ═══════════════════════════════════════════
    // IO / PARSE PASSTHROUGH (09x)
    // ═══════════════════════════════════════════
    #[error("[TRAWL-090] IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("[TRAWL-091] YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl CrawlError {
    /// Get the stable error code (e.g. "TRAWL-001")
    pub fn code(&self) -> &'static str {
        match self {
            Self::ValidationFailed { .. } => "TRAWL-001",
            Self::InvalidExpression { .. } => "TRAWL-010",
            Self::EvaluationError { .. } => "TRAWL-011",
            Self::WrongCardinality { .. } => "TRAWL-012",
            Self::TypeMismatch { .. } => "TRAWL-013",
            Self::InvalidPaginationConfig { .. } => "TRAWL-020",
            Self::DynamicExtractionFailed { .. } => "TRAWL-021",
            Self::ParseError { .. } => "TRAWL-022",
            Self::TemplateError { .. } => "TRAWL-030",
            Self::InvalidUrl { .. } => "TRAWL-031",
            Self::UnsupportedContentType { .. } => "TRAWL-032",
            Self::BodyEncodingFailed { .. } => "TRAWL-033",
            Self::RequestBuildFailed { .. } => "TRAWL-034",
            Self::HttpFailed { .. } => "TRAWL-035",
            Self::ResponseDecodeFailed { .. } => "TRAWL-036",
            Self::LoginFailed { .. } => "TRAWL-040",
            Self::ExtractionFailed { .. } => "TRAWL-041",
            Self::InvalidAuthConfig { .. } => "TRAWL-042",
            Self::UnsupportedInjection { .. } => "TRAWL-043",
            Self::MergeTargetMissing { .. } => "TRAWL-050",
            Self::MergeFailed { .. } => "TRAWL-051",
            Self::Cancelled => "TRAWL-060",
            Self::Io(_) => "TRAWL-090",
            Self::Yaml(_) => "TRAWL-091",
        }
    }
}

impl FixSuggestion for CrawlError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            CrawlError::ValidationFailed { .. } => {
                Some("Fix the reported manifest locations; run `trawl validate` for the full list")
            }
            CrawlError::InvalidExpression { .. } => {
                Some("Check jq syntax; expressions run against the step's data context")
            }
            CrawlError::EvaluationError { .. } => {
                Some("Check the expression against the actual response shape")
            }
            CrawlError::WrongCardinality { .. } => {
                Some("Wrap multi-value expressions in [..] to collect them into one array")
            }
            CrawlError::TypeMismatch { .. } => {
                Some("Adjust the selector so it yields the expected type")
            }
            CrawlError::InvalidPaginationConfig { .. } => {
                Some("pagination needs either nextPageUrlSelector or params + stopOn")
            }
            CrawlError::DynamicExtractionFailed { .. } => {
                Some("Selectors are 'body:<jq>' or 'header:<name>'")
            }
            CrawlError::ParseError { .. } => {
                Some("Check the datetime format / numeric literal in the pagination config")
            }
            CrawlError::TemplateError { .. } => {
                Some("Placeholders are {{ .context.field }}; the context must be in scope")
            }
            CrawlError::InvalidUrl { .. } => {
                Some("Check the rendered URL is absolute and well-formed")
            }
            CrawlError::UnsupportedContentType { .. } => {
                Some("Use application/json or application/x-www-form-urlencoded")
            }
            CrawlError::LoginFailed { .. } => {
                Some("Check the login endpoint, credentials and content type")
            }
            CrawlError::ExtractionFailed { .. } => {
                Some("Check extractFrom/extractSelector against the login response")
            }
            CrawlError::InvalidAuthConfig { .. } => {
                Some("auth.type must be basic, bearer, oauth, cookie, jwt or custom")
            }
            CrawlError::UnsupportedInjection { .. } => {
                Some("injectInto must be cookie, header, bearer or query")
            }
            CrawlError::MergeTargetMissing { .. } => {
                Some("mergeWithContext can only target a context that is still in scope")
            }
            CrawlError::Yaml(_) => Some("Check YAML syntax: indentation and quoting"),
            CrawlError::Io(_) => Some("Check the manifest path exists and is readable"),
            _ => None,
        }
    }
}

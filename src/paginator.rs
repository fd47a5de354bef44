//! Per-request pagination state machine
//!
//! The interpreter drives the loop:
//!
//! ```text
//! let mut paginator = Paginator::new(pagination)?;
//! loop {
//!     let page = paginator.next_from_state();      // params for this page
//!     // ... issue the request, decode the body ...
//!     if paginator.advance(&engine, &body, &headers)? { break; }
//! }
//! ```
//!
//! The first page is always emitted; stop conditions run only after a
//! response. `advance` counts the issued page, derives the next page's
//! parameters (or next URL), then evaluates the stop conditions in order —
//! `requestParam` conditions compare against the freshly derived value, so
//! `offset gte 2` halts before `offset=2` is ever issued.

use std::collections::HashMap;

use chrono::{Duration as ChronoDuration, NaiveDateTime, Utc};
use reqwest::header::HeaderMap;
use serde_json::{Map, Number, Value};

use crate::error::{CrawlError, Result};
use crate::expr::{is_truthy, ExprEngine};
use crate::manifest::{Compare, Pagination, Param, ParamLocation, ParamType, StopCondition};

/// Parameters for one page of a paginated request
#[derive(Debug, Clone, Default)]
pub struct PageParams {
    pub query: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    pub body: Map<String, Value>,
    /// Absolute URL to use instead of the template (nextPageUrlSelector)
    pub next_page_url: Option<String>,
}

/// Selector of the form "body:<jq>" or "header:<name>"
#[derive(Debug, Clone)]
enum Selector {
    Body(String),
    Header(String),
}

impl Selector {
    fn parse(raw: &str) -> Result<Self> {
        if let Some(expr) = raw.strip_prefix("body:") {
            Ok(Selector::Body(expr.to_string()))
        } else if let Some(name) = raw.strip_prefix("header:") {
            Ok(Selector::Header(name.to_string()))
        } else {
            Err(CrawlError::InvalidPaginationConfig {
                reason: format!("selector '{raw}' must be 'body:<jq>' or 'header:<name>'"),
            })
        }
    }
}

/// Current value of one tracked parameter
#[derive(Debug, Clone)]
enum ParamValue {
    Int(i64),
    Float(f64),
    Datetime(NaiveDateTime),
    Dynamic(String),
}

#[derive(Debug, Clone)]
enum Increment {
    Int(i64),
    Float(f64),
    Duration(ChronoDuration),
    None,
}

#[derive(Debug)]
struct TrackedParam {
    cfg: Param,
    value: ParamValue,
    increment: Increment,
    source: Option<Selector>,
}

/// State machine deriving each successive page's parameters
#[derive(Debug)]
pub struct Paginator {
    /// Pages issued so far; 0 before the first request
    page_num: u64,
    params: Vec<TrackedParam>,
    next_url_selector: Option<Selector>,
    next_url: Option<String>,
    stop_on: Vec<StopCondition>,
    /// True when the request carries no pagination at all
    single_page: bool,
}

impl Paginator {
    pub fn new(pagination: Option<&Pagination>) -> Result<Self> {
        let Some(pagination) = pagination.filter(|p| !p.is_empty()) else {
            return Ok(Self {
                page_num: 0,
                params: Vec::new(),
                next_url_selector: None,
                next_url: None,
                stop_on: Vec::new(),
                single_page: true,
            });
        };

        let next_url_selector = pagination
            .next_page_url_selector
            .as_deref()
            .map(Selector::parse)
            .transpose()?;

        let params = pagination
            .params
            .iter()
            .map(TrackedParam::new)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            page_num: 0,
            params,
            next_url_selector,
            next_url: None,
            stop_on: pagination.stop_on.clone(),
            single_page: false,
        })
    }

    /// Number of pages issued so far
    pub fn page_num(&self) -> u64 {
        self.page_num
    }

    /// Parameters for the page about to be issued
    pub fn next_from_state(&self) -> PageParams {
        let mut page = PageParams {
            next_page_url: self.next_url.clone(),
            ..PageParams::default()
        };

        for param in &self.params {
            let name = param.cfg.name.clone();
            match param.cfg.location {
                ParamLocation::Query => {
                    page.query.insert(name, param.render());
                }
                ParamLocation::Header => {
                    page.headers.insert(name, param.render());
                }
                ParamLocation::Body => {
                    page.body.insert(name, param.body_value());
                }
            }
        }
        page
    }

    /// Account for the received response and decide whether to stop.
    ///
    /// Returns `true` when the loop must halt after the current page.
    pub fn advance(
        &mut self,
        engine: &ExprEngine,
        body: &Value,
        headers: &HeaderMap,
    ) -> Result<bool> {
        self.page_num += 1;

        if self.single_page {
            return Ok(true);
        }

        if let Some(selector) = &self.next_url_selector {
            let url = extract_selector(engine, selector, body, headers)?;
            match url {
                Some(url) if !url.is_empty() => self.next_url = Some(url),
                // No next link: the chain is exhausted
                _ => return Ok(true),
            }
        } else {
            for param in &mut self.params {
                param.step(engine, body, headers)?;
            }
        }

        for stop in &self.stop_on {
            if self.stop_matches(engine, stop, body)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn stop_matches(
        &self,
        engine: &ExprEngine,
        stop: &StopCondition,
        body: &Value,
    ) -> Result<bool> {
        if stop.is_response_body() {
            let expr = stop.expression.as_deref().unwrap_or_default();
            let values = engine.eval(expr, body)?;
            return Ok(values.iter().any(is_truthy));
        }

        if stop.is_request_param() {
            let name = stop.param.as_deref().unwrap_or_default();
            let param = self
                .params
                .iter()
                .find(|p| p.cfg.name == name)
                .ok_or_else(|| CrawlError::InvalidPaginationConfig {
                    reason: format!("stop condition references unknown param '{name}'"),
                })?;
            let compare = stop.compare.unwrap_or(Compare::Eq);
            let literal = stop.value.clone().unwrap_or(Value::Null);
            return param.compare(compare, &literal);
        }

        if stop.is_page_num() {
            let limit = stop
                .value
                .as_ref()
                .and_then(Value::as_u64)
                .unwrap_or_default();
            return Ok(self.page_num >= limit);
        }

        Ok(false)
    }
}

impl TrackedParam {
    fn new(cfg: &Param) -> Result<Self> {
        let value = initial_value(cfg)?;
        let increment = parse_increment(cfg)?;
        let source = match cfg.kind {
            ParamType::Dynamic => Some(Selector::parse(cfg.source.as_deref().ok_or_else(
                || CrawlError::InvalidPaginationConfig {
                    reason: format!("dynamic param '{}' has no source", cfg.name),
                },
            )?)?),
            _ => None,
        };
        Ok(Self {
            cfg: cfg.clone(),
            value,
            increment,
            source,
        })
    }

    /// Render the current value for query/header placement
    fn render(&self) -> String {
        match &self.value {
            ParamValue::Int(i) => i.to_string(),
            ParamValue::Float(f) => f.to_string(),
            ParamValue::Datetime(dt) => {
                let format = self.cfg.format.as_deref().unwrap_or("%Y-%m-%dT%H:%M:%S");
                dt.format(format).to_string()
            }
            ParamValue::Dynamic(s) => s.clone(),
        }
    }

    /// Current value for body placement, keeping numbers numeric
    fn body_value(&self) -> Value {
        match &self.value {
            ParamValue::Int(i) => Value::Number((*i).into()),
            ParamValue::Float(f) => Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(f.to_string())),
            _ => Value::String(self.render()),
        }
    }

    /// Derive the next page's value
    fn step(&mut self, engine: &ExprEngine, body: &Value, headers: &HeaderMap) -> Result<()> {
        match (&mut self.value, &self.increment) {
            (ParamValue::Int(i), Increment::Int(step)) => *i += step,
            (ParamValue::Float(f), Increment::Float(step)) => *f += step,
            (ParamValue::Datetime(dt), Increment::Duration(step)) => *dt = *dt + *step,
            (ParamValue::Dynamic(current), _) => {
                let source = self.source.as_ref().expect("dynamic param has a source");
                *current = extract_selector(engine, source, body, headers)?.unwrap_or_default();
            }
            _ => {}
        }
        Ok(())
    }

    fn compare(&self, compare: Compare, literal: &Value) -> Result<bool> {
        match &self.value {
            ParamValue::Int(i) => Ok(compare.matches_f64(*i as f64, literal_as_f64(literal)?)),
            ParamValue::Float(f) => Ok(compare.matches_f64(*f, literal_as_f64(literal)?)),
            ParamValue::Datetime(dt) => {
                let format = self.cfg.format.as_deref().unwrap_or("%Y-%m-%dT%H:%M:%S");
                let raw = literal_as_string(literal);
                let other = NaiveDateTime::parse_from_str(&raw, format).map_err(|e| {
                    CrawlError::ParseError {
                        value: raw,
                        reason: format!("expected datetime in format '{format}': {e}"),
                    }
                })?;
                Ok(match compare {
                    Compare::Lt => *dt < other,
                    Compare::Lte => *dt <= other,
                    Compare::Eq => *dt == other,
                    Compare::Gt => *dt > other,
                    Compare::Gte => *dt >= other,
                })
            }
            ParamValue::Dynamic(s) => {
                // eq is plain value equality; ordering needs both sides numeric
                if compare == Compare::Eq {
                    return Ok(*s == literal_as_string(literal));
                }
                let left = s.parse::<f64>().map_err(|_| CrawlError::ParseError {
                    value: s.clone(),
                    reason: "dynamic param is not numeric but compare requires ordering".into(),
                })?;
                Ok(compare.matches_f64(left, literal_as_f64(literal)?))
            }
        }
    }
}

fn initial_value(cfg: &Param) -> Result<ParamValue> {
    match cfg.kind {
        ParamType::Int => {
            let start = match &cfg.default {
                None => 0,
                Some(v) => v.as_i64().ok_or_else(|| invalid_default(cfg, "an integer"))?,
            };
            Ok(ParamValue::Int(start))
        }
        ParamType::Float => {
            let start = match &cfg.default {
                None => 0.0,
                Some(v) => v.as_f64().ok_or_else(|| invalid_default(cfg, "a number"))?,
            };
            Ok(ParamValue::Float(start))
        }
        ParamType::Datetime => {
            let format = cfg
                .format
                .as_deref()
                .ok_or_else(|| CrawlError::InvalidPaginationConfig {
                    reason: format!("datetime param '{}' has no format", cfg.name),
                })?;
            let start = match &cfg.default {
                None => Utc::now().naive_utc(),
                Some(v) => {
                    let raw = literal_as_string(v);
                    NaiveDateTime::parse_from_str(&raw, format).map_err(|e| {
                        CrawlError::ParseError {
                            value: raw,
                            reason: format!("default does not match format '{format}': {e}"),
                        }
                    })?
                }
            };
            Ok(ParamValue::Datetime(start))
        }
        ParamType::Dynamic => {
            let start = match &cfg.default {
                None => String::new(),
                Some(v) => literal_as_string(v),
            };
            Ok(ParamValue::Dynamic(start))
        }
    }
}

fn parse_increment(cfg: &Param) -> Result<Increment> {
    match cfg.kind {
        ParamType::Int => {
            let step = match &cfg.increment {
                None => 1,
                Some(v) => v.as_i64().ok_or_else(|| invalid_increment(cfg, "an integer"))?,
            };
            Ok(Increment::Int(step))
        }
        ParamType::Float => {
            let step = match &cfg.increment {
                None => 1.0,
                Some(v) => v.as_f64().ok_or_else(|| invalid_increment(cfg, "a number"))?,
            };
            Ok(Increment::Float(step))
        }
        ParamType::Datetime => {
            let raw = cfg
                .increment
                .as_ref()
                .map(literal_as_string)
                .ok_or_else(|| CrawlError::InvalidPaginationConfig {
                    reason: format!("datetime param '{}' has no increment", cfg.name),
                })?;
            let step = parse_duration(&raw).ok_or_else(|| CrawlError::ParseError {
                value: raw,
                reason: "expected a duration like '30s', '5m', '1h'".into(),
            })?;
            Ok(Increment::Duration(step))
        }
        ParamType::Dynamic => Ok(Increment::None),
    }
}

fn invalid_default(cfg: &Param, expected: &str) -> CrawlError {
    CrawlError::InvalidPaginationConfig {
        reason: format!("param '{}' default must be {expected}", cfg.name),
    }
}

fn invalid_increment(cfg: &Param, expected: &str) -> CrawlError {
    CrawlError::InvalidPaginationConfig {
        reason: format!("param '{}' increment must be {expected}", cfg.name),
    }
}

/// Render a stop-condition or default literal as a string
fn literal_as_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Coerce a stop-condition literal to f64 for ordering comparisons
fn literal_as_f64(value: &Value) -> Result<f64> {
    match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| CrawlError::ParseError {
            value: n.to_string(),
            reason: "number is out of f64 range".into(),
        }),
        Value::String(s) => s.parse::<f64>().map_err(|_| CrawlError::ParseError {
            value: s.clone(),
            reason: "expected a numeric literal".into(),
        }),
        other => Err(CrawlError::ParseError {
            value: other.to_string(),
            reason: "expected a numeric literal".into(),
        }),
    }
}

/// Parse "500ms", "30s", "5m", "1h" or bare seconds into a duration
fn parse_duration(raw: &str) -> Option<ChronoDuration> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Some(ms) = s.strip_suffix("ms") {
        return ms.parse::<i64>().ok().map(ChronoDuration::milliseconds);
    }
    if let Some(secs) = s.strip_suffix('s') {
        return secs.parse::<i64>().ok().map(ChronoDuration::seconds);
    }
    if let Some(mins) = s.strip_suffix('m') {
        return mins.parse::<i64>().ok().map(ChronoDuration::minutes);
    }
    if let Some(hours) = s.strip_suffix('h') {
        return hours.parse::<i64>().ok().map(ChronoDuration::hours);
    }
    s.parse::<i64>().ok().map(ChronoDuration::seconds)
}

/// Extract a value through a selector; `None` for a missing/null source
fn extract_selector(
    engine: &ExprEngine,
    selector: &Selector,
    body: &Value,
    headers: &HeaderMap,
) -> Result<Option<String>> {
    match selector {
        Selector::Body(expr) => {
            let mut values =
                engine
                    .eval(expr, body)
                    .map_err(|e| CrawlError::DynamicExtractionFailed {
                        source_selector: format!("body:{expr}"),
                        reason: e.to_string(),
                    })?;
            if values.len() != 1 {
                return Err(CrawlError::DynamicExtractionFailed {
                    source_selector: format!("body:{expr}"),
                    reason: format!("expected a single value, got {}", values.len()),
                });
            }
            match values.pop().expect("length checked above") {
                Value::Null => Ok(None),
                Value::String(s) => Ok(Some(s)),
                Value::Number(n) => Ok(Some(n.to_string())),
                Value::Bool(b) => Ok(Some(b.to_string())),
                other => Err(CrawlError::DynamicExtractionFailed {
                    source_selector: format!("body:{expr}"),
                    reason: format!("expected a scalar, got {other}"),
                }),
            }
        }
        Selector::Header(name) => Ok(headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderName, HeaderValue};
    use serde_json::json;

    fn engine() -> ExprEngine {
        ExprEngine::new()
    }

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(
                k.parse::<HeaderName>().unwrap(),
                HeaderValue::from_str(v).unwrap(),
            );
        }
        map
    }

    fn pagination(yaml: &str) -> Pagination {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn no_pagination_issues_exactly_one_page() {
        let mut paginator = Paginator::new(None).unwrap();
        let page = paginator.next_from_state();
        assert!(page.query.is_empty());
        assert!(page.next_page_url.is_none());

        let stop = paginator
            .advance(&engine(), &json!({}), &HeaderMap::new())
            .unwrap();
        assert!(stop);
        assert_eq!(paginator.page_num(), 1);
    }

    #[test]
    fn integer_increment_with_request_param_stop() {
        // offset=0 and offset=1 are issued; offset=2 never is
        let p = pagination(
            r#"
params:
  - name: offset
    location: query
    type: int
    default: 0
    increment: 1
stopOn:
  - type: requestParam
    param: offset
    compare: gte
    value: 2
"#,
        );
        let mut paginator = Paginator::new(Some(&p)).unwrap();
        let engine = engine();
        let hdrs = HeaderMap::new();

        assert_eq!(paginator.next_from_state().query["offset"], "0");
        assert!(!paginator.advance(&engine, &json!({}), &hdrs).unwrap());

        assert_eq!(paginator.next_from_state().query["offset"], "1");
        assert!(paginator.advance(&engine, &json!({}), &hdrs).unwrap());
        assert_eq!(paginator.page_num(), 2);
    }

    #[test]
    fn dynamic_params_from_body_and_header() {
        // Tokens flow from the body and a header into the next page
        let p = pagination(
            r#"
params:
  - name: token_body
    location: query
    type: dynamic
    source: "body:.nextToken"
  - name: token_header
    location: header
    type: dynamic
    source: "header:X-Next-Token"
stopOn:
  - type: responseBody
    expression: ".nextToken == null"
"#,
        );
        let mut paginator = Paginator::new(Some(&p)).unwrap();
        let engine = engine();

        // Page 1: initial values are empty
        let page = paginator.next_from_state();
        assert_eq!(page.query["token_body"], "");
        assert_eq!(page.headers["token_header"], "");

        // Response 1 carries tokens
        let stop = paginator
            .advance(
                &engine,
                &json!({"nextToken": "abc123"}),
                &headers(&[("X-Next-Token", "xyz789")]),
            )
            .unwrap();
        assert!(!stop);
        let page = paginator.next_from_state();
        assert_eq!(page.query["token_body"], "abc123");
        assert_eq!(page.headers["token_header"], "xyz789");

        // Response 2
        let stop = paginator
            .advance(
                &engine,
                &json!({"nextToken": "def456"}),
                &headers(&[("X-Next-Token", "uvw000")]),
            )
            .unwrap();
        assert!(!stop);
        let page = paginator.next_from_state();
        assert_eq!(page.query["token_body"], "def456");
        assert_eq!(page.headers["token_header"], "uvw000");

        // Response 3: null token halts after this page
        let stop = paginator
            .advance(&engine, &json!({"nextToken": null}), &HeaderMap::new())
            .unwrap();
        assert!(stop);
        assert_eq!(paginator.page_num(), 3);
    }

    #[test]
    fn page_num_zero_halts_after_first_page() {
        let p = pagination(
            r#"
params:
  - name: offset
    location: query
    type: int
stopOn:
  - type: pageNum
    value: 0
"#,
        );
        let mut paginator = Paginator::new(Some(&p)).unwrap();
        assert!(paginator
            .advance(&engine(), &json!({}), &HeaderMap::new())
            .unwrap());
    }

    #[test]
    fn page_num_n_halts_after_n_pages() {
        let p = pagination(
            r#"
params:
  - name: offset
    location: query
    type: int
stopOn:
  - type: pageNum
    value: 3
"#,
        );
        let mut paginator = Paginator::new(Some(&p)).unwrap();
        let engine = engine();
        let hdrs = HeaderMap::new();
        assert!(!paginator.advance(&engine, &json!({}), &hdrs).unwrap());
        assert!(!paginator.advance(&engine, &json!({}), &hdrs).unwrap());
        assert!(paginator.advance(&engine, &json!({}), &hdrs).unwrap());
        assert_eq!(paginator.page_num(), 3);
    }

    #[test]
    fn next_page_url_from_body() {
        let p = pagination("nextPageUrlSelector: \"body:.links.next\"\n");
        let mut paginator = Paginator::new(Some(&p)).unwrap();
        let engine = engine();
        let hdrs = HeaderMap::new();

        assert!(paginator.next_from_state().next_page_url.is_none());

        let stop = paginator
            .advance(
                &engine,
                &json!({"links": {"next": "http://list.com/page2"}}),
                &hdrs,
            )
            .unwrap();
        assert!(!stop);
        assert_eq!(
            paginator.next_from_state().next_page_url.as_deref(),
            Some("http://list.com/page2")
        );

        // Missing next link exhausts the chain
        let stop = paginator
            .advance(&engine, &json!({"links": {}}), &hdrs)
            .unwrap();
        assert!(stop);
    }

    #[test]
    fn next_page_url_from_header() {
        let p = pagination("nextPageUrlSelector: \"header:Link-Next\"\n");
        let mut paginator = Paginator::new(Some(&p)).unwrap();
        let stop = paginator
            .advance(
                &engine(),
                &json!({}),
                &headers(&[("Link-Next", "http://list.com/page2")]),
            )
            .unwrap();
        assert!(!stop);
        assert_eq!(
            paginator.next_from_state().next_page_url.as_deref(),
            Some("http://list.com/page2")
        );
    }

    #[test]
    fn body_params_stay_numeric() {
        let p = pagination(
            r#"
params:
  - name: offset
    location: body
    type: int
    default: 5
  - name: cursor
    location: body
    type: dynamic
    source: "body:.cursor"
stopOn:
  - type: pageNum
    value: 5
"#,
        );
        let paginator = Paginator::new(Some(&p)).unwrap();
        let page = paginator.next_from_state();
        assert_eq!(page.body["offset"], json!(5));
        assert_eq!(page.body["cursor"], json!(""));
    }

    #[test]
    fn datetime_param_increments_by_duration() {
        let p = pagination(
            r#"
params:
  - name: since
    location: query
    type: datetime
    format: "%Y-%m-%d %H:%M"
    default: "2024-05-01 00:00"
    increment: "1h"
stopOn:
  - type: pageNum
    value: 2
"#,
        );
        let mut paginator = Paginator::new(Some(&p)).unwrap();
        let engine = engine();
        let hdrs = HeaderMap::new();

        assert_eq!(paginator.next_from_state().query["since"], "2024-05-01 00:00");
        assert!(!paginator.advance(&engine, &json!({}), &hdrs).unwrap());
        assert_eq!(paginator.next_from_state().query["since"], "2024-05-01 01:00");
    }

    #[test]
    fn datetime_default_must_match_format() {
        let p = pagination(
            r#"
params:
  - name: since
    location: query
    type: datetime
    format: "%Y-%m-%d"
    default: "01/05/2024"
    increment: "1h"
stopOn:
  - type: pageNum
    value: 1
"#,
        );
        let err = Paginator::new(Some(&p)).unwrap_err();
        assert!(matches!(err, CrawlError::ParseError { .. }));
    }

    #[test]
    fn dynamic_param_ordering_comparison_needs_numbers() {
        let p = pagination(
            r#"
params:
  - name: cursor
    location: query
    type: dynamic
    source: "body:.cursor"
stopOn:
  - type: requestParam
    param: cursor
    compare: gte
    value: 10
"#,
        );
        let mut paginator = Paginator::new(Some(&p)).unwrap();
        let engine = engine();
        let hdrs = HeaderMap::new();

        // Numeric cursor compares numerically
        assert!(!paginator
            .advance(&engine, &json!({"cursor": "7"}), &hdrs)
            .unwrap());
        assert!(paginator
            .advance(&engine, &json!({"cursor": "12"}), &hdrs)
            .unwrap());

        // Non-numeric cursor with an ordering operator is a parse error
        let mut paginator = Paginator::new(Some(&p)).unwrap();
        let err = paginator
            .advance(&engine, &json!({"cursor": "abc"}), &hdrs)
            .unwrap_err();
        assert!(matches!(err, CrawlError::ParseError { .. }));
    }

    #[test]
    fn dynamic_param_eq_uses_value_equality() {
        let p = pagination(
            r#"
params:
  - name: cursor
    location: query
    type: dynamic
    source: "body:.cursor"
stopOn:
  - type: requestParam
    param: cursor
    compare: eq
    value: "END"
"#,
        );
        let mut paginator = Paginator::new(Some(&p)).unwrap();
        let engine = engine();
        let hdrs = HeaderMap::new();
        assert!(!paginator
            .advance(&engine, &json!({"cursor": "more"}), &hdrs)
            .unwrap());
        assert!(paginator
            .advance(&engine, &json!({"cursor": "END"}), &hdrs)
            .unwrap());
    }

    #[test]
    fn multi_value_body_source_is_rejected() {
        let p = pagination(
            r#"
params:
  - name: token
    location: query
    type: dynamic
    source: "body:.items[].id"
stopOn:
  - type: pageNum
    value: 5
"#,
        );
        let mut paginator = Paginator::new(Some(&p)).unwrap();
        let err = paginator
            .advance(
                &engine(),
                &json!({"items": [{"id": 1}, {"id": 2}]}),
                &HeaderMap::new(),
            )
            .unwrap_err();
        assert!(matches!(err, CrawlError::DynamicExtractionFailed { .. }));
    }

    #[test]
    fn duration_grammar() {
        assert_eq!(parse_duration("30s"), Some(ChronoDuration::seconds(30)));
        assert_eq!(parse_duration("5m"), Some(ChronoDuration::minutes(5)));
        assert_eq!(parse_duration("1h"), Some(ChronoDuration::hours(1)));
        assert_eq!(
            parse_duration("500ms"),
            Some(ChronoDuration::milliseconds(500))
        );
        assert_eq!(parse_duration("45"), Some(ChronoDuration::seconds(45)));
        assert_eq!(parse_duration("abc"), None);
    }
}

//! Pagination configuration
//!
//! A paginated request either follows a next-page URL (`nextPageUrlSelector`)
//! or tracks a set of typed parameters, each placed into the query string,
//! the headers or the body of the next page. Stop conditions decide when the
//! page loop halts; the first page is always issued.

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Pagination {
    /// "body:<jq>" or "header:<name>" pointing at the next page's URL
    pub next_page_url_selector: Option<String>,
    pub params: Vec<Param>,
    pub stop_on: Vec<StopCondition>,
}

impl Pagination {
    /// True when neither a selector nor params are configured
    pub fn is_empty(&self) -> bool {
        self.next_page_url_selector.is_none() && self.params.is_empty() && self.stop_on.is_empty()
    }
}

/// A tracked pagination parameter
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Param {
    pub name: String,
    pub location: ParamLocation,
    #[serde(rename = "type")]
    pub kind: ParamType,
    /// chrono format string, required for datetime params
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub default: Option<Value>,
    /// int/float: numeric step; datetime: duration like "30s", "5m", "1h"
    #[serde(default)]
    pub increment: Option<Value>,
    /// dynamic params: "body:<jq>" or "header:<name>"
    #[serde(default)]
    pub source: Option<String>,
}

/// Where a parameter is placed on the outgoing request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamLocation {
    Query,
    Header,
    Body,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    Int,
    Float,
    Datetime,
    Dynamic,
}

/// Halts the page loop; any matching condition stops after the current page
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StopCondition {
    /// "responseBody", "requestParam" or "pageNum"
    #[serde(rename = "type")]
    pub kind: String,
    /// responseBody: jq over the decoded body; truthy means stop
    pub expression: Option<String>,
    /// requestParam: name of the tracked parameter
    pub param: Option<String>,
    pub compare: Option<Compare>,
    /// requestParam: literal to compare against; pageNum: page count
    pub value: Option<Value>,
}

impl StopCondition {
    pub fn is_response_body(&self) -> bool {
        self.kind.eq_ignore_ascii_case("responsebody")
    }

    pub fn is_request_param(&self) -> bool {
        self.kind.eq_ignore_ascii_case("requestparam")
    }

    pub fn is_page_num(&self) -> bool {
        self.kind.eq_ignore_ascii_case("pagenum")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compare {
    Lt,
    Lte,
    Eq,
    Gt,
    Gte,
}

impl Compare {
    /// Apply the operator to a numeric ordering
    pub fn matches_f64(&self, left: f64, right: f64) -> bool {
        match self {
            Compare::Lt => left < right,
            Compare::Lte => left <= right,
            Compare::Eq => left == right,
            Compare::Gt => left > right,
            Compare::Gte => left >= right,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_param_pagination() {
        let yaml = r#"
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
"#;
        let p: Pagination = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(p.params.len(), 1);
        assert_eq!(p.params[0].kind, ParamType::Int);
        assert_eq!(p.params[0].location, ParamLocation::Query);
        assert!(p.stop_on[0].is_request_param());
        assert_eq!(p.stop_on[0].compare, Some(Compare::Gte));
    }

    #[test]
    fn parse_next_url_pagination() {
        let yaml = "nextPageUrlSelector: \"body:.links.next\"\n";
        let p: Pagination = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(p.next_page_url_selector.as_deref(), Some("body:.links.next"));
        assert!(p.params.is_empty());
    }

    #[test]
    fn stop_kind_matching_ignores_case() {
        let stop = StopCondition {
            kind: "pageNum".into(),
            ..StopCondition::default()
        };
        assert!(stop.is_page_num());
        assert!(!stop.is_response_body());
    }

    #[test]
    fn compare_operators() {
        assert!(Compare::Lt.matches_f64(1.0, 2.0));
        assert!(Compare::Lte.matches_f64(2.0, 2.0));
        assert!(Compare::Eq.matches_f64(2.0, 2.0));
        assert!(Compare::Gt.matches_f64(3.0, 2.0));
        assert!(Compare::Gte.matches_f64(2.0, 2.0));
        assert!(!Compare::Gte.matches_f64(1.0, 2.0));
    }
}

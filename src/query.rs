//! List queries: the structured query model and the adaptors that parse
//! transport input into it and format results back out.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::types::{Record, StringMap};

const DEFAULT_LIMIT: u64 = 10;
const DEFAULT_OFFSET: u64 = 0;

/// Comparison applied by a [`QueryFilter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterOperator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "!in")]
    NotIn,
    #[serde(rename = "contains")]
    Contains,
    #[serde(rename = "!contains")]
    NotContains,
    #[serde(rename = "between")]
    Between,
    #[serde(rename = "!between")]
    NotBetween,
    #[serde(rename = "null")]
    Null,
    #[serde(rename = "!null")]
    NotNull,
}

impl FilterOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOperator::Eq => "=",
            FilterOperator::Ne => "!=",
            FilterOperator::Gt => ">",
            FilterOperator::Gte => ">=",
            FilterOperator::Lt => "<",
            FilterOperator::Lte => "<=",
            FilterOperator::In => "in",
            FilterOperator::NotIn => "!in",
            FilterOperator::Contains => "contains",
            FilterOperator::NotContains => "!contains",
            FilterOperator::Between => "between",
            FilterOperator::NotBetween => "!between",
            FilterOperator::Null => "null",
            FilterOperator::NotNull => "!null",
        }
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One filter clause. Clauses of a query are AND-ed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryFilter {
    pub field: String,
    pub op: FilterOperator,
    /// Scalar, or an array for `in`/`between` style operators.
    pub value: Value,
}

impl QueryFilter {
    pub fn new(field: impl Into<String>, op: FilterOperator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRange {
    pub offset: u64,
    pub limit: u64,
}

impl Default for QueryRange {
    fn default() -> Self {
        Self {
            offset: DEFAULT_OFFSET,
            limit: DEFAULT_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerySort {
    pub field: String,
    pub direction: SortDirection,
}

/// Backend-neutral list query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryListParam {
    pub resource: String,
    pub filter: Vec<QueryFilter>,
    pub range: QueryRange,
    pub sort: Vec<QuerySort>,
}

impl QueryListParam {
    /// Unfiltered, unsorted query with the default range.
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            filter: Vec::new(),
            range: QueryRange::default(),
            sort: Vec::new(),
        }
    }
}

/// One page of rows plus the total count matching the filter.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ListResults {
    pub data: Vec<Record>,
    pub total: u64,
}

/// Formatted list response.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ListResponse {
    pub body: Value,
    pub headers: StringMap,
}

/// Raw list request as received from the transport.
#[derive(Debug, Clone, Copy)]
pub struct ListInput<'a> {
    pub query: &'a StringMap,
    pub params: &'a StringMap,
    pub body: &'a Value,
    pub headers: &'a StringMap,
}

/// Converts transport input into a [`QueryListParam`] and results into a
/// response.
pub trait ListAdaptor: Send + Sync {
    fn parse(&self, resource: &str, input: ListInput<'_>) -> QueryListParam;

    fn response(
        &self,
        results: ListResults,
        params: &QueryListParam,
        resource: &str,
    ) -> ListResponse;

    /// JSON Schema of the accepted query string, for endpoint descriptors.
    fn query_schema(&self) -> Option<Value> {
        None
    }
}

/// `?filter=field:value,...&limit=&offset=&sort=[-]field`.
///
/// Every filter clause is an equality test. The response body is the row
/// array and the total goes into an `X-total-{resource}` header.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultAdaptor;

impl ListAdaptor for DefaultAdaptor {
    fn parse(&self, resource: &str, input: ListInput<'_>) -> QueryListParam {
        let query = input.query;

        let filter = query
            .get("filter")
            .map(String::as_str)
            .unwrap_or("")
            .split(',')
            .filter(|clause| !clause.trim().is_empty())
            .map(|clause| {
                let mut parts = clause.split(':');
                let field = parts.next().unwrap_or_default();
                let value = parts.next().unwrap_or_default();
                QueryFilter::new(field, FilterOperator::Eq, value)
            })
            .collect();

        let sort = match query.get("sort").map(String::as_str) {
            Some(sort) if !sort.is_empty() => {
                let (field, direction) = match sort.strip_prefix('-') {
                    Some(field) => (field, SortDirection::Desc),
                    None => (sort, SortDirection::Asc),
                };
                vec![QuerySort {
                    field: field.to_string(),
                    direction,
                }]
            }
            _ => Vec::new(),
        };

        QueryListParam {
            resource: resource.to_string(),
            filter,
            range: QueryRange {
                limit: parse_count(query.get("limit"), DEFAULT_LIMIT),
                offset: parse_count(query.get("offset"), DEFAULT_OFFSET),
            },
            sort,
        }
    }

    fn response(
        &self,
        results: ListResults,
        _params: &QueryListParam,
        resource: &str,
    ) -> ListResponse {
        let mut headers = StringMap::new();
        headers.insert(format!("X-total-{}", resource), results.total.to_string());
        ListResponse {
            body: Value::Array(results.data),
            headers,
        }
    }

    fn query_schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "filter": { "type": "string", "examples": ["status:ACTIVE"] },
                "limit": { "type": "string", "examples": ["20"] },
                "offset": { "type": "string", "examples": ["0"] },
                "sort": { "type": "string", "examples": ["-id", "id", "age", "-age"] }
            }
        }))
    }
}

/// Leading decimal digits of `raw`, or `default` when there are none.
fn parse_count(raw: Option<&String>, default: u64) -> u64 {
    let Some(raw) = raw else {
        return default;
    };
    let digits: String = raw
        .trim()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().unwrap_or(default)
}

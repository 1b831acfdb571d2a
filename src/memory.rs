//! In-process [`Repository`] backed by a vector of JSON records.
//!
//! Filtering, search and sorting follow the field allow-lists taken from
//! the schema flags, the same way a SQL backend would restrict its
//! `WHERE` and `ORDER BY` clauses.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicI64, Ordering as AtomicOrdering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::ResourceError;
use crate::query::{FilterOperator, ListResults, QueryFilter, QueryListParam, SortDirection};
use crate::repository::Repository;
use crate::schema::ResourceSchema;
use crate::types::{Record, RecordId, ResourceAction};

/// Pseudo-field that searches every searchable field at once.
pub const SEARCH_FIELD: &str = "_search";

#[derive(Debug)]
pub struct MemoryRepository {
    name: String,
    searchable: Vec<String>,
    filterable: Vec<String>,
    sortable: Vec<String>,
    rows: RwLock<Vec<Record>>,
    next_id: AtomicI64,
}

impl MemoryRepository {
    /// Empty repository. Nothing is searchable, filterable or sortable
    /// until allow-lists are set.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            searchable: Vec::new(),
            filterable: Vec::new(),
            sortable: Vec::new(),
            rows: RwLock::new(Vec::new()),
            next_id: AtomicI64::new(1),
        }
    }

    /// Repository whose allow-lists come from the `$search`, `$filter`
    /// and `$sort` flags of `schema`.
    pub fn from_schema(schema: &ResourceSchema) -> Self {
        let paths = schema.flag_paths();
        let list = |flag: &str| paths.get(flag).cloned().unwrap_or_default();
        Self {
            searchable: list("search"),
            filterable: list("filter"),
            sortable: list("sort"),
            ..Self::new(schema.name())
        }
    }

    pub fn with_searchable(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.searchable = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_filterable(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.filterable = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_sortable(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.sortable = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Seed rows. Integer ids continue after the largest seeded one.
    pub fn with_rows(self, rows: impl IntoIterator<Item = Record>) -> Self {
        let rows: Vec<Record> = rows.into_iter().collect();
        let max_id = rows
            .iter()
            .filter_map(|row| row.get("id").and_then(Value::as_i64))
            .max()
            .unwrap_or(0);
        Self {
            rows: RwLock::new(rows),
            next_id: AtomicI64::new(max_id + 1),
            ..self
        }
    }

    /// Snapshot of every stored row.
    pub async fn rows(&self) -> Vec<Record> {
        self.rows.read().await.clone()
    }

    fn position(rows: &[Record], id: &RecordId) -> Option<usize> {
        let wanted = id.to_string();
        rows.iter().position(|row| {
            row.get("id")
                .and_then(RecordId::from_value)
                .is_some_and(|row_id| row_id.to_string() == wanted)
        })
    }

    fn missing(&self, id: &RecordId) -> ResourceError {
        ResourceError::not_found(format!("{} {} not found", self.name, id))
    }

    fn matches(&self, row: &Record, filter: &QueryFilter) -> bool {
        if filter.field == SEARCH_FIELD && filter.op == FilterOperator::Eq {
            let needle: String = text(&filter.value)
                .unwrap_or_default()
                .chars()
                .filter(|c| !matches!(c, '"' | '\'' | '$' | '%'))
                .collect::<String>()
                .to_lowercase();
            return self.searchable.iter().any(|field| {
                lookup(row, field)
                    .and_then(text)
                    .is_some_and(|value| value.to_lowercase().contains(&needle))
            });
        }

        if !self.filterable.contains(&filter.field) {
            debug!(resource = %self.name, field = %filter.field, "field is not filterable");
            return true;
        }

        let field = lookup(row, &filter.field).filter(|v| !v.is_null());
        let values = match &filter.value {
            Value::Array(items) => items.clone(),
            other => vec![other.clone()],
        };

        match filter.op {
            FilterOperator::Eq => field.is_some_and(|v| loose_eq(v, &filter.value)),
            FilterOperator::Ne => !field.is_some_and(|v| loose_eq(v, &filter.value)),
            FilterOperator::Gt => compare(field, &filter.value) == Some(Ordering::Greater),
            FilterOperator::Gte => compare(field, &filter.value).is_some_and(Ordering::is_ge),
            FilterOperator::Lt => compare(field, &filter.value) == Some(Ordering::Less),
            FilterOperator::Lte => compare(field, &filter.value).is_some_and(Ordering::is_le),
            FilterOperator::In => field.is_some_and(|v| values.iter().any(|x| loose_eq(v, x))),
            FilterOperator::NotIn => !field.is_some_and(|v| values.iter().any(|x| loose_eq(v, x))),
            FilterOperator::Contains => contains(field, &filter.value),
            FilterOperator::NotContains => !contains(field, &filter.value),
            FilterOperator::Between => between(field, &values),
            FilterOperator::NotBetween => !between(field, &values),
            FilterOperator::Null => field.is_none(),
            FilterOperator::NotNull => field.is_some(),
        }
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, _action: ResourceAction) -> bool {
        true
    }

    async fn get(&self, id: &RecordId) -> Result<Option<Record>, ResourceError> {
        let rows = self.rows.read().await;
        Ok(Self::position(&rows, id).map(|i| rows[i].clone()))
    }

    async fn create(&self, data: Record) -> Result<Record, ResourceError> {
        let mut row = data;
        let Some(fields) = row.as_object_mut() else {
            let message = format!("{} rows must be objects", self.name);
            return Err(ResourceError::backend(message));
        };
        if fields.get("id").and_then(RecordId::from_value).is_none() {
            let id = self.next_id.fetch_add(1, AtomicOrdering::SeqCst);
            fields.insert("id".to_string(), Value::from(id));
        }

        self.rows.write().await.push(row.clone());
        Ok(row)
    }

    async fn update(&self, id: &RecordId, patch: Record) -> Result<Record, ResourceError> {
        let mut rows = self.rows.write().await;
        let index = Self::position(&rows, id).ok_or_else(|| self.missing(id))?;
        if let (Some(row), Value::Object(patch)) = (rows[index].as_object_mut(), patch) {
            for (key, value) in patch {
                if key != "id" {
                    row.insert(key, value);
                }
            }
        }
        Ok(rows[index].clone())
    }

    async fn replace(&self, id: &RecordId, data: Record) -> Result<Record, ResourceError> {
        let mut rows = self.rows.write().await;
        let index = Self::position(&rows, id).ok_or_else(|| self.missing(id))?;
        let mut row = data;
        if let Some(fields) = row.as_object_mut() {
            let existing = rows[index]
                .get("id")
                .cloned()
                .unwrap_or_else(|| id.to_value());
            fields.insert("id".to_string(), existing);
        }
        rows[index] = row.clone();
        Ok(row)
    }

    async fn delete(&self, id: &RecordId) -> Result<u64, ResourceError> {
        let mut rows = self.rows.write().await;
        match Self::position(&rows, id) {
            Some(index) => {
                rows.remove(index);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn list(&self, params: &QueryListParam) -> Result<ListResults, ResourceError> {
        let rows = self.rows.read().await;
        let mut matched: Vec<&Record> = rows
            .iter()
            .filter(|row| params.filter.iter().all(|f| self.matches(row, f)))
            .collect();

        let sorters: Vec<_> = params
            .sort
            .iter()
            .filter(|s| {
                let pass = self.sortable.contains(&s.field);
                if !pass {
                    debug!(resource = %self.name, field = %s.field, "field is not sortable");
                }
                pass
            })
            .collect();
        if !sorters.is_empty() {
            matched.sort_by(|a, b| {
                sorters
                    .iter()
                    .map(|s| {
                        let ord = order(lookup(a, &s.field), lookup(b, &s.field));
                        match s.direction {
                            SortDirection::Asc => ord,
                            SortDirection::Desc => ord.reverse(),
                        }
                    })
                    .find(|ord| *ord != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            });
        }

        let total = matched.len() as u64;
        let offset = usize::try_from(params.range.offset).unwrap_or(usize::MAX);
        let limit = usize::try_from(params.range.limit).unwrap_or(usize::MAX);
        let data = matched
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();
        debug!(resource = %self.name, total, "listed rows");

        Ok(ListResults { data, total })
    }
}

fn lookup<'a>(row: &'a Value, path: &str) -> Option<&'a Value> {
    path
        .split('.')
        .try_fold(row, |current, part| current.get(part))
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Equality across string/number representations, as query strings only
/// carry text.
fn loose_eq(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    if let (Some(x), Some(y)) = (number(a), number(b)) {
        return x == y;
    }
    matches!((text(a), text(b)), (Some(x), Some(y)) if x == y)
}

fn compare(field: Option<&Value>, target: &Value) -> Option<Ordering> {
    let field = field?;
    if let (Some(x), Some(y)) = (number(field), number(target)) {
        return x.partial_cmp(&y);
    }
    Some(text(field)?.cmp(&text(target)?))
}

fn contains(field: Option<&Value>, needle: &Value) -> bool {
    match (field.and_then(text), text(needle)) {
        (Some(haystack), Some(needle)) => haystack.to_lowercase().contains(&needle.to_lowercase()),
        _ => false,
    }
}

fn between(field: Option<&Value>, bounds: &[Value]) -> bool {
    let [low, high] = bounds else {
        return false;
    };
    compare(field, low).is_some_and(Ordering::is_ge)
        && compare(field, high).is_some_and(Ordering::is_le)
}

/// Sort order with missing values first.
fn order(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a.filter(|v| !v.is_null()), b.filter(|v| !v.is_null())) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => compare(Some(x), y).unwrap_or(Ordering::Equal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{QueryRange, QuerySort};
    use serde_json::json;

    fn repo() -> MemoryRepository {
        MemoryRepository::new("products")
            .with_searchable(["name", "sku"])
            .with_filterable(["status", "price", "name", "deletedAt"])
            .with_sortable(["id", "price"])
            .with_rows([
                json!({
                    "id": 1, "name": "Red Shirt", "sku": "RS-1", "status": "ACTIVE", "price": 20
                }),
                json!({
                    "id": 2, "name": "Blue Shirt", "sku": "BS-1", "status": "ACTIVE", "price": 35
                }),
                json!({
                    "id": 3, "name": "Green Hat", "sku": "GH-1", "status": "DRAFT", "price": 10,
                    "deletedAt": "2024-01-01"
                }),
            ])
    }

    fn query(filter: Vec<QueryFilter>) -> QueryListParam {
        QueryListParam {
            filter,
            ..QueryListParam::new("products")
        }
    }

    async fn ids(repo: &MemoryRepository, params: QueryListParam) -> Vec<i64> {
        repo.list(&params)
            .await
            .unwrap()
            .data
            .iter()
            .filter_map(|row| row["id"].as_i64())
            .collect()
    }

    #[tokio::test]
    async fn crud_round_trip() {
        let repo = repo();
        let created = repo.create(json!({ "name": "Cap" })).await.unwrap();
        assert_eq!(created["id"], 4);

        let updated = repo
            .update(&RecordId::Int(4), json!({ "price": 12, "id": 99 }))
            .await
            .unwrap();
        assert_eq!(updated, json!({ "id": 4, "name": "Cap", "price": 12 }));

        let replaced = repo
            .replace(&RecordId::from("4"), json!({ "name": "Hat" }))
            .await
            .unwrap();
        assert_eq!(replaced, json!({ "name": "Hat", "id": 4 }));

        assert_eq!(repo.delete(&RecordId::Int(4)).await.unwrap(), 1);
        assert_eq!(repo.delete(&RecordId::Int(4)).await.unwrap(), 0);
        assert!(repo.get(&RecordId::Int(4)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_of_missing_row_is_not_found() {
        let err = repo()
            .update(&RecordId::Int(42), json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test]
    async fn string_ids_match_integer_rows() {
        let row = repo().get(&RecordId::from("2")).await.unwrap().unwrap();
        assert_eq!(row["name"], "Blue Shirt");
    }

    #[tokio::test]
    async fn equality_filter_matches_text_against_numbers() {
        let repo = repo();
        let status = QueryFilter::new("status", FilterOperator::Eq, "ACTIVE");
        assert_eq!(ids(&repo, query(vec![status])).await, vec![1, 2]);
        let price = QueryFilter::new("price", FilterOperator::Eq, "35");
        assert_eq!(ids(&repo, query(vec![price])).await, vec![2]);
    }

    #[tokio::test]
    async fn comparison_and_set_operators() {
        use FilterOperator as Op;

        let repo = repo();
        let cases = vec![
            ("price", Op::Gt, json!(15), vec![1, 2]),
            ("price", Op::Lte, json!(20), vec![1, 3]),
            ("status", Op::Ne, json!("ACTIVE"), vec![3]),
            ("price", Op::In, json!([10, 35]), vec![2, 3]),
            ("price", Op::NotIn, json!([10, 35]), vec![1]),
            ("price", Op::Between, json!([15, 35]), vec![1, 2]),
            ("price", Op::NotBetween, json!([15, 35]), vec![3]),
            ("name", Op::Contains, json!("shirt"), vec![1, 2]),
            ("name", Op::NotContains, json!("shirt"), vec![3]),
            ("deletedAt", Op::Null, Value::Null, vec![1, 2]),
            ("deletedAt", Op::NotNull, Value::Null, vec![3]),
        ];
        for (field, op, value, expected) in cases {
            let filter = QueryFilter::new(field, op, value);
            let found = ids(&repo, query(vec![filter])).await;
            assert_eq!(found, expected, "operator {}", op);
        }
    }

    #[tokio::test]
    async fn search_spans_searchable_fields() {
        let repo = repo();
        let search = QueryFilter::new(SEARCH_FIELD, FilterOperator::Eq, "gh-%");
        let found = ids(&repo, query(vec![search])).await;
        assert_eq!(found, vec![3]);
    }

    #[tokio::test]
    async fn non_filterable_fields_are_ignored() {
        let repo = repo();
        let sku = QueryFilter::new("sku", FilterOperator::Eq, "nothing");
        let found = ids(&repo, query(vec![sku])).await;
        assert_eq!(found, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn sort_and_range() {
        let repo = repo();
        let params = QueryListParam {
            sort: vec![QuerySort {
                field: "price".into(),
                direction: SortDirection::Desc,
            }],
            range: QueryRange { offset: 1, limit: 1 },
            ..QueryListParam::new("products")
        };
        let results = repo.list(&params).await.unwrap();
        assert_eq!(results.total, 3);
        let red_shirt = json!({
            "id": 1, "name": "Red Shirt", "sku": "RS-1", "status": "ACTIVE", "price": 20
        });
        assert_eq!(results.data, vec![red_shirt]);
    }

    #[tokio::test]
    async fn unsortable_fields_keep_insertion_order() {
        let repo = repo();
        let params = QueryListParam {
            sort: vec![QuerySort {
                field: "name".into(),
                direction: SortDirection::Asc,
            }],
            ..QueryListParam::new("products")
        };
        assert_eq!(ids(&repo, params).await, vec![1, 2, 3]);
    }

    #[test]
    fn allow_lists_come_from_flags() {
        let schema = ResourceSchema::new(
            "products",
            json!({
                "type": "object",
                "properties": {
                    "id": { "type": "integer" },
                    "name": { "type": "string", "$search": true },
                    "notes": { "type": "string", "$filter": false, "$sort": false }
                }
            }),
        )
        .unwrap();
        let repo = MemoryRepository::from_schema(&schema);
        assert_eq!(repo.searchable, vec!["name"]);
        assert_eq!(repo.filterable, vec!["id", "name"]);
        assert_eq!(repo.sortable, vec!["id", "name"]);
    }
}

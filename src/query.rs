//! Structured query input: filter tree, ordering, pagination and nested includes.
//!
//! All of it deserializes from the JSON shape callers send, e.g.
//! `{"where": {"OR": [{"likes": {"gt": 3}}, {"title": null}]}, "orderBy": {"likes": "desc"}, "limit": 10, "includes": {"linkedAssetRef": true}}`.

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Filter tree. `And(vec![])` matches everything.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(try_from = "Value")]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Field { name: String, predicate: Predicate },
}

#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    /// Equality; `Value::Null` compares with `IS NULL`.
    Equals(Value),
    In(Vec<Value>),
    /// Both bounds may be present; each emits its own comparison.
    Range { lt: Option<Value>, gt: Option<Value> },
}

impl Filter {
    pub fn all() -> Self {
        Filter::And(Vec::new())
    }

    pub fn eq(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Field {
            name: name.into(),
            predicate: Predicate::Equals(value.into()),
        }
    }

    pub fn is_in(name: impl Into<String>, values: Vec<Value>) -> Self {
        Filter::Field {
            name: name.into(),
            predicate: Predicate::In(values),
        }
    }

    pub fn range(name: impl Into<String>, lt: Option<Value>, gt: Option<Value>) -> Self {
        Filter::Field {
            name: name.into(),
            predicate: Predicate::Range { lt, gt },
        }
    }

    /// Filter matching one entity by uuid.
    pub fn by_uuid(uuid: impl Into<String>) -> Self {
        Filter::eq("uuid", Value::String(uuid.into()))
    }

    pub fn from_json(v: &Value) -> Result<Self, EngineError> {
        match v {
            Value::Null => Ok(Filter::all()),
            Value::Object(map) => parse_object(map),
            other => Err(EngineError::Validation(format!("where must be an object, got {}", other))),
        }
    }
}

impl TryFrom<Value> for Filter {
    type Error = EngineError;

    fn try_from(v: Value) -> Result<Self, Self::Error> {
        Filter::from_json(&v)
    }
}

impl Default for Filter {
    fn default() -> Self {
        Filter::all()
    }
}

fn parse_object(map: &Map<String, Value>) -> Result<Filter, EngineError> {
    let mut parts = Vec::with_capacity(map.len());
    for (key, value) in map {
        match key.as_str() {
            "AND" | "OR" => {
                let items = match value {
                    Value::Array(items) => items.iter().map(Filter::from_json).collect::<Result<Vec<_>, _>>()?,
                    Value::Object(_) => vec![Filter::from_json(value)?],
                    other => {
                        return Err(EngineError::Validation(format!("{} expects a list of filters, got {}", key, other)))
                    }
                };
                parts.push(if key == "AND" { Filter::And(items) } else { Filter::Or(items) });
            }
            _ => parts.extend(parse_leaf(key, value)?),
        }
    }
    Ok(if parts.len() == 1 {
        parts.remove(0)
    } else {
        Filter::And(parts)
    })
}

const OPERATORS: &[&str] = &["in", "lt", "gt"];

fn parse_leaf(name: &str, value: &Value) -> Result<Vec<Filter>, EngineError> {
    let Value::Object(ops) = value else {
        return Ok(vec![Filter::eq(name, value.clone())]);
    };
    if let Some(bad) = ops.keys().find(|k| !OPERATORS.contains(&k.as_str())) {
        return Err(EngineError::Validation(format!("unknown operator '{}' on '{}'", bad, name)));
    }
    let mut out = Vec::new();
    if let Some(list) = ops.get("in") {
        let Value::Array(items) = list else {
            return Err(EngineError::Validation(format!("'in' on '{}' expects a list", name)));
        };
        out.push(Filter::is_in(name, items.clone()));
    }
    let lt = ops.get("lt").cloned();
    let gt = ops.get("gt").cloned();
    if lt.is_some() || gt.is_some() {
        out.push(Filter::range(name, lt, gt));
    }
    if out.is_empty() {
        return Err(EngineError::Validation(format!("empty operator object on '{}'", name)));
    }
    Ok(out)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// Ordering, from `{"field": "asc"}` or `[{"a": "desc"}, {"b": "asc"}]`.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(try_from = "Value")]
pub struct OrderBy(pub Vec<(String, SortDirection)>);

impl OrderBy {
    pub fn asc(field: impl Into<String>) -> Self {
        OrderBy(vec![(field.into(), SortDirection::Asc)])
    }

    pub fn desc(field: impl Into<String>) -> Self {
        OrderBy(vec![(field.into(), SortDirection::Desc)])
    }

    pub fn then(mut self, field: impl Into<String>, dir: SortDirection) -> Self {
        self.0.push((field.into(), dir));
        self
    }
}

impl TryFrom<Value> for OrderBy {
    type Error = EngineError;

    fn try_from(v: Value) -> Result<Self, Self::Error> {
        let objects = match v {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => vec![other],
        };
        let mut out = Vec::new();
        for obj in objects {
            let Value::Object(map) = obj else {
                return Err(EngineError::Validation(format!("orderBy entries must be objects, got {}", obj)));
            };
            for (field, dir) in map {
                let dir: SortDirection = serde_json::from_value(dir.clone()).map_err(|_| {
                    EngineError::Validation(format!("orderBy direction for '{}' must be asc or desc, got {}", field, dir))
                })?;
                out.push((field, dir));
            }
        }
        Ok(OrderBy(out))
    }
}

/// `true` includes a relation; an object includes it together with nested includes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Include {
    Flag(bool),
    Nested(Includes),
}

pub type Includes = BTreeMap<String, Include>;

impl Include {
    pub fn nested(&self) -> Option<&Includes> {
        match self {
            Include::Nested(n) => Some(n),
            Include::Flag(_) => None,
        }
    }

    pub fn is_requested(&self) -> bool {
        !matches!(self, Include::Flag(false))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindQuery {
    #[serde(default, rename = "where")]
    pub filter: Filter,
    #[serde(default)]
    pub order_by: OrderBy,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
    #[serde(default)]
    pub includes: Includes,
}

impl FindQuery {
    pub fn new() -> Self {
        FindQuery::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by = order;
        self
    }

    pub fn limit(mut self, n: u32) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn offset(mut self, n: u32) -> Self {
        self.offset = Some(n);
        self
    }

    pub fn include(mut self, relation: impl Into<String>) -> Self {
        self.includes.insert(relation.into(), Include::Flag(true));
        self
    }

    pub fn include_nested(mut self, relation: impl Into<String>, nested: Includes) -> Self {
        self.includes.insert(relation.into(), Include::Nested(nested));
        self
    }

    pub fn from_json(v: Value) -> Result<Self, EngineError> {
        serde_json::from_value(v).map_err(|e| EngineError::Validation(format!("invalid query: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn leaves_become_predicates() {
        let f = Filter::from_json(&json!({"title": "x"})).unwrap();
        assert_eq!(f, Filter::eq("title", "x"));

        let f = Filter::from_json(&json!({"likes": {"lt": 10, "gt": 2}})).unwrap();
        assert_eq!(f, Filter::range("likes", Some(json!(10)), Some(json!(2))));

        let f = Filter::from_json(&json!({"likes": {"in": [1, 2]}})).unwrap();
        assert_eq!(f, Filter::is_in("likes", vec![json!(1), json!(2)]));

        let f = Filter::from_json(&json!({"title": null})).unwrap();
        assert_eq!(f, Filter::eq("title", Value::Null));
    }

    #[test]
    fn combinators_nest() {
        let f = Filter::from_json(&json!({
            "OR": [{"likes": {"gt": 3}}, {"AND": [{"title": "a"}, {"title": "b"}]}]
        }))
        .unwrap();
        assert_eq!(
            f,
            Filter::Or(vec![
                Filter::range("likes", None, Some(json!(3))),
                Filter::And(vec![Filter::eq("title", "a"), Filter::eq("title", "b")]),
            ])
        );
    }

    #[test]
    fn several_keys_are_conjoined() {
        let f = Filter::from_json(&json!({"a": 1, "b": 2})).unwrap();
        assert_eq!(f, Filter::And(vec![Filter::eq("a", 1), Filter::eq("b", 2)]));
        assert_eq!(Filter::from_json(&json!({})).unwrap(), Filter::all());
    }

    #[test]
    fn bad_filters_are_rejected() {
        assert!(Filter::from_json(&json!({"likes": {"like": "x"}})).is_err());
        assert!(Filter::from_json(&json!({"likes": {"in": 3}})).is_err());
        assert!(Filter::from_json(&json!({"likes": {}})).is_err());
        assert!(Filter::from_json(&json!({"AND": 3})).is_err());
        assert!(Filter::from_json(&json!([1])).is_err());
    }

    #[test]
    fn find_query_deserializes() {
        let q = FindQuery::from_json(json!({
            "where": {"uuid": "u"},
            "orderBy": [{"likes": "desc"}, {"title": "asc"}],
            "limit": 5,
            "includes": {"linkedAssetRef": true, "links": {"notes": true}, "skip": false}
        }))
        .unwrap();
        assert_eq!(q.filter, Filter::by_uuid("u"));
        assert_eq!(q.order_by, OrderBy::desc("likes").then("title", SortDirection::Asc));
        assert_eq!(q.limit, Some(5));
        assert_eq!(q.includes.len(), 3);
        assert!(q.includes["links"].nested().unwrap().contains_key("notes"));
        assert!(!q.includes["skip"].is_requested());
    }

    #[test]
    fn order_by_accepts_single_object() {
        let o = OrderBy::try_from(json!({"likes": "asc"})).unwrap();
        assert_eq!(o, OrderBy::asc("likes"));
        assert!(OrderBy::try_from(json!({"likes": "sideways"})).is_err());
    }
}

//! Filtered, paginated query construction
//!
//! Builds the row query and matching count query for a dataset exploration
//! request. Construction is separated from execution: the caller resolves
//! the live column catalog, passes it in, and runs the returned queries
//! itself, so everything here is pure and directly testable.
//!
//! Caller-supplied values are always bound as query parameters; only
//! catalog-validated column names and the crate-generated table name appear
//! in SQL text.

use itertools::Itertools;
use serde_json::{Map, Value};

use crate::db::clickhouse::{quote_identifier, BoundQuery};
use crate::error::{DatahouseError, Result};
use crate::time::parse_date_value;

/// One exploration request, as received by the API layer.
#[derive(Debug, Default)]
pub struct QuerySpec<'a> {
    pub filters: Option<&'a Map<String, Value>>,
    pub date_gt: Option<&'a str>,
    pub date_lt: Option<&'a str>,
    pub page: u64,
    pub page_size: u64,
}

fn bind_date(value: &str) -> Result<String> {
    let date = parse_date_value(value)
        .ok_or_else(|| DatahouseError::InvalidDate(value.to_string()))?;
    Ok(format!("{} 00:00:00", date))
}

/// Build the row query and count query for one exploration request.
///
/// Every filter key must appear in `valid_columns`. Filters on the date
/// column become date equality; string values become substring matches;
/// numbers and booleans become direct equality. `date_gt`/`date_lt` apply
/// only when the date column is not already filtered on.
pub fn build_queries(
    table_name: &str,
    valid_columns: &[String],
    date_column: &str,
    spec: &QuerySpec,
) -> Result<(BoundQuery, BoundQuery)> {
    let mut conditions: Vec<String> = Vec::new();
    let mut params: Vec<(String, String)> = Vec::new();

    if let Some(filters) = spec.filters {
        for field in filters.keys() {
            if !valid_columns.iter().any(|c| c == field) {
                return Err(DatahouseError::InvalidFilter(field.clone()));
            }
        }
        for (field, value) in filters {
            let name = format!("p{}", params.len());
            let column = quote_identifier(field);
            if field == date_column {
                let raw = value
                    .as_str()
                    .ok_or_else(|| DatahouseError::InvalidDate(value.to_string()))?;
                conditions.push(format!("{} = {{{}:DateTime}}", column, name));
                params.push((name, bind_date(raw)?));
                continue;
            }
            match value {
                Value::String(s) => {
                    conditions.push(format!(
                        "{} LIKE concat('%', {{{}:String}}, '%')",
                        column, name
                    ));
                    params.push((name, s.clone()));
                }
                Value::Bool(b) => {
                    conditions.push(format!("{} = {{{}:Bool}}", column, name));
                    params.push((name, b.to_string()));
                }
                Value::Number(n) => {
                    let ty = if n.as_i64().is_some() { "Int64" } else { "Float64" };
                    conditions.push(format!("{} = {{{}:{}}}", column, name, ty));
                    params.push((name, n.to_string()));
                }
                _ => {
                    return Err(DatahouseError::InvalidFilter(format!(
                        "unsupported value for field \"{}\"",
                        field
                    )));
                }
            }
        }
    }

    let date_filtered = spec
        .filters
        .map_or(false, |f| f.contains_key(date_column));
    if !date_filtered {
        if let Some(gt) = spec.date_gt {
            let name = format!("p{}", params.len());
            conditions.push(format!(
                "{} > {{{}:DateTime}}",
                quote_identifier(date_column),
                name
            ));
            params.push((name, bind_date(gt)?));
        }
        if let Some(lt) = spec.date_lt {
            let name = format!("p{}", params.len());
            conditions.push(format!(
                "{} < {{{}:DateTime}}",
                quote_identifier(date_column),
                name
            ));
            params.push((name, bind_date(lt)?));
        }
    }

    let mut sql = format!("SELECT * FROM {}", quote_identifier(table_name));
    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.iter().join(" AND "));
    }

    let count_sql = format!("SELECT count() FROM ({})", sql);
    let offset = spec.page.saturating_sub(1).saturating_mul(spec.page_size);
    let row_sql = format!("{} LIMIT {} OFFSET {}", sql, spec.page_size, offset);

    Ok((
        BoundQuery::with_params(row_sql, params.clone()),
        BoundQuery::with_params(count_sql, params),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const DATE_COLUMN: &str = "Release date";

    fn columns() -> Vec<String> {
        ["AppID", "Name", "Genre", "Release date", "Price"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn filters(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_like_and_date_range_with_pagination() {
        let f = filters(json!({"Genre": "Action"}));
        let spec = QuerySpec {
            filters: Some(&f),
            date_gt: Some("2020-01-01"),
            date_lt: None,
            page: 2,
            page_size: 10,
        };
        let (rows, count) = build_queries("dataset_ab", &columns(), DATE_COLUMN, &spec).unwrap();

        assert_eq!(
            rows.sql,
            "SELECT * FROM `dataset_ab` WHERE `Genre` LIKE concat('%', {p0:String}, '%') \
             AND `Release date` > {p1:DateTime} LIMIT 10 OFFSET 10"
        );
        assert_eq!(
            rows.params,
            vec![
                ("p0".to_string(), "Action".to_string()),
                ("p1".to_string(), "2020-01-01 00:00:00".to_string()),
            ]
        );
        // The count query wraps the same filtered select, minus pagination.
        assert_eq!(
            count.sql,
            "SELECT count() FROM (SELECT * FROM `dataset_ab` WHERE `Genre` LIKE \
             concat('%', {p0:String}, '%') AND `Release date` > {p1:DateTime})"
        );
        assert_eq!(count.params, rows.params);
    }

    #[test]
    fn test_filter_values_never_appear_in_sql() {
        let f = filters(json!({"Name": "Robert'); DROP TABLE datasets;--"}));
        let spec = QuerySpec {
            filters: Some(&f),
            page: 1,
            page_size: 25,
            ..Default::default()
        };
        let (rows, _) = build_queries("dataset_ab", &columns(), DATE_COLUMN, &spec).unwrap();
        assert!(!rows.sql.contains("DROP TABLE"));
        assert_eq!(rows.params[0].1, "Robert'); DROP TABLE datasets;--");
    }

    #[test]
    fn test_unknown_filter_field_rejected() {
        let f = filters(json!({"NoSuchColumn": 1}));
        let spec = QuerySpec {
            filters: Some(&f),
            page: 1,
            page_size: 25,
            ..Default::default()
        };
        let err = build_queries("dataset_ab", &columns(), DATE_COLUMN, &spec).unwrap_err();
        assert!(matches!(err, DatahouseError::InvalidFilter(_)));
    }

    #[test]
    fn test_date_filter_suppresses_range_conditions() {
        let f = filters(json!({"Release date": "21/10/2008"}));
        let spec = QuerySpec {
            filters: Some(&f),
            date_gt: Some("2000-01-01"),
            date_lt: Some("2020-01-01"),
            page: 1,
            page_size: 25,
        };
        let (rows, _) = build_queries("dataset_ab", &columns(), DATE_COLUMN, &spec).unwrap();
        assert_eq!(
            rows.sql,
            "SELECT * FROM `dataset_ab` WHERE `Release date` = {p0:DateTime} \
             LIMIT 25 OFFSET 0"
        );
        assert_eq!(rows.params[0].1, "2008-10-21 00:00:00");
    }

    #[test]
    fn test_numeric_and_bool_equality() {
        let f = filters(json!({"AppID": 570, "Price": 9.99}));
        let spec = QuerySpec {
            filters: Some(&f),
            page: 1,
            page_size: 25,
            ..Default::default()
        };
        let (rows, _) = build_queries("dataset_ab", &columns(), DATE_COLUMN, &spec).unwrap();
        assert!(rows.sql.contains("`AppID` = {p0:Int64}"));
        assert!(rows.sql.contains("`Price` = {p1:Float64}"));
        assert_eq!(rows.params[0].1, "570");
        assert_eq!(rows.params[1].1, "9.99");
    }

    #[test]
    fn test_malformed_range_date_rejected() {
        let spec = QuerySpec {
            date_gt: Some("not a date"),
            page: 1,
            page_size: 25,
            ..Default::default()
        };
        let err = build_queries("dataset_ab", &columns(), DATE_COLUMN, &spec).unwrap_err();
        assert!(matches!(err, DatahouseError::InvalidDate(_)));
    }

    #[test]
    fn test_no_filters_builds_plain_paginated_select() {
        let spec = QuerySpec {
            page: 3,
            page_size: 100,
            ..Default::default()
        };
        let (rows, count) = build_queries("dataset_ab", &columns(), DATE_COLUMN, &spec).unwrap();
        assert_eq!(
            rows.sql,
            "SELECT * FROM `dataset_ab` LIMIT 100 OFFSET 200"
        );
        assert_eq!(count.sql, "SELECT count() FROM (SELECT * FROM `dataset_ab`)");
        assert!(rows.params.is_empty());
    }
}

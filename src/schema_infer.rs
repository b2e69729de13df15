//! Column type inference
//!
//! Maps the runtime value-kind of a CSV column to a ClickHouse column type.
//! Classification looks only at non-missing values, in a fixed order:
//! integer, float, boolean, timestamp, then String as the catch-all.
//! Nullability is decided separately: a column is nullable iff it contains
//! at least one missing value, so an integer column with gaps stays
//! `Nullable(Int64)` rather than degrading to a float type.

use crate::time::parse_flexible_date;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    Int64,
    Float64,
    Bool,
    DateTime,
    String,
}

impl StorageType {
    pub fn as_clickhouse(&self) -> &'static str {
        match self {
            StorageType::Int64 => "Int64",
            StorageType::Float64 => "Float64",
            StorageType::Bool => "Bool",
            StorageType::DateTime => "DateTime",
            StorageType::String => "String",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnType {
    pub base: StorageType,
    pub nullable: bool,
}

impl ColumnType {
    /// The declared type for CREATE TABLE, with the nullable qualifier.
    pub fn declaration(&self) -> String {
        if self.nullable {
            format!("Nullable({})", self.base.as_clickhouse())
        } else {
            self.base.as_clickhouse().to_string()
        }
    }
}

fn is_bool(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("false")
}

/// Infer the storage type of one column from its cell values.
///
/// `None` cells are missing values. A column with no values at all loads as
/// nullable Float64, matching how an all-empty column comes out of a
/// dataframe read.
pub fn infer_column_type<'a, I>(values: I) -> ColumnType
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    let mut nullable = false;
    let mut seen = false;
    let mut all_int = true;
    let mut all_float = true;
    let mut all_bool = true;
    let mut all_date = true;

    for cell in values {
        match cell {
            None => nullable = true,
            Some(v) => {
                seen = true;
                all_int = all_int && v.parse::<i64>().is_ok();
                all_float = all_float && v.parse::<f64>().is_ok();
                all_bool = all_bool && is_bool(v);
                all_date = all_date && parse_flexible_date(v).is_some();
            }
        }
    }

    if !seen {
        return ColumnType {
            base: StorageType::Float64,
            nullable: true,
        };
    }

    let base = if all_int {
        StorageType::Int64
    } else if all_float {
        StorageType::Float64
    } else if all_bool {
        StorageType::Bool
    } else if all_date {
        StorageType::DateTime
    } else {
        StorageType::String
    };

    ColumnType { base, nullable }
}

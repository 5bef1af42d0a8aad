//! Mapping between Postgres column types and [`Value`]s, and value compatibility checks.

use crate::db::{Type, Value};
use chrono::{DateTime, NaiveDate, NaiveDateTime};

/// Strings treated as equivalent to the SQL NULL, compared case-insensitively.
pub const NULL_EQUIVALENTS: [&str; 5] = ["nan", "n/a", "null", "none", ""];

/// Whether `s` is one of the [`NULL_EQUIVALENTS`].
pub fn is_null_equivalent(s: &str) -> bool {
    NULL_EQUIVALENTS
        .iter()
        .any(|null| s.eq_ignore_ascii_case(null))
}

/// Map a Postgres `data_type` string, as reported by `information_schema.columns`, to the
/// column type it stores. Types this interface does not traffic in map to `None`.
pub fn type_from_data_type(data_type: &str) -> Option<Type> {
    let ty = match data_type.trim().to_lowercase().as_str() {
        "boolean" | "bool" => Type::Bool,
        "integer" | "int" | "int4" | "serial" | "serial4" | "smallint" | "int2" => Type::Int4,
        "bigint" | "int8" | "bigserial" | "serial8" => Type::Int8,
        "double precision" | "float" | "float4" | "float8" | "real" | "numeric" | "decimal" => {
            Type::Float8
        }
        "character" | "char" | "character varying" | "varchar" | "text" | "name" | "date"
        | "time" | "timestamp" | "timestamp with time zone" | "timestamp without time zone" => {
            Type::Text
        }
        _ => return None,
    };
    Some(ty)
}

/// Whether `value` may be written to a column of type `ty`.
///
/// Integers are accepted by any numeric column. Text is accepted by a non-text column when it
/// parses as that column's type; a null-equivalent string counts as NULL.
pub fn compatible(value: &Value, ty: Type, nullable: bool) -> bool {
    match value {
        Value::Null => nullable,
        Value::Bool(_) => ty == Type::Bool,
        Value::Int4(_) | Value::Int8(_) => {
            matches!(ty, Type::Int4 | Type::Int8 | Type::Float8)
        }
        Value::Float8(_) => ty == Type::Float8,
        Value::Text(s) => {
            if is_null_equivalent(s) {
                return nullable;
            }
            match ty {
                Type::Text => true,
                Type::Bool => parse_bool(s).is_some(),
                Type::Int4 => s.trim().parse::<i32>().is_ok(),
                Type::Int8 => s.trim().parse::<i64>().is_ok(),
                Type::Float8 => s.trim().parse::<f64>().is_ok(),
            }
        }
    }
}

/// Coerce a raw string to a [`Value`] of column type `ty`.
///
/// Null-equivalent strings coerce to [`Value::Null`] regardless of the type. Text coercion
/// normalizes date and datetime strings written with any of the separators `. / - _ :` into
/// canonical `%Y-%m-%d [%H:%M:%S]` form.
pub fn coerce(raw: &str, ty: Type) -> Option<Value> {
    let trimmed = raw.trim();
    if is_null_equivalent(trimmed) {
        return Some(Value::Null);
    }
    match ty {
        Type::Bool => parse_bool(trimmed).map(Value::Bool),
        Type::Int4 => trimmed.parse().ok().map(Value::Int4),
        Type::Int8 => trimmed.parse().ok().map(Value::Int8),
        Type::Float8 => trimmed.parse().ok().map(Value::Float8),
        Type::Text => Some(Value::Text(
            normalize_date(trimmed).unwrap_or_else(|| trimmed.to_string()),
        )),
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "true" | "t" | "yes" | "y" => Some(true),
        "false" | "f" | "no" | "n" => Some(false),
        _ => None,
    }
}

const DATE_SEPARATORS: [char; 5] = ['-', '/', '.', '_', ':'];

/// Normalize a date or datetime string into canonical form, or `None` if `raw` is not one.
///
/// Accepts `YYYY?MM?DD` with any of the separators `. / - _ :`, optionally followed by a
/// `HH:MM:SS` time with a fractional part or a `±HH:MM` offset.
pub fn normalize_date(raw: &str) -> Option<String> {
    for sep in DATE_SEPARATORS {
        let date = format!("%Y{sep}%m{sep}%d");
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, &format!("{date} %H:%M:%S")) {
            return Some(parsed.format("%Y-%m-%d %H:%M:%S").to_string());
        }
        if let Ok(parsed) = DateTime::parse_from_str(raw, &format!("{date} %H:%M:%S%:z")) {
            return Some(parsed.format("%Y-%m-%d %H:%M:%S%:z").to_string());
        }
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, &format!("{date} %H:%M:%S%.f")) {
            return Some(parsed.format("%Y-%m-%d %H:%M:%S%.f").to_string());
        }
        if let Ok(parsed) = NaiveDate::parse_from_str(raw, &date) {
            return Some(parsed.format("%Y-%m-%d").to_string());
        }
    }
    None
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_null_equivalents() {
        for null in ["nan", "NaN", "n/a", "N/A", "null", "NULL", "none", "None", ""] {
            assert!(is_null_equivalent(null), "{null:?}");
        }
        assert!(!is_null_equivalent("0"));
        assert!(!is_null_equivalent("nil"));
    }

    #[test]
    fn test_type_from_data_type() {
        assert_eq!(type_from_data_type("integer"), Some(Type::Int4));
        assert_eq!(type_from_data_type("bigint"), Some(Type::Int8));
        assert_eq!(type_from_data_type("bigserial"), Some(Type::Int8));
        assert_eq!(type_from_data_type("double precision"), Some(Type::Float8));
        assert_eq!(type_from_data_type("numeric"), Some(Type::Float8));
        assert_eq!(type_from_data_type("character varying"), Some(Type::Text));
        assert_eq!(type_from_data_type("name"), Some(Type::Text));
        assert_eq!(
            type_from_data_type("timestamp without time zone"),
            Some(Type::Text)
        );
        assert_eq!(type_from_data_type("boolean"), Some(Type::Bool));
        assert_eq!(type_from_data_type("bytea"), None);
        assert_eq!(type_from_data_type("ARRAY"), None);
    }

    #[test]
    fn test_compatible() {
        // NULL only fits nullable columns.
        assert!(compatible(&Value::Null, Type::Int4, true));
        assert!(!compatible(&Value::Null, Type::Int4, false));

        // Integers widen into any numeric column.
        assert!(compatible(&Value::Int4(1), Type::Int8, false));
        assert!(compatible(&Value::Int4(1), Type::Float8, false));
        assert!(!compatible(&Value::Int4(1), Type::Bool, false));
        assert!(!compatible(&Value::Float8(1.0), Type::Int4, false));

        // Text fits non-text columns when it parses.
        assert!(compatible(&Value::from("5"), Type::Int4, false));
        assert!(compatible(&Value::from("7.5"), Type::Float8, false));
        assert!(compatible(&Value::from("t"), Type::Bool, false));
        assert!(!compatible(&Value::from("five"), Type::Int4, false));

        // A null-equivalent string is a NULL, not text.
        assert!(compatible(&Value::from("N/A"), Type::Int4, true));
        assert!(!compatible(&Value::from("N/A"), Type::Int4, false));
    }

    #[test]
    fn test_coerce() {
        assert_eq!(coerce("t", Type::Bool), Some(Value::Bool(true)));
        assert_eq!(coerce("NO", Type::Bool), Some(Value::Bool(false)));
        assert_eq!(coerce("maybe", Type::Bool), None);
        assert_eq!(coerce("42", Type::Int4), Some(Value::Int4(42)));
        assert_eq!(coerce("42", Type::Int8), Some(Value::Int8(42)));
        assert_eq!(coerce("4.5", Type::Float8), Some(Value::Float8(4.5)));
        assert_eq!(coerce("4.5", Type::Int4), None);
        assert_eq!(coerce("null", Type::Int4), Some(Value::Null));
        assert_eq!(coerce("", Type::Text), Some(Value::Null));
        assert_eq!(coerce("plain", Type::Text), Some(Value::from("plain")));
    }

    #[test]
    fn test_coerce_dates() {
        // Odd separators are normalized.
        assert_eq!(
            coerce("2019:02:08", Type::Text),
            Some(Value::from("2019-02-08"))
        );
        assert_eq!(
            coerce("2019/02/08", Type::Text),
            Some(Value::from("2019-02-08"))
        );
        assert_eq!(
            coerce("2019_02_08 13:45:00", Type::Text),
            Some(Value::from("2019-02-08 13:45:00"))
        );
        assert_eq!(
            normalize_date("2019-02-08 13:45:00+01:00").as_deref(),
            Some("2019-02-08 13:45:00+01:00")
        );
        assert_eq!(
            normalize_date("2019-02-08 13:45:00.250").as_deref(),
            Some("2019-02-08 13:45:00.250")
        );
        assert_eq!(normalize_date("not a date"), None);
        // Out-of-range components are not dates.
        assert_eq!(normalize_date("2019-13-40"), None);
    }
}

//! Driver-neutral column values, rows and parameter marshaling.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use std::fmt;
use uuid::Uuid;

/// Dynamic value type for bound parameters and result columns.
#[derive(Debug, Clone, PartialEq)]
pub enum PgValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Arbitrary-precision `NUMERIC`.
    Numeric(Decimal),
    Text(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Json(serde_json::Value),
    IntArray(Vec<i64>),
    TextArray(Vec<String>),
}

/// One result row, columns in select-list order.
pub type Row = Vec<PgValue>;

/// Rows in the order the server returned them. Empty for statements that
/// produce no tabular result.
pub type ResultSet = Vec<Row>;

/// How a parameter list is handed to the driver.
///
/// A single parameter is always bound as one scalar, even when it is an
/// array value; only lists of two or more are unpacked positionally.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Bind<'a> {
    None,
    Scalar(&'a PgValue),
    Positional(&'a [PgValue]),
}

impl<'a> Bind<'a> {
    pub fn from_params(params: &'a [PgValue]) -> Self {
        match params {
            [] => Bind::None,
            [single] => Bind::Scalar(single),
            many => Bind::Positional(many),
        }
    }

    /// Values in `$1..$n` order.
    pub fn values(&self) -> &'a [PgValue] {
        match *self {
            Bind::None => &[],
            Bind::Scalar(value) => std::slice::from_ref(value),
            Bind::Positional(values) => values,
        }
    }
}

impl PgValue {
    pub fn is_null(&self) -> bool {
        matches!(self, PgValue::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PgValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PgValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PgValue::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Parse a command-line literal.
    ///
    /// `null`, `true`/`false`, integers and floats get their typed variant;
    /// anything else is text.
    pub fn parse_literal(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.eq_ignore_ascii_case("null") {
            return PgValue::Null;
        }
        if trimmed.eq_ignore_ascii_case("true") {
            return PgValue::Bool(true);
        }
        if trimmed.eq_ignore_ascii_case("false") {
            return PgValue::Bool(false);
        }
        if let Ok(v) = trimmed.parse::<i64>() {
            return PgValue::Int(v);
        }
        if let Ok(v) = trimmed.parse::<f64>() {
            if v.is_finite() {
                return PgValue::Float(v);
            }
        }
        PgValue::Text(raw.to_string())
    }

    /// Convert to a JSON value for machine-readable output.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;

        match self {
            PgValue::Null => Value::Null,
            PgValue::Bool(v) => Value::Bool(*v),
            PgValue::Int(v) => Value::Number((*v).into()),
            PgValue::Float(v) => serde_json::Number::from_f64(*v)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            // As a string, so no digits are lost to f64.
            PgValue::Numeric(v) => Value::String(v.to_string()),
            PgValue::Text(v) => Value::String(v.clone()),
            PgValue::Bytes(v) => Value::String(hex(v)),
            PgValue::Uuid(v) => Value::String(v.to_string()),
            PgValue::Date(v) => Value::String(v.to_string()),
            PgValue::Timestamp(v) => Value::String(v.to_string()),
            PgValue::TimestampTz(v) => Value::String(v.to_rfc3339()),
            PgValue::Json(v) => v.clone(),
            PgValue::IntArray(v) => Value::Array(v.iter().map(|i| (*i).into()).collect()),
            PgValue::TextArray(v) => {
                Value::Array(v.iter().map(|s| Value::String(s.clone())).collect())
            }
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

impl fmt::Display for PgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PgValue::Null => write!(f, "NULL"),
            PgValue::Bool(v) => write!(f, "{}", v),
            PgValue::Int(v) => write!(f, "{}", v),
            PgValue::Float(v) => write!(f, "{}", v),
            PgValue::Numeric(v) => write!(f, "{}", v),
            PgValue::Text(v) => write!(f, "{}", v),
            PgValue::Bytes(v) => write!(f, "{}", hex(v)),
            PgValue::Uuid(v) => write!(f, "{}", v),
            PgValue::Date(v) => write!(f, "{}", v),
            PgValue::Timestamp(v) => write!(f, "{}", v),
            PgValue::TimestampTz(v) => write!(f, "{}", v),
            PgValue::Json(v) => write!(f, "{}", v),
            PgValue::IntArray(v) => {
                let items: Vec<String> = v.iter().map(|i| i.to_string()).collect();
                write!(f, "{{{}}}", items.join(","))
            }
            PgValue::TextArray(v) => write!(f, "{{{}}}", v.join(",")),
        }
    }
}

impl From<bool> for PgValue {
    fn from(v: bool) -> Self {
        PgValue::Bool(v)
    }
}

impl From<i32> for PgValue {
    fn from(v: i32) -> Self {
        PgValue::Int(v as i64)
    }
}

impl From<i64> for PgValue {
    fn from(v: i64) -> Self {
        PgValue::Int(v)
    }
}

impl From<f64> for PgValue {
    fn from(v: f64) -> Self {
        PgValue::Float(v)
    }
}

impl From<Decimal> for PgValue {
    fn from(v: Decimal) -> Self {
        PgValue::Numeric(v)
    }
}

impl From<&str> for PgValue {
    fn from(v: &str) -> Self {
        PgValue::Text(v.to_string())
    }
}

impl From<String> for PgValue {
    fn from(v: String) -> Self {
        PgValue::Text(v)
    }
}

impl From<Uuid> for PgValue {
    fn from(v: Uuid) -> Self {
        PgValue::Uuid(v)
    }
}

impl From<Vec<i64>> for PgValue {
    fn from(v: Vec<i64>) -> Self {
        PgValue::IntArray(v)
    }
}

impl From<Vec<String>> for PgValue {
    fn from(v: Vec<String>) -> Self {
        PgValue::TextArray(v)
    }
}

impl<T: Into<PgValue>> From<Option<T>> for PgValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(PgValue::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_bind_shapes() {
        assert_eq!(Bind::from_params(&[]), Bind::None);

        let one = [PgValue::Int(7)];
        assert_eq!(Bind::from_params(&one), Bind::Scalar(&PgValue::Int(7)));

        let two = [PgValue::Int(1), PgValue::from("a")];
        assert_eq!(Bind::from_params(&two), Bind::Positional(&two[..]));
    }

    #[test]
    fn test_single_array_param_stays_scalar() {
        let params = [PgValue::IntArray(vec![1, 2, 3])];
        let bind = Bind::from_params(&params);
        assert_eq!(bind, Bind::Scalar(&params[0]));
        assert_eq!(bind.values().len(), 1);
    }

    #[test]
    fn test_bind_values_order() {
        let params = [PgValue::Int(1), PgValue::Int(2), PgValue::Int(3)];
        let bind = Bind::from_params(&params);
        assert_eq!(bind.values(), &params[..]);
        assert!(Bind::None.values().is_empty());
    }

    #[test]
    fn test_parse_literal() {
        assert_eq!(PgValue::parse_literal("NULL"), PgValue::Null);
        assert_eq!(PgValue::parse_literal("true"), PgValue::Bool(true));
        assert_eq!(PgValue::parse_literal("42"), PgValue::Int(42));
        assert_eq!(PgValue::parse_literal("-1.5"), PgValue::Float(-1.5));
        assert_eq!(PgValue::parse_literal("nan"), PgValue::Text("nan".into()));
        assert_eq!(
            PgValue::parse_literal("alice"),
            PgValue::Text("alice".into())
        );
    }

    #[test]
    fn test_to_json() {
        assert_eq!(PgValue::Int(1).to_json(), serde_json::json!(1));
        assert_eq!(PgValue::Null.to_json(), serde_json::Value::Null);
        assert_eq!(
            PgValue::TextArray(vec!["a".into(), "b".into()]).to_json(),
            serde_json::json!(["a", "b"])
        );
        assert_eq!(PgValue::Bytes(vec![0xde, 0xad]).to_json(), "\\xdead");
    }

    #[test]
    fn test_numeric_keeps_digits() {
        let value = PgValue::from(Decimal::new(123456789012345678, 9));
        assert_eq!(value.to_string(), "123456789.012345678");
        assert_eq!(value.to_json(), serde_json::json!("123456789.012345678"));
    }

    #[test]
    fn test_display() {
        assert_eq!(PgValue::IntArray(vec![1, 2]).to_string(), "{1,2}");
        assert_eq!(PgValue::Null.to_string(), "NULL");
    }

    #[test]
    fn test_from_option() {
        let none: Option<i64> = None;
        assert_eq!(PgValue::from(none), PgValue::Null);
        assert_eq!(PgValue::from(Some("x")), PgValue::Text("x".into()));
    }
}

//! Field values carried by an [`Envelope`](crate::Envelope) and the
//! best-effort conversions used by typed accessors.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Serialize, Serializer};

use crate::error::EnvelopeError;

/// A single field value.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Char(char),
    Text(String),
    Decimal(Decimal),
    Date(DateTime<Utc>),
    /// Opaque payload. Only retrievable as [`Value`] or raw bytes.
    Bytes(Vec<u8>),
}

/// Discriminant of a [`Value`], used for introspection and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Null,
    Bool,
    Int,
    Float,
    Char,
    Text,
    Decimal,
    Date,
    Bytes,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Null => "null",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Char => "char",
            Self::Text => "text",
            Self::Decimal => "decimal",
            Self::Date => "date",
            Self::Bytes => "bytes",
        };
        f.write_str(s)
    }
}

impl Value {
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Null => ValueKind::Null,
            Self::Bool(_) => ValueKind::Bool,
            Self::Int(_) => ValueKind::Int,
            Self::Float(_) => ValueKind::Float,
            Self::Char(_) => ValueKind::Char,
            Self::Text(_) => ValueKind::Text,
            Self::Decimal(_) => ValueKind::Decimal,
            Self::Date(_) => ValueKind::Date,
            Self::Bytes(_) => ValueKind::Bytes,
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

// Floats compare by bit pattern so that Eq and Hash stay consistent.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Char(a), Self::Char(b)) => a == b,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Decimal(a), Self::Decimal(b)) => a == b,
            (Self::Date(a), Self::Date(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind().hash(state);
        match self {
            Self::Null => {}
            Self::Bool(v) => v.hash(state),
            Self::Int(v) => v.hash(state),
            Self::Float(v) => v.to_bits().hash(state),
            Self::Char(v) => v.hash(state),
            Self::Text(v) => v.hash(state),
            Self::Decimal(v) => v.normalize().hash(state),
            Self::Date(v) => v.hash(state),
            Self::Bytes(v) => v.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v:?}"),
            Self::Char(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
            Self::Decimal(v) => write!(f, "{v}"),
            Self::Date(v) => f.write_str(&v.to_rfc3339()),
            Self::Bytes(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(v) => serializer.serialize_bool(*v),
            Self::Int(v) => serializer.serialize_i64(*v),
            Self::Float(v) => serializer.serialize_f64(*v),
            Self::Char(v) => serializer.serialize_char(*v),
            Self::Text(v) => serializer.serialize_str(v),
            Self::Decimal(v) => serializer.serialize_str(&v.to_string()),
            Self::Date(v) => serializer.serialize_str(&v.to_rfc3339()),
            Self::Bytes(v) => serializer.serialize_bytes(v),
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident $(as $cast:ty)?),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Self::$variant(v $(as $cast)?)
                }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    i8 => Int as i64,
    i16 => Int as i64,
    i32 => Int as i64,
    i64 => Int,
    u8 => Int as i64,
    u16 => Int as i64,
    u32 => Int as i64,
    f32 => Float as f64,
    f64 => Float,
    char => Char,
    String => Text,
    Decimal => Decimal,
    DateTime<Utc> => Date,
    Vec<u8> => Bytes,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

// ---------------------------------------------------------------------------
// Typed conversion
// ---------------------------------------------------------------------------

/// Best-effort conversion from a stored, non-null [`Value`].
///
/// Conversions never truncate: a value that does not fit the target
/// (out of range, fractional, unparseable) is a
/// [`EnvelopeError::Conversion`].
pub trait FromValue: Sized {
    /// Target name used in conversion diagnostics.
    const TARGET: &'static str;

    /// # Errors
    ///
    /// Returns [`EnvelopeError::Conversion`] when `value` has no faithful
    /// representation as `Self`.
    fn from_value(value: &Value) -> Result<Self, EnvelopeError>;
}

impl FromValue for Value {
    const TARGET: &'static str = "value";

    fn from_value(value: &Value) -> Result<Self, EnvelopeError> {
        Ok(value.clone())
    }
}

impl FromValue for bool {
    const TARGET: &'static str = "bool";

    fn from_value(value: &Value) -> Result<Self, EnvelopeError> {
        match value {
            Value::Bool(v) => Ok(*v),
            Value::Int(0) => Ok(false),
            Value::Int(1) => Ok(true),
            Value::Text(s) if s.trim().eq_ignore_ascii_case("true") => Ok(true),
            Value::Text(s) if s.trim().eq_ignore_ascii_case("false") => Ok(false),
            other => Err(EnvelopeError::conversion(other, Self::TARGET)),
        }
    }
}

fn to_i64(value: &Value, target: &'static str) -> Result<i64, EnvelopeError> {
    let converted = match value {
        Value::Int(v) => Some(*v),
        #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
        Value::Float(v) if v.fract() == 0.0 && *v >= i64::MIN as f64 && *v < i64::MAX as f64 => {
            Some(*v as i64)
        }
        Value::Text(s) => s.trim().parse::<i64>().ok(),
        Value::Decimal(d) if d.fract().is_zero() => d.to_i64(),
        _ => None,
    };
    converted.ok_or_else(|| EnvelopeError::conversion(value, target))
}

macro_rules! integer_from_value {
    ($($ty:ty => $name:literal),* $(,)?) => {
        $(
            impl FromValue for $ty {
                const TARGET: &'static str = $name;

                fn from_value(value: &Value) -> Result<Self, EnvelopeError> {
                    let wide = to_i64(value, Self::TARGET)?;
                    <$ty>::try_from(wide).map_err(|_| EnvelopeError::conversion(value, Self::TARGET))
                }
            }
        )*
    };
}

integer_from_value! {
    i8 => "i8",
    i16 => "i16",
    i32 => "i32",
    i64 => "i64",
}

impl FromValue for f64 {
    const TARGET: &'static str = "f64";

    fn from_value(value: &Value) -> Result<Self, EnvelopeError> {
        let converted = match value {
            Value::Float(v) => Some(*v),
            #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
            Value::Int(v) => {
                let f = *v as f64;
                // Compared in i128: `2^63 as i64` saturates and would pass.
                (f as i128 == i128::from(*v)).then_some(f)
            }
            Value::Text(s) => s.trim().parse::<f64>().ok(),
            Value::Decimal(d) => d.to_f64(),
            _ => None,
        };
        converted.ok_or_else(|| EnvelopeError::conversion(value, Self::TARGET))
    }
}

impl FromValue for f32 {
    const TARGET: &'static str = "f32";

    fn from_value(value: &Value) -> Result<Self, EnvelopeError> {
        let wide = f64::from_value(value).map_err(|_| EnvelopeError::conversion(value, Self::TARGET))?;
        #[allow(clippy::cast_possible_truncation)]
        let narrow = wide as f32;
        #[allow(clippy::float_cmp)]
        let exact = wide.is_nan() || f64::from(narrow) == wide;
        if !exact {
            return Err(EnvelopeError::conversion(value, Self::TARGET));
        }
        Ok(narrow)
    }
}

impl FromValue for char {
    const TARGET: &'static str = "char";

    fn from_value(value: &Value) -> Result<Self, EnvelopeError> {
        match value {
            Value::Char(c) => Ok(*c),
            Value::Text(s) => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Ok(c),
                    _ => Err(EnvelopeError::conversion(value, Self::TARGET)),
                }
            }
            other => Err(EnvelopeError::conversion(other, Self::TARGET)),
        }
    }
}

impl FromValue for String {
    const TARGET: &'static str = "string";

    fn from_value(value: &Value) -> Result<Self, EnvelopeError> {
        match value {
            Value::Bytes(_) | Value::Null => Err(EnvelopeError::conversion(value, Self::TARGET)),
            other => Ok(other.to_string()),
        }
    }
}

fn parse_decimal(text: &str) -> Option<Decimal> {
    Decimal::from_str(text)
        .or_else(|_| Decimal::from_scientific(text))
        .ok()
}

impl FromValue for Decimal {
    const TARGET: &'static str = "decimal";

    fn from_value(value: &Value) -> Result<Self, EnvelopeError> {
        let converted = match value {
            Value::Decimal(d) => Some(*d),
            Value::Int(v) => Some(Decimal::from(*v)),
            Value::Float(v) if v.is_finite() => parse_decimal(&format!("{v:?}")),
            Value::Text(s) => parse_decimal(s.trim()),
            _ => None,
        };
        converted.ok_or_else(|| EnvelopeError::conversion(value, Self::TARGET))
    }
}

impl FromValue for DateTime<Utc> {
    const TARGET: &'static str = "date";

    fn from_value(value: &Value) -> Result<Self, EnvelopeError> {
        let converted = match value {
            Value::Date(d) => Some(*d),
            Value::Text(s) => DateTime::parse_from_rfc3339(s.trim())
                .ok()
                .map(|d| d.with_timezone(&Utc)),
            Value::Int(millis) => DateTime::from_timestamp_millis(*millis),
            _ => None,
        };
        converted.ok_or_else(|| EnvelopeError::conversion(value, Self::TARGET))
    }
}

impl FromValue for Vec<u8> {
    const TARGET: &'static str = "bytes";

    fn from_value(value: &Value) -> Result<Self, EnvelopeError> {
        match value {
            Value::Bytes(b) => Ok(b.clone()),
            Value::Text(s) => Ok(s.as_bytes().to_vec()),
            other => Err(EnvelopeError::conversion(other, Self::TARGET)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_conversions_reject_overflow() {
        let big = Value::Int(i64::from(i32::MAX) + 1);
        assert!(i32::from_value(&big).is_err());
        assert_eq!(i64::from_value(&big).unwrap(), i64::from(i32::MAX) + 1);
        assert!(i8::from_value(&Value::Int(128)).is_err());
        assert_eq!(i8::from_value(&Value::Int(-128)).unwrap(), -128);
    }

    #[test]
    fn fractional_float_is_not_an_integer() {
        assert!(i64::from_value(&Value::Float(2.5)).is_err());
        assert_eq!(i64::from_value(&Value::Float(2.0)).unwrap(), 2);
    }

    #[test]
    fn text_parses_into_numbers_and_bools() {
        assert_eq!(i32::from_value(&Value::from(" 42 ")).unwrap(), 42);
        assert!((f64::from_value(&Value::from("2.5")).unwrap() - 2.5).abs() < f64::EPSILON);
        assert!(bool::from_value(&Value::from("TRUE")).unwrap());
        assert!(bool::from_value(&Value::from("yes")).is_err());
    }

    #[test]
    fn float_to_string_keeps_fraction_marker() {
        assert_eq!(String::from_value(&Value::Float(2.0)).unwrap(), "2.0");
        assert_eq!(String::from_value(&Value::Int(2)).unwrap(), "2");
        assert_eq!(String::from_value(&Value::Bool(true)).unwrap(), "true");
    }

    #[test]
    fn bytes_do_not_convert_to_string() {
        let err = String::from_value(&Value::Bytes(vec![0xff])).unwrap_err();
        assert!(matches!(err, EnvelopeError::Conversion { to: "string", .. }));
    }

    #[test]
    fn f32_rejects_values_it_cannot_hold_exactly() {
        assert_eq!(f32::from_value(&Value::Int(16_777_216)).unwrap(), 16_777_216.0);
        assert!(f32::from_value(&Value::Int(16_777_217)).is_err());
        assert!(f32::from_value(&Value::Float(0.1)).is_err());
        assert!(f32::from_value(&Value::Float(f64::MAX)).is_err());
        assert_eq!(f32::from_value(&Value::Float(0.5)).unwrap(), 0.5);
        assert!(f32::from_value(&Value::Float(f64::INFINITY)).unwrap().is_infinite());
    }

    #[test]
    fn f64_rejects_integers_that_would_round() {
        assert!(f64::from_value(&Value::Int(i64::MAX)).is_err());
        assert!(f64::from_value(&Value::Int((1 << 53) + 1)).is_err());
        assert_eq!(f64::from_value(&Value::Int(1 << 53)).unwrap(), 9_007_199_254_740_992.0);
        assert_eq!(f64::from_value(&Value::Int(i64::MIN)).unwrap(), -9_223_372_036_854_775_808.0);
    }

    #[test]
    fn char_requires_single_character_text() {
        assert_eq!(char::from_value(&Value::from("x")).unwrap(), 'x');
        assert!(char::from_value(&Value::from("xy")).is_err());
        assert!(char::from_value(&Value::from("")).is_err());
    }

    #[test]
    fn decimal_from_float_is_exact_decimal_rendering() {
        let d = Decimal::from_value(&Value::Float(1.25)).unwrap();
        assert_eq!(d, Decimal::from_str("1.25").unwrap());
        assert_eq!(
            Decimal::from_value(&Value::from("1e3")).unwrap(),
            Decimal::from(1000)
        );
    }

    #[test]
    fn date_from_text_and_millis() {
        let d = DateTime::<Utc>::from_value(&Value::from("2013-12-24T00:00:00Z")).unwrap();
        assert_eq!(d.timestamp(), 1_387_843_200);
        let m = DateTime::<Utc>::from_value(&Value::Int(1_387_843_200_000)).unwrap();
        assert_eq!(d, m);
    }

    #[test]
    fn float_equality_and_hash_agree() {
        use std::collections::hash_map::DefaultHasher;
        let hash = |v: &Value| {
            let mut h = DefaultHasher::new();
            v.hash(&mut h);
            h.finish()
        };
        let a = Value::Float(f64::NAN);
        let b = Value::Float(f64::NAN);
        assert_eq!(a, b);
        assert_eq!(hash(&a), hash(&b));
        assert_ne!(Value::Int(1), Value::Float(1.0));
    }

    #[test]
    fn option_none_becomes_null() {
        assert!(Value::from(None::<i32>).is_null());
        assert_eq!(Value::from(Some(3)), Value::Int(3));
    }
}

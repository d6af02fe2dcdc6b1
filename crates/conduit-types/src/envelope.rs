//! Immutable, ordered, named-field record passed between wired stages.
//!
//! An [`Envelope`] is built once (directly or through an
//! [`EnvelopeBuilder`]) and never mutated afterwards. Stages that need a
//! different record produce a new envelope, typically through
//! [`Envelope::to_builder`] or [`Envelope::select`].
//!
//! Identity and creation timestamp are assigned at construction and are
//! diagnostic only: equality and hashing look at the `(name, value)`
//! sequence alone.

use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Serialize, Serializer};
use uuid::Uuid;

use crate::error::EnvelopeError;
use crate::value::{FromValue, Value, ValueKind};

/// Reserved key carrying the envelope identity in the external representation.
pub const ID_KEY: &str = "id";
/// Reserved key carrying the creation timestamp in the external representation.
pub const TIMESTAMP_KEY: &str = "timestamp";

/// Field address: by name or by position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field<'a> {
    Name(&'a str),
    Index(usize),
}

impl<'a> From<&'a str> for Field<'a> {
    fn from(name: &'a str) -> Self {
        Self::Name(name)
    }
}

impl<'a> From<&'a String> for Field<'a> {
    fn from(name: &'a String) -> Self {
        Self::Name(name)
    }
}

impl From<usize> for Field<'_> {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

#[derive(Clone)]
pub struct Envelope {
    id: Uuid,
    timestamp: DateTime<Utc>,
    names: Vec<String>,
    values: Vec<Value>,
}

macro_rules! primitive_accessors {
    ($($(#[$meta:meta])* $get:ident, $get_or:ident => $ty:ty;)*) => {
        $(
            $(#[$meta])*
            ///
            /// Returns the zero value when the field is absent or null.
            ///
            /// # Errors
            ///
            /// Returns [`EnvelopeError::Conversion`] when the stored value
            /// cannot be represented in the target type.
            pub fn $get<'a>(&self, field: impl Into<Field<'a>>) -> Result<$ty, EnvelopeError> {
                Ok(self.get::<$ty>(field)?.unwrap_or_default())
            }

            /// Like the plain accessor, but returns `default` instead of
            /// failing or yielding the zero value.
            #[must_use]
            pub fn $get_or<'a>(&self, field: impl Into<Field<'a>>, default: $ty) -> $ty {
                self.get_or(field, default)
            }
        )*
    };
}

macro_rules! reference_accessors {
    ($($(#[$meta:meta])* $get:ident, $get_or:ident => $ty:ty;)*) => {
        $(
            $(#[$meta])*
            ///
            /// Returns `None` when the field is absent or null.
            ///
            /// # Errors
            ///
            /// Returns [`EnvelopeError::Conversion`] when the stored value
            /// cannot be represented in the target type.
            pub fn $get<'a>(&self, field: impl Into<Field<'a>>) -> Result<Option<$ty>, EnvelopeError> {
                self.get::<$ty>(field)
            }

            /// Like the plain accessor, but returns `default` instead of
            /// failing or yielding `None`.
            #[must_use]
            pub fn $get_or<'a>(&self, field: impl Into<Field<'a>>, default: $ty) -> $ty {
                self.get_or(field, default)
            }
        )*
    };
}

impl Envelope {
    fn assemble(names: Vec<String>, values: Vec<Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            names,
            values,
        }
    }

    fn checked(names: Vec<String>, values: Vec<Value>) -> Result<Self, EnvelopeError> {
        let mut seen = HashSet::with_capacity(names.len());
        for name in &names {
            if !seen.insert(name.as_str()) {
                return Err(EnvelopeError::argument(format!(
                    "duplicate field name '{name}'"
                )));
            }
        }
        Ok(Self::assemble(names, values))
    }

    /// Start an [`EnvelopeBuilder`].
    pub fn builder() -> EnvelopeBuilder {
        EnvelopeBuilder::default()
    }

    /// Build from ordered `(name, value)` pairs.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Argument`] if a name repeats.
    pub fn from_pairs<N, V>(pairs: impl IntoIterator<Item = (N, V)>) -> Result<Self, EnvelopeError>
    where
        N: Into<String>,
        V: Into<Value>,
    {
        let (names, values) = pairs
            .into_iter()
            .map(|(n, v)| (n.into(), v.into()))
            .unzip();
        Self::checked(names, values)
    }

    /// Build from parallel name and value lists.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Argument`] if either list is absent, the
    /// lengths differ, or a name repeats.
    pub fn from_names_and_values(
        names: Option<Vec<String>>,
        values: Option<Vec<Value>>,
    ) -> Result<Self, EnvelopeError> {
        let names = names.ok_or_else(|| EnvelopeError::argument("field names must not be absent"))?;
        let values = values.ok_or_else(|| EnvelopeError::argument("values must not be absent"))?;
        if names.len() != values.len() {
            let rendered: Vec<String> = values.iter().map(ToString::to_string).collect();
            return Err(EnvelopeError::argument(format!(
                "field names must be same length as values: names=[{}], values=[{}]",
                names.join(", "),
                rendered.join(", ")
            )));
        }
        Self::checked(names, values)
    }

    /// Copy the fields into a fresh builder, for stages that derive a new
    /// envelope from an inbound one.
    pub fn to_builder(&self) -> EnvelopeBuilder {
        EnvelopeBuilder {
            names: self.names.clone(),
            values: self.values.clone(),
        }
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Field names in insertion order.
    #[must_use]
    pub fn field_names(&self) -> &[String] {
        &self.names
    }

    /// Values in insertion order.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    #[must_use]
    pub fn value_kinds(&self) -> Vec<ValueKind> {
        self.values.iter().map(Value::kind).collect()
    }

    #[must_use]
    pub fn has_field(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// Iterate `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.names.iter().map(String::as_str).zip(self.values.iter())
    }

    fn position(&self, field: Field<'_>) -> Option<usize> {
        match field {
            Field::Name(name) => self.names.iter().position(|n| n == name),
            Field::Index(i) => (i < self.values.len()).then_some(i),
        }
    }

    /// Raw stored value, `None` when the field is absent.
    #[must_use]
    pub fn value<'a>(&self, field: impl Into<Field<'a>>) -> Option<&Value> {
        self.position(field.into()).map(|i| &self.values[i])
    }

    /// Typed read with best-effort conversion.
    ///
    /// `Ok(None)` when the field is absent or null.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Conversion`] when the stored value cannot be
    /// represented as `T`.
    pub fn get<'a, T: FromValue>(
        &self,
        field: impl Into<Field<'a>>,
    ) -> Result<Option<T>, EnvelopeError> {
        match self.value(field) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => T::from_value(v).map(Some),
        }
    }

    /// Typed read that never fails: `default` stands in for an absent or
    /// null field and for a value that does not convert.
    #[must_use]
    pub fn get_or<'a, T: FromValue>(&self, field: impl Into<Field<'a>>, default: T) -> T {
        self.get(field).ok().flatten().unwrap_or(default)
    }

    primitive_accessors! {
        /// Read a field as `bool`.
        get_bool, get_bool_or => bool;
        /// Read a field as `i8`.
        get_i8, get_i8_or => i8;
        /// Read a field as `i16`.
        get_i16, get_i16_or => i16;
        /// Read a field as `i32`.
        get_i32, get_i32_or => i32;
        /// Read a field as `i64`.
        get_i64, get_i64_or => i64;
        /// Read a field as `f32`.
        get_f32, get_f32_or => f32;
        /// Read a field as `f64`.
        get_f64, get_f64_or => f64;
        /// Read a field as `char`.
        get_char, get_char_or => char;
    }

    reference_accessors! {
        /// Read a field as text.
        get_string, get_string_or => String;
        /// Read a field as an arbitrary-precision decimal.
        get_decimal, get_decimal_or => Decimal;
        /// Read a field as a UTC date-time.
        get_date, get_date_or => DateTime<Utc>;
    }

    /// Read a textual field as a date using a `chrono` format string.
    ///
    /// Patterns without a time component yield midnight UTC.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Conversion`] when the text does not match
    /// `pattern`.
    pub fn get_date_with_pattern<'a>(
        &self,
        field: impl Into<Field<'a>>,
        pattern: &str,
    ) -> Result<Option<DateTime<Utc>>, EnvelopeError> {
        let field = field.into();
        let Some(text) = self.get_string(field)? else {
            return Ok(None);
        };
        let parsed = NaiveDateTime::parse_from_str(&text, pattern).or_else(|_| {
            NaiveDate::parse_from_str(&text, pattern).map(|d| d.and_time(chrono::NaiveTime::MIN))
        });
        match parsed {
            Ok(naive) => Ok(Some(naive.and_utc())),
            Err(_) => Err(EnvelopeError::conversion(&Value::Text(text), "date")),
        }
    }

    #[must_use]
    pub fn get_date_with_pattern_or<'a>(
        &self,
        field: impl Into<Field<'a>>,
        pattern: &str,
        default: DateTime<Utc>,
    ) -> DateTime<Utc> {
        self.get_date_with_pattern(field, pattern)
            .ok()
            .flatten()
            .unwrap_or(default)
    }

    /// New envelope holding the entries accepted by `predicate`, in their
    /// original relative order.
    #[must_use]
    pub fn select(&self, mut predicate: impl FnMut(&str, &Value) -> bool) -> Self {
        let (names, values) = self
            .iter()
            .filter(|(n, v)| predicate(n, v))
            .map(|(n, v)| (n.to_string(), v.clone()))
            .unzip();
        Self::assemble(names, values)
    }

    /// New envelope holding only the first entry accepted by `predicate`
    /// (empty when nothing matches).
    #[must_use]
    pub fn select_first(&self, mut predicate: impl FnMut(&str, &Value) -> bool) -> Self {
        let (names, values) = self
            .iter()
            .find(|(n, v)| predicate(n, v))
            .map(|(n, v)| (n.to_string(), v.clone()))
            .into_iter()
            .unzip();
        Self::assemble(names, values)
    }

    /// External representation: field name → value plus the reserved
    /// `id` and `timestamp` keys.
    ///
    /// A field named like a reserved key is kept under that name with
    /// underscores prepended until it no longer collides (`id` becomes
    /// `_id`), so the reserved keys always carry the envelope's identity.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::with_capacity(self.len() + 2);
        for (name, value) in self.iter() {
            let json = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
            map.insert(name.to_string(), json);
        }
        for key in [ID_KEY, TIMESTAMP_KEY] {
            if let Some(shadowed) = map.remove(key) {
                let mut renamed = format!("_{key}");
                while map.contains_key(&renamed) {
                    renamed.insert(0, '_');
                }
                map.insert(renamed, shadowed);
            }
        }
        map.insert(ID_KEY.to_string(), self.id.to_string().into());
        map.insert(TIMESTAMP_KEY.to_string(), self.timestamp.to_rfc3339().into());
        serde_json::Value::Object(map)
    }
}

impl PartialEq for Envelope {
    fn eq(&self, other: &Self) -> bool {
        self.names == other.names && self.values == other.values
    }
}

impl Eq for Envelope {}

impl Hash for Envelope {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.names.hash(state);
        self.values.hash(state);
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values: Vec<String> = self.values.iter().map(ToString::to_string).collect();
        write!(
            f,
            "Envelope [names=[{}], values=[{}], id={}, timestamp={}]",
            self.names.join(", "),
            values.join(", "),
            self.id,
            self.timestamp.to_rfc3339()
        )
    }
}

impl Serialize for Envelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// Accumulates fields, then finalizes into an immutable [`Envelope`].
#[derive(Debug, Clone, Default)]
#[must_use]
pub struct EnvelopeBuilder {
    names: Vec<String>,
    values: Vec<Value>,
}

impl EnvelopeBuilder {
    /// Append a field. A repeated name is reported by [`build`](Self::build).
    pub fn put(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.names.push(name.into());
        self.values.push(value.into());
        self
    }

    /// Replace the value of an existing field, or append it when absent.
    pub fn set(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let name = name.into();
        match self.names.iter().position(|n| *n == name) {
            Some(i) => self.values[i] = value.into(),
            None => {
                self.names.push(name);
                self.values.push(value.into());
            }
        }
        self
    }

    /// # Errors
    ///
    /// Returns [`EnvelopeError::Argument`] if a name was put twice.
    pub fn build(self) -> Result<Envelope, EnvelopeError> {
        Envelope::checked(self.names, self.values)
    }
}

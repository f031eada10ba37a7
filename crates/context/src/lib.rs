#![deny(
    trivial_numeric_casts,
    missing_docs,
    unsafe_code,
    unstable_features,
    unused_import_braces,
    unused_qualifications,
    unused_extern_crates,
    unused_results
)]
#![warn(rust_2021_compatibility, unreachable_pub)]

//! A context is a set of key-value pairs travelling alongside an event
//! through a pipeline. Every pipeline holds a base context that seeds the
//! context of each incoming event; processors mutate their event's copy
//! freely, and generator expansion hands every sub-event a fresh copy.

use std::collections::HashMap;

/// Values that can be stored under a key of a [`Context`].
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum Value {
    /// A boolean value
    Bool(bool),
    /// A u64 value
    U64(u64),
    /// A i64 value
    I64(i64),
    /// A f64 value
    F64(f64),
    /// A string value
    String(String),
}

/// A per-event map of key-value pairs.
///
/// Contexts are cheap to clone on purpose: the runtime clones them on
/// event entry and once more per generator sub-event.
#[derive(Debug, Clone, Default)]
pub struct Context {
    values: HashMap<String, Value>,
}

impl Context {
    /// Creates a new empty context
    pub fn new() -> Self {
        Default::default()
    }

    /// Adds a new value to the context
    pub fn set(&mut self, key: &str, value: Value) {
        let _ = self.values.insert(key.to_string(), value);
    }

    /// Gets a value from the context
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Gets a value from the context or returns a default value if the key
    /// is not present or not convertible
    pub fn get_value<V: TryFrom<Value>>(&self, key: &str, default: V) -> V {
        match self.get(key) {
            Some(v) => V::try_from(v.clone()).unwrap_or(default),
            None => default,
        }
    }

    /// Merges the entries of `base` into this context. Entries of `base`
    /// overwrite entries of this context that share the same key.
    pub fn merge_from(&mut self, base: &Context) {
        for (key, value) in &base.values {
            let _ = self.values.insert(key.clone(), value.clone());
        }
    }

    /// Returns the number of entries in the context
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if the context holds no entry
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates over the entries of the context
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }
}

/// A generic error for all the following TryFrom implementations
pub struct TryFromError {}

macro_rules! impl_try_from_value_for_uint {
    ($($ty:ty),*) => {
        $(
            impl TryFrom<Value> for $ty {
                type Error = TryFromError;

                fn try_from(value: Value) -> Result<Self, Self::Error> {
                    match value {
                        Value::U64(v) => <$ty>::try_from(v).map_err(|_| TryFromError {}),
                        Value::I64(v) => <$ty>::try_from(v).map_err(|_| TryFromError {}),
                        _ => Err(TryFromError {}),
                    }
                }
            }
        )*
    };
}

macro_rules! impl_try_from_value_for_float {
    ($($ty:ty),*) => {
        $(
            #[allow(trivial_numeric_casts)]
            impl TryFrom<Value> for $ty {
                type Error = TryFromError;

                fn try_from(value: Value) -> Result<Self, Self::Error> {
                    match value {
                        Value::U64(v) => Ok(v as $ty),
                        Value::I64(v) => Ok(v as $ty),
                        Value::F64(v) => Ok(v as $ty),
                        _ => Err(TryFromError {}),
                    }
                }
            }
        )*
    };
}

impl_try_from_value_for_uint!(u16, u32, u64, i16, i32, i64);
impl_try_from_value_for_float!(f32, f64);

impl TryFrom<Value> for bool {
    type Error = TryFromError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Bool(v) => Ok(v),
            Value::String(v) => match v.to_lowercase().as_str() {
                "true" => Ok(true),
                "false" => Ok(false),
                _ => Err(TryFromError {}),
            },
            _ => Err(TryFromError {}),
        }
    }
}

impl TryFrom<Value> for String {
    type Error = TryFromError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::U64(v) => Ok(v.to_string()),
            Value::I64(v) => Ok(v.to_string()),
            Value::F64(v) => Ok(v.to_string()),
            Value::Bool(v) => Ok(v.to_string()),
            Value::String(v) => Ok(v),
        }
    }
}

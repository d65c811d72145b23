//! Heterogeneous operator options.
//!
//! Both `builtin_options` and `custom_options` are string-keyed maps whose
//! values are booleans, integers, floats, strings, or ordered sequences
//! thereof. Passes store structured parameters here (padding plans, thread
//! counts) that later passes and the runtime read back exactly, so the map
//! must survive the codec byte-for-byte. A `BTreeMap` keeps iteration
//! order deterministic, which keeps re-encodes byte-stable.

use std::collections::BTreeMap;

pub type Options = BTreeMap<String, OptionValue>;

#[derive(Clone, Debug, PartialEq)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Seq(Vec<OptionValue>),
}

impl OptionValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            OptionValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            OptionValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Interpret a sequence value as a list of integers.
    pub fn as_int_seq(&self) -> Option<Vec<i64>> {
        match self {
            OptionValue::Seq(items) => items.iter().map(OptionValue::as_int).collect(),
            _ => None,
        }
    }

    /// Build a sequence value from integers.
    pub fn int_seq(values: impl IntoIterator<Item = i64>) -> Self {
        OptionValue::Seq(values.into_iter().map(OptionValue::Int).collect())
    }
}

impl From<bool> for OptionValue {
    fn from(v: bool) -> Self {
        OptionValue::Bool(v)
    }
}

impl From<i64> for OptionValue {
    fn from(v: i64) -> Self {
        OptionValue::Int(v)
    }
}

impl From<f64> for OptionValue {
    fn from(v: f64) -> Self {
        OptionValue::Float(v)
    }
}

impl From<&str> for OptionValue {
    fn from(v: &str) -> Self {
        OptionValue::Str(v.to_string())
    }
}

//! Response records.
//!
//! A response line holds one or more records separated by `|`. Each record
//! is a run of space separated `key=value` tokens; a token without `=` is a
//! boolean field set to true.

use crate::escape::unescape;
use crate::RECORD_SEPARATOR;
use serde::{Serialize, Serializer};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

/// A decoded field value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Str(String),
    Bool(bool),
}

impl Value {
    /// Coerces an unescaped value: an all-digit string (optionally signed)
    /// becomes an integer, anything else stays a string.
    pub fn coerce(raw: String) -> Self {
        if is_integer(&raw) {
            if let Ok(n) = raw.parse::<i64>() {
                return Value::Int(n);
            }
        }
        Value::Str(raw)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(n) => Some(*n != 0),
            Value::Str(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{}", n),
            Value::Str(s) => write!(f, "{}", s),
            Value::Bool(b) => write!(f, "{}", b),
        }
    }
}

fn is_integer(s: &str) -> bool {
    let digits = s.strip_prefix(['-', '+']).unwrap_or(s);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// One entity returned by the server.
#[derive(Debug, Clone, Default)]
pub struct Record {
    fields: BTreeMap<String, Value>,
    /// Received text of integer fields that do not print back the same
    /// (`0123`, `+3`).
    raw: BTreeMap<String, String>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        let key = key.into();
        self.raw.remove(&key);
        self.fields.insert(key, value)
    }

    /// Inserts unescaped wire text, coercing integers but remembering the
    /// original text when coercion would change it.
    fn insert_text(&mut self, key: &str, text: String) {
        let value = Value::coerce(text.clone());
        let lossy = matches!(&value, Value::Int(n) if n.to_string() != text);
        self.insert(key, value);
        if lossy {
            self.raw.insert(key.to_string(), text);
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Returns a field as a string slice (string fields only).
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Returns a field as an integer (integer fields only).
    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_int)
    }

    /// Returns a field's text as received, without integer coercion.
    /// Flag fields carry no text and return `None`.
    pub fn get_raw(&self, key: &str) -> Option<Cow<'_, str>> {
        if let Some(text) = self.raw.get(key) {
            return Some(Cow::Borrowed(text.as_str()));
        }
        match self.fields.get(key)? {
            Value::Int(n) => Some(Cow::Owned(n.to_string())),
            Value::Str(s) => Some(Cow::Borrowed(s.as_str())),
            Value::Bool(_) => None,
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

impl Eq for Record {}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.fields.serialize(serializer)
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            raw: BTreeMap::new(),
        }
    }
}

/// Parses a single record (no `|` handling).
pub fn parse_record(text: &str) -> Record {
    let mut record = Record::new();
    for token in text.split(' ').filter(|t| !t.is_empty()) {
        match token.split_once('=') {
            Some((key, raw)) => record.insert_text(key, unescape(raw)),
            None => {
                record.insert(token, Value::Bool(true));
            }
        }
    }
    record
}

/// Parses a response line into its records. Empty records are dropped.
pub fn parse_records(line: &str) -> Vec<Record> {
    line.split(RECORD_SEPARATOR)
        .map(parse_record)
        .filter(|r| !r.is_empty())
        .collect()
}

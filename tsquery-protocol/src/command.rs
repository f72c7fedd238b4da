//! Command building and encoding.

use crate::error::ProtocolError;
use crate::escape::escape;
use crate::RECORD_SEPARATOR;
use std::fmt;

/// Value of a command option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgValue {
    Single(String),
    /// Expanded into `key=a|key=b|...` (multi-option).
    List(Vec<String>),
}

impl From<&str> for ArgValue {
    fn from(v: &str) -> Self {
        ArgValue::Single(v.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(v: String) -> Self {
        ArgValue::Single(v)
    }
}

impl From<&String> for ArgValue {
    fn from(v: &String) -> Self {
        ArgValue::Single(v.clone())
    }
}

impl From<bool> for ArgValue {
    fn from(v: bool) -> Self {
        ArgValue::Single(if v { "1" } else { "0" }.to_string())
    }
}

macro_rules! impl_from_int {
    ($($t:ty),*) => {
        $(
            impl From<$t> for ArgValue {
                fn from(v: $t) -> Self {
                    ArgValue::Single(v.to_string())
                }
            }
        )*
    };
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32, u64, usize);

impl<T: ToString> From<Vec<T>> for ArgValue {
    fn from(v: Vec<T>) -> Self {
        ArgValue::List(v.iter().map(ToString::to_string).collect())
    }
}

impl<T: ToString> From<&[T]> for ArgValue {
    fn from(v: &[T]) -> Self {
        ArgValue::List(v.iter().map(ToString::to_string).collect())
    }
}

/// A query command: name, options, multi-option groups and flags.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Command {
    name: String,
    args: Vec<(String, ArgValue)>,
    groups: Vec<Vec<(String, String)>>,
    flags: Vec<String>,
}

impl Command {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Adds an option. A list value is expanded into a multi-option.
    pub fn arg(mut self, key: impl Into<String>, value: impl Into<ArgValue>) -> Self {
        self.args.push((key.into(), value.into()));
        self
    }

    /// Adds an option only when a value is present.
    pub fn arg_opt<V: Into<ArgValue>>(self, key: impl Into<String>, value: Option<V>) -> Self {
        match value {
            Some(v) => self.arg(key, v),
            None => self,
        }
    }

    /// Adds one multi-option group (`k=v k2=v2`), joined to other groups by `|`.
    pub fn group<K, V, I>(mut self, pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<ArgValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        let group = pairs
            .into_iter()
            .filter_map(|(k, v)| match v.into() {
                ArgValue::Single(s) => Some((k.into(), s)),
                ArgValue::List(_) => None,
            })
            .collect::<Vec<_>>();
        if !group.is_empty() {
            self.groups.push(group);
        }
        self
    }

    /// Adds a `-flag` switch.
    pub fn flag(mut self, flag: impl Into<String>) -> Self {
        let flag = flag.into();
        let flag = flag.trim_start_matches('-').to_string();
        if !flag.is_empty() && !self.flags.contains(&flag) {
            self.flags.push(flag);
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flags(&self) -> &[String] {
        &self.flags
    }

    /// Checks that the command can be put on the wire.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.name.is_empty() {
            return Err(ProtocolError::InvalidCommand("empty command name".to_string()));
        }
        if self
            .name
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || c == RECORD_SEPARATOR)
        {
            return Err(ProtocolError::InvalidCommand(format!(
                "command name contains reserved characters: {:?}",
                self.name
            )));
        }
        for key in self
            .args
            .iter()
            .map(|(k, _)| k)
            .chain(self.groups.iter().flatten().map(|(k, _)| k))
        {
            if key.is_empty() || key.contains(['=', ' ', RECORD_SEPARATOR]) {
                return Err(ProtocolError::InvalidCommand(format!(
                    "invalid option key: {:?}",
                    key
                )));
            }
        }
        Ok(())
    }

    /// Encodes the command as one wire line (without terminator).
    pub fn encode(&self) -> String {
        let mut parts: Vec<String> = Vec::with_capacity(1 + self.args.len() + self.flags.len());
        parts.push(self.name.clone());

        for (key, value) in &self.args {
            match value {
                ArgValue::Single(v) => parts.push(format!("{}={}", key, escape(v))),
                ArgValue::List(values) if values.is_empty() => {}
                ArgValue::List(values) => parts.push(
                    values
                        .iter()
                        .map(|v| format!("{}={}", key, escape(v)))
                        .collect::<Vec<_>>()
                        .join(&RECORD_SEPARATOR.to_string()),
                ),
            }
        }

        if !self.groups.is_empty() {
            parts.push(
                self.groups
                    .iter()
                    .map(|group| {
                        group
                            .iter()
                            .map(|(k, v)| format!("{}={}", k, escape(v)))
                            .collect::<Vec<_>>()
                            .join(" ")
                    })
                    .collect::<Vec<_>>()
                    .join(&RECORD_SEPARATOR.to_string()),
            );
        }

        for flag in &self.flags {
            parts.push(format!("-{}", flag));
        }

        parts.join(" ")
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

//! Status lines.
//!
//! Every command is answered by exactly one status line of the form
//! `error id=<int> msg=<escaped> [extra_msg=..] [failed_permid=..]`.
//! Id `0` means success.

use crate::error::ProtocolError;
use crate::record::{parse_record, Value};
use crate::STATUS_MARKER;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Status id for success.
pub const OK: u32 = 0;

/// Status id the server uses for flood control.
pub const FLOOD: u32 = 524;

/// Status id for "database empty result set".
pub const EMPTY_RESULT: u32 = 1281;

/// Status id for missing permissions.
pub const PERMISSION_DENIED: u32 = 2568;

/// Cooldown applied when a flood message carries no number.
const DEFAULT_FLOOD_COOLDOWN_SECS: u64 = 1;

/// Upper bound on any cooldown the server asks for.
pub const MAX_FLOOD_COOLDOWN_SECS: u64 = 3600;

/// Parsed status line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("query error {id}: {message}")]
pub struct QueryError {
    pub id: u32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_permid: Option<u32>,
}

impl QueryError {
    pub fn new(id: u32, message: impl Into<String>) -> Self {
        Self {
            id,
            message: message.into(),
            extra_message: None,
            failed_permid: None,
        }
    }

    /// Parses a status line.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let rest = line
            .strip_prefix(STATUS_MARKER)
            .filter(|r| r.is_empty() || r.starts_with(' '))
            .ok_or_else(|| ProtocolError::NotAStatusLine(line.to_string()))?;

        let record = parse_record(rest);
        let id = match record.get("id") {
            Some(Value::Int(n)) => u32::try_from(*n).map_err(|_| ProtocolError::InvalidField {
                field: "id",
                value: n.to_string(),
            })?,
            Some(other) => {
                return Err(ProtocolError::InvalidField {
                    field: "id",
                    value: other.to_string(),
                })
            }
            None => return Err(ProtocolError::MissingField("id")),
        };

        Ok(Self {
            id,
            message: record.get("msg").map(|v| v.to_string()).unwrap_or_default(),
            extra_message: record.get("extra_msg").map(|v| v.to_string()),
            failed_permid: record
                .get_int("failed_permid")
                .and_then(|n| u32::try_from(n).ok()),
        })
    }

    /// Returns whether the status reports success.
    pub fn is_ok(&self) -> bool {
        self.id == OK
    }

    /// Returns whether the server is asking the client to back off.
    pub fn is_flood(&self) -> bool {
        self.id == FLOOD
    }

    /// Returns whether the command succeeded but matched nothing.
    pub fn is_empty_result(&self) -> bool {
        self.id == EMPTY_RESULT
    }

    /// Cooldown the server asks for, taken from the first `<n> second`
    /// phrase of the message, then of the extra message. Capped at
    /// [`MAX_FLOOD_COOLDOWN_SECS`].
    pub fn flood_cooldown(&self) -> Duration {
        let secs = cooldown_secs(&self.message)
            .or_else(|| self.extra_message.as_deref().and_then(cooldown_secs))
            .unwrap_or(DEFAULT_FLOOD_COOLDOWN_SECS);
        Duration::from_secs(secs)
    }
}

fn cooldown_secs(message: &str) -> Option<u64> {
    let lower = message.to_ascii_lowercase();
    let mut search = 0;
    while let Some(pos) = lower[search..].find("second") {
        let at = search + pos;
        let head = lower[..at].trim_end();
        let digits: String = head
            .chars()
            .rev()
            .take_while(|c| c.is_ascii_digit())
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        if !digits.is_empty() {
            // too many digits for u64 still means "a long time"
            let n = digits.parse::<u64>().unwrap_or(u64::MAX);
            if n > 0 {
                return Some(n.min(MAX_FLOOD_COOLDOWN_SECS));
            }
        }
        search = at + "second".len();
    }
    None
}

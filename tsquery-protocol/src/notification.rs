//! Notification lines.

use crate::error::ProtocolError;
use crate::record::{parse_records, Record};
use crate::NOTIFY_MARKER;
use serde::Serialize;

/// Notification families the server is known to emit twice in a row.
pub const DUPLICATED_EVENTS: [&str; 3] = [
    "notifycliententerview",
    "notifyclientleftview",
    "notifyclientmoved",
];

/// Returns whether a raw notification line belongs to a family that is
/// subject to duplicate suppression.
pub fn is_duplicate_prone(line: &str) -> bool {
    DUPLICATED_EVENTS.iter().any(|prefix| line.starts_with(prefix))
}

/// An asynchronous event reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    /// Event name without the `notify` prefix, e.g. `cliententerview`.
    pub name: String,
    pub record: Record,
}

impl Notification {
    /// Parses a `notify<name> key=value ...` line.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let rest = line
            .strip_prefix(NOTIFY_MARKER)
            .ok_or_else(|| ProtocolError::NotANotification(line.to_string()))?;

        let (name, body) = rest.split_once(' ').unwrap_or((rest, ""));
        if name.is_empty() {
            return Err(ProtocolError::NotANotification(line.to_string()));
        }

        let record = parse_records(body).into_iter().next().unwrap_or_default();
        Ok(Self {
            name: name.to_string(),
            record,
        })
    }
}

//! # tsquery-protocol
//!
//! Wire codec for the ServerQuery administration protocol.
//!
//! This crate provides:
//! - The value escape table shared by commands, responses and notifications
//! - `Command` building and encoding (options, multi-option groups, flags)
//! - Response record decoding into typed `Record`s
//! - Status (`error id=.. msg=..`) and notification line parsing
//! - Line reassembly over arbitrary segment boundaries
//!
//! Nothing here performs I/O.

pub mod codec;
pub mod command;
pub mod error;
pub mod escape;
pub mod notification;
pub mod record;
pub mod status;

pub use codec::LineDecoder;
pub use command::{ArgValue, Command};
pub use error::ProtocolError;
pub use escape::{escape, unescape};
pub use notification::Notification;
pub use record::{parse_record, parse_records, Record, Value};
pub use status::QueryError;

/// Default port of the plain-text query interface.
pub const DEFAULT_RAW_PORT: u16 = 10011;

/// Default port of the SSH query interface.
pub const DEFAULT_SSH_PORT: u16 = 10022;

/// Default port of the file transfer interface.
pub const DEFAULT_FILE_TRANSFER_PORT: u16 = 30033;

/// Terminator appended to every line the client writes.
pub const LINE_TERMINATOR: &str = "\n";

/// Separates records in a response line and groups in a multi-option command.
pub const RECORD_SEPARATOR: char = '|';

/// First token of the status line that terminates every response.
pub const STATUS_MARKER: &str = "error";

/// Prefix of asynchronous notification lines.
pub const NOTIFY_MARKER: &str = "notify";

/// Payload of the keep-alive frame (written followed by the terminator).
pub const KEEP_ALIVE_FRAME: &str = " ";

/// Number of greeting lines the server sends after connect.
pub const DEFAULT_BANNER_LINES: usize = 2;

/// Maximum accepted line length (16 MiB).
pub const MAX_LINE_LENGTH: usize = 16 * 1024 * 1024;

/// Returns whether a line is a status line (`error ...`).
pub fn is_status_line(line: &str) -> bool {
    line == STATUS_MARKER
        || line
            .strip_prefix(STATUS_MARKER)
            .is_some_and(|rest| rest.starts_with(' '))
}

/// Returns whether a line is a notification line (`notify...`).
pub fn is_notification_line(line: &str) -> bool {
    line.starts_with(NOTIFY_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_classification() {
        assert!(is_status_line("error id=0 msg=ok"));
        assert!(is_status_line("error"));
        assert!(!is_status_line("errors=3"));
        assert!(!is_status_line("virtualserver_status=online"));

        assert!(is_notification_line("notifycliententerview cfid=0"));
        assert!(!is_notification_line("error id=0 msg=ok"));
    }
}

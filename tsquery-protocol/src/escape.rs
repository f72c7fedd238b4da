//! Value escaping.
//!
//! Every option value, record value and status message travels through this
//! table. Each reserved character maps to a two-character sequence starting
//! with a backslash:
//!
//! ```text
//! \     \\        BEL   \a
//! /     \/        BS    \b
//! space \s        FF    \f
//! |     \p        LF    \n
//!                 CR    \r
//!                 TAB   \t
//!                 VT    \v
//! ```

/// Returns the escape letter for a reserved character.
fn escape_char(c: char) -> Option<char> {
    match c {
        '\\' => Some('\\'),
        '/' => Some('/'),
        ' ' => Some('s'),
        '|' => Some('p'),
        '\u{07}' => Some('a'),
        '\u{08}' => Some('b'),
        '\u{0C}' => Some('f'),
        '\n' => Some('n'),
        '\r' => Some('r'),
        '\t' => Some('t'),
        '\u{0B}' => Some('v'),
        _ => None,
    }
}

/// Inverse of [`escape_char`].
fn unescape_char(c: char) -> Option<char> {
    match c {
        '\\' => Some('\\'),
        '/' => Some('/'),
        's' => Some(' '),
        'p' => Some('|'),
        'a' => Some('\u{07}'),
        'b' => Some('\u{08}'),
        'f' => Some('\u{0C}'),
        'n' => Some('\n'),
        'r' => Some('\r'),
        't' => Some('\t'),
        'v' => Some('\u{0B}'),
        _ => None,
    }
}

/// Escapes a value for the wire.
pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match escape_char(c) {
            Some(e) => {
                out.push('\\');
                out.push(e);
            }
            None => out.push(c),
        }
    }
    out
}

/// Reverses [`escape`].
///
/// Unknown sequences and a trailing lone backslash are kept verbatim.
pub fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(next) => match unescape_char(next) {
                Some(u) => out.push(u),
                None => {
                    out.push('\\');
                    out.push(next);
                }
            },
            None => out.push('\\'),
        }
    }
    out
}

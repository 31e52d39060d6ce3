//! Source positions, shared by the lexer, parser, and diagnostics.

use std::fmt;

/// A line/column position in the original source text.
///
/// Both fields are 1-based, matching the convention most editors and
/// compilers use when reporting diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, serde::Serialize, serde::Deserialize)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl Position {
    #[must_use]
    pub const fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }

    pub(crate) fn advance(&mut self, ch: char) {
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A half-open `[start, end)` byte range into the source, paired with the
/// line/column of its start for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, serde::Serialize, serde::Deserialize)]
pub struct Span {
    pub start_byte: u32,
    pub end_byte: u32,
    pub start: Position,
}

impl Span {
    #[must_use]
    pub const fn new(start_byte: u32, end_byte: u32, start: Position) -> Self {
        Self {
            start_byte,
            end_byte,
            start,
        }
    }

    /// A zero-width span at the origin, used for synthesized nodes (macro
    /// expansions, platform-profile-injected declarations) that have no
    /// direct source location.
    #[must_use]
    pub const fn synthetic() -> Self {
        Self {
            start_byte: 0,
            end_byte: 0,
            start: Position::new(0, 0),
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.start)
    }
}

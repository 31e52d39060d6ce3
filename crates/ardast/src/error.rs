//! Error taxonomy for the parser, preprocessor, and interpreter.
//!
//! Grounded on the teacher's `exception_private.rs`: closed enums with hand
//! written `Display`/`std::error::Error` impls rather than `thiserror`, kept
//! small enough to match one-to-one against a command's `errorType` field.

use std::fmt;

use crate::span::Span;

/// A diagnostic produced while lexing, preprocessing, or parsing.
///
/// Parse errors never abort parsing outright (see [`crate::ast::Node::Error`]
/// and the parser's recovery strategy) — they are collected and surfaced
/// either as `ErrorNode`s in the tree or as preprocessor diagnostics on the
/// side channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    pub span: Span,
}

impl ParseError {
    #[must_use]
    pub fn new(kind: ParseErrorKind, message: impl Into<String>, span: Span) -> Self {
        Self {
            kind,
            message: message.into(),
            span,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} at {}: {}", self.kind, self.span, self.message)
    }
}

impl std::error::Error for ParseError {}

/// Which stage of the front end produced a [`ParseError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// An unrecognized character sequence (the lexer still produces an
    /// `ErrorToken` and continues).
    Lex,
    /// A malformed preprocessor directive (unterminated `#if`, a function
    /// macro invoked without matching parentheses, etc).
    Preprocess,
    /// A syntax error recovered into an `ErrorNode`.
    Syntax,
}

/// The error taxonomy from spec §7, used to tag runtime failures with an
/// `errorType` suitable for an `ERROR` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Lex/parse/preprocessor error surfacing from an executed `ErrorNode`.
    SourceError,
    /// Unknown identifier, unknown function, or arity mismatch.
    LinkError,
    /// Arithmetic, cast, bounds, or null/undefined runtime fault.
    RuntimeError,
    /// Unknown library, unknown method, or bad argument to a library call.
    LibraryError,
    /// Request timeout or a response error reported by the host.
    IoError,
    /// Loop-iteration cap, recursion cap, or memory cap reached.
    LimitError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SourceError => "SourceError",
            Self::LinkError => "LinkError",
            Self::RuntimeError => "RuntimeError",
            Self::LibraryError => "LibraryError",
            Self::IoError => "IOError",
            Self::LimitError => "LimitError",
        };
        f.write_str(name)
    }
}

/// A runtime error raised during interpretation.
///
/// Every `InterpError` converts losslessly into an `ERROR` command
/// (`{message, errorType}`, spec §6.3/§7) at the nearest emission boundary;
/// see [`crate::interpreter::Interpreter::emit_error`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpError {
    pub kind: ErrorKind,
    pub message: String,
}

impl InterpError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn source(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SourceError, message)
    }

    #[must_use]
    pub fn link(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::LinkError, message)
    }

    #[must_use]
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RuntimeError, message)
    }

    #[must_use]
    pub fn library(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::LibraryError, message)
    }

    #[must_use]
    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::IoError, message)
    }

    #[must_use]
    pub fn limit(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::LimitError, message)
    }
}

impl fmt::Display for InterpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for InterpError {}

/// Result alias used throughout statement/expression evaluation.
pub type EvalResult<T> = Result<T, InterpError>;

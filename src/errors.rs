//! Compiler diagnostics.
//!
//! A plain enum with manual `Display`/`Error` impls, matching the only hand-rolled
//! error type seen anywhere in the teacher workspace (`codegen/error.rs`); no
//! `thiserror` or `anyhow` appears anywhere in that workspace, so none is introduced here.

use std::fmt;

use crate::ast::SourceSpan;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UnresolvedName,
    TypeMismatch,
    InvalidArrayBound,
    DuplicateMember,
    NotAnLValue,
    NonIntegerCondition,
    ArityMismatch,
    DisallowedByValue,
    MiscSemantic,
    Lexical,
    Syntax,
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::UnresolvedName => "unresolved name",
            ErrorKind::TypeMismatch => "type mismatch",
            ErrorKind::InvalidArrayBound => "invalid array bound",
            ErrorKind::DuplicateMember => "duplicate member",
            ErrorKind::NotAnLValue => "not an l-value",
            ErrorKind::NonIntegerCondition => "non-integer condition",
            ErrorKind::ArityMismatch => "arity mismatch",
            ErrorKind::DisallowedByValue => "disallowed by-value",
            ErrorKind::MiscSemantic => "semantic error",
            ErrorKind::Lexical => "lexical error",
            ErrorKind::Syntax => "syntax error",
            ErrorKind::Io => "i/o error",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompileError {
    pub kind: ErrorKind,
    pub message: String,
    pub span: Option<SourceSpan>,
}

impl CompileError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        CompileError {
            kind,
            message: message.into(),
            span: None,
        }
    }

    pub fn at(kind: ErrorKind, message: impl Into<String>, span: SourceSpan) -> Self {
        CompileError {
            kind,
            message: message.into(),
            span: Some(span),
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.span {
            Some(span) => write!(
                f,
                "{}:{}: {}: {}",
                span.line, span.column, self.kind, self.message
            ),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for CompileError {}

impl From<std::io::Error> for CompileError {
    fn from(err: std::io::Error) -> Self {
        CompileError::new(ErrorKind::Io, err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CompileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_without_span_omits_position() {
        let err = CompileError::new(ErrorKind::UnresolvedName, "unknown identifier `x`");
        assert_eq!(err.to_string(), "unresolved name: unknown identifier `x`");
    }

    #[test]
    fn display_with_span_includes_position() {
        let err = CompileError::at(
            ErrorKind::ArityMismatch,
            "expected 2 arguments, got 1",
            SourceSpan::new(4, 9),
        );
        assert_eq!(
            err.to_string(),
            "4:9: arity mismatch: expected 2 arguments, got 1"
        );
    }

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: CompileError = io_err.into();
        assert_eq!(err.kind, ErrorKind::Io);
    }
}

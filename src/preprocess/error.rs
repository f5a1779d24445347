use std::path::PathBuf;

use thiserror::Error;

use crate::language::ResolutionError;

/// Directive errors are non-exhaustive and may have new variants added at any time
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum DirectiveError {
    /// A `define` whose name is neither a plain identifier
    /// nor `name(param, ...)` function-macro syntax.
    #[error("define with invalid name '{0}'")]
    BadDefineName(String),

    /// An `else` or `elseif` reached in normal flow. The matching
    /// conditional either never opened or already took its branch.
    #[error("unmatched #{0}")]
    UnmatchedConditional(String),

    /// An `endif` was present but no conditional was open.
    #[error("unmatched endif")]
    UnexpectedEndIf,

    /// The file ended while skipping a false conditional.
    #[error("hit end of file while in #if from line {0}")]
    UnterminatedIf(usize),

    /// The file ended with conditionals still open.
    #[error("end of file with {0} unterminated conditional block(s)")]
    UnterminatedAtEof(usize),

    /// A function macro name appeared without a call.
    #[error("macro function call '{0}' not followed by '('")]
    MissingCallParen(String),

    #[error("wrong argument count for '{name}': expected {expected}, got {got}")]
    ArgumentCount {
        name: String,
        expected: usize,
        got: usize,
    },

    /// A continuation line under a comment-prefixed lead did not
    /// itself carry the comment marker.
    #[error("multiline directive continuation missing leading '{0}'")]
    MissingContinuationPrefix(String),
}

/// Inclusion errors are non-exhaustive and may have new variants added at any time
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum IncludeError {
    #[error("file not found")]
    FileNotFound,

    // io::Error does not derive Clone or PartialEq, keep the message
    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for IncludeError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            IncludeError::FileNotFound
        } else {
            IncludeError::Io(err.to_string())
        }
    }
}

/// A preprocessing failure. Every variant aborts the entire run; there is
/// no partial-success output. Directive errors carry the file and the true
/// line number (inserted lines discounted) they were raised at.
#[derive(Clone, Debug, Error, PartialEq)]
#[non_exhaustive]
pub enum PreProcError {
    #[error("{}[{line}]: {kind}", file.display())]
    Directive {
        file: PathBuf,
        line: usize,
        kind: DirectiveError,
    },

    #[error("cannot include '{}': {kind}", file.display())]
    Include { file: PathBuf, kind: IncludeError },

    #[error(transparent)]
    Resolution(#[from] ResolutionError),
}

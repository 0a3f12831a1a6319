use std::path::PathBuf;

use thiserror::Error;

use crate::data::model::SpikeField;

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

/// Failures of the file-backed spike store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The file is missing, unreadable, or not a valid spike table.
    #[error("cannot open spike table {}: {reason}", path.display())]
    Open { path: PathBuf, reason: String },

    /// The store (or the store a record came from) has been closed.
    #[error("spike table is closed")]
    Closed,

    #[error("spike index {index} out of range (table holds {count} spikes)")]
    IndexOutOfRange { index: usize, count: usize },

    /// A single cell could not be decoded, or its shape disagrees with the header.
    #[error("failed to read `{field}` of spike {index}: {reason}")]
    Read {
        index: usize,
        field: SpikeField,
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Predicate errors
// ---------------------------------------------------------------------------

/// Runtime failures while evaluating a compiled predicate against one record.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("type error: {0}")]
    Type(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("shape mismatch: {lhs:?} vs {rhs:?}")]
    ShapeMismatch { lhs: Vec<usize>, rhs: Vec<usize> },

    #[error("index {index} is out of bounds for axis of length {len}")]
    IndexOutOfBounds { index: i64, len: usize },

    #[error("too many indices: value has {ndim} dimension(s), {given} given")]
    TooManyIndices { ndim: usize, given: usize },

    #[error("`{0}` is not callable")]
    NotCallable(String),

    #[error("`{0}` is a function and must be called")]
    NotAValue(String),

    #[error("{function}() expects {expected}, got {found} argument(s)")]
    Arity {
        function: String,
        expected: &'static str,
        found: usize,
    },

    #[error("{0}() of an empty array")]
    EmptyReduction(String),

    #[error("the truth value of an array is ambiguous, use any() or all()")]
    AmbiguousTruth,
}

/// Everything that can go wrong turning filter text into a per-record verdict.
#[derive(Debug, Error)]
pub enum PredicateError {
    #[error("syntax error in `{expression}` at offset {offset}: {message}")]
    Syntax {
        expression: String,
        offset: usize,
        message: String,
    },

    /// The expression names something that is neither a record field nor a helper.
    #[error("name `{name}` is not defined")]
    UnboundName { expression: String, name: String },

    #[error("evaluating `{expression}` on spike {index} failed: {source}")]
    Evaluation {
        expression: String,
        index: usize,
        #[source]
        source: EvalError,
    },

    /// A field needed by the expression could not be fetched from the store.
    #[error("fetching fields for `{expression}` on spike {index} failed: {source}")]
    Fetch {
        expression: String,
        index: usize,
        #[source]
        source: StoreError,
    },
}

impl PredicateError {
    /// The expression text the error refers to.
    pub fn expression(&self) -> &str {
        match self {
            PredicateError::Syntax { expression, .. }
            | PredicateError::UnboundName { expression, .. }
            | PredicateError::Evaluation { expression, .. }
            | PredicateError::Fetch { expression, .. } => expression,
        }
    }

    /// The spike index being tested when the error happened, if any.
    pub fn spike_index(&self) -> Option<usize> {
        match self {
            PredicateError::Evaluation { index, .. } | PredicateError::Fetch { index, .. } => {
                Some(*index)
            }
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Selection errors
// ---------------------------------------------------------------------------

/// Failures surfaced by the selection engine.
#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("no spike table is loaded")]
    NoStore,

    #[error("position {position} out of range (selection holds {len} spikes)")]
    PositionOutOfRange { position: usize, len: usize },

    /// The active selection holds no spikes; display "no spikes match".
    #[error("no spikes match the current filter")]
    EmptySelection,

    #[error("filtering with `{expression}` was cancelled after {scanned} spikes")]
    FilterCancelled { expression: String, scanned: usize },

    #[error(transparent)]
    Predicate(#[from] PredicateError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type StoreResult<T> = Result<T, StoreError>;
pub type SelectionResult<T> = Result<T, SelectionError>;

//! Filter expressions over spike records.
//!
//! A filter is a boolean expression evaluated once per spike. Inside it,
//! these names are bound to the spike being tested:
//!
//! | name              | value                                              |
//! |-------------------|----------------------------------------------------|
//! | `time`            | spike time (number)                                |
//! | `channel_mask`    | `numchannels` flags, true = unmasked               |
//! | `wave`            | filtered waveform, `samples_per_spike x numchannels` |
//! | `unfiltered_wave` | raw waveform, `samples_per_spike x numchannels`    |
//! | `fet`             | features, `numchannels x features_per_channel`     |
//! | `fet_mask`        | `features_per_channel * numchannels + 1` flags     |
//!
//! plus the helpers of a [`HelperRegistry`] (`sum`, `mean`, `min`, `max`,
//! `ptp`, `abs`, `sqrt`, `len`, `any`, `all`, `count_nonzero`, `pi`, `e`,
//! `inf` by default). Example: `sum(channel_mask) > 5`.

pub mod ast;
pub mod eval;
pub mod helpers;
pub mod parser;

pub use ast::Expr;
pub use eval::{EvalResult, Predicate, Value};
pub use helpers::{Helper, HelperFn, HelperRegistry};
pub use parser::parse_predicate;

use crate::data::SpikeRecord;
use crate::error::PredicateError;

/// Compiles and evaluates filter expressions with one helper registry.
#[derive(Debug, Clone, Default)]
pub struct PredicateEvaluator {
    helpers: HelperRegistry,
}

impl PredicateEvaluator {
    pub fn new(helpers: HelperRegistry) -> Self {
        PredicateEvaluator { helpers }
    }

    pub fn helpers(&self) -> &HelperRegistry {
        &self.helpers
    }

    pub fn helpers_mut(&mut self) -> &mut HelperRegistry {
        &mut self.helpers
    }

    /// Parse and bind `expression`. `Ok(None)` means "no filter".
    pub fn compile(&self, expression: &str) -> Result<Option<Predicate>, PredicateError> {
        Predicate::compile(expression, &self.helpers)
    }

    /// Test one record against `expression`.
    ///
    /// An empty expression accepts every record. Compiling a filter once with
    /// [`compile`](Self::compile) is cheaper when testing many records.
    pub fn evaluate(&self, expression: &str, record: &SpikeRecord) -> Result<bool, PredicateError> {
        match self.compile(expression)? {
            Some(predicate) => predicate.matches(record),
            None => Ok(true),
        }
    }
}

//! Spike viewer core.
//!
//! Steps through the spikes of a file-backed spike table, narrowed by a
//! boolean filter expression over each spike's fields.
//!
//! ```text
//!   SpikeStore ──get(i)──▶ SpikeRecord
//!        │                     ▲
//!        ▼                     │ fields named by the filter
//!   SelectionEngine ──▶ PredicateEvaluator
//!        │
//!        ▼
//!   indices / position  ──▶ console view (app, ui)
//! ```

pub mod app;
pub mod data;
pub mod error;
pub mod predicate;
pub mod state;
pub mod ui;

pub use data::{
    write_spike_table, FilterProgress, SpikeData, SpikeDimensions, SpikeField, SpikeRecord,
    SpikeStore, StoreMetadata,
};
pub use error::{EvalError, PredicateError, SelectionError, StoreError};
pub use predicate::{HelperRegistry, Predicate, PredicateEvaluator, Value};
pub use state::{SelectionEngine, SelectionMode};

/// Data layer: spike tables, lazy record access, and predicate scans.
///
/// Architecture:
/// ```text
///   spikes.parquet   (header in schema metadata, one row per spike)
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  validate header / columns → SpikeTableFile
///   └──────────┘
///        │
///        ▼
///   ┌────────────┐
///   │ SpikeStore  │  count, metadata, get(i) → SpikeRecord (lazy)
///   └────────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  filter   │  Predicate over 0..count → matching indices
///   └──────────┘
/// ```
///
/// `writer` produces spike tables in the same format.

pub mod filter;
pub mod loader;
pub mod model;
pub mod store;
pub mod writer;

pub use filter::{filtered_indices, FilterProgress};
pub use model::{SpikeData, SpikeDimensions, SpikeField, StoreMetadata};
pub use store::{SpikeRecord, SpikeStore};
pub use writer::{write_spike_table, DEFAULT_ROW_GROUP_SIZE};

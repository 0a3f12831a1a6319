use std::ops::ControlFlow;
use std::path::Path;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::data::filter::{filtered_indices, FilterProgress};
use crate::data::{SpikeRecord, SpikeStore, StoreMetadata};
use crate::error::{SelectionError, SelectionResult, StoreError};
use crate::predicate::{HelperRegistry, PredicateEvaluator};

// ---------------------------------------------------------------------------
// Selection mode
// ---------------------------------------------------------------------------

/// Which spikes the engine is currently navigating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SelectionMode {
    /// No spike table is loaded.
    Empty,
    /// Every spike of the loaded table.
    Loaded,
    /// The spikes matching `expression`.
    Filtered { expression: String },
}

// ---------------------------------------------------------------------------
// Selection engine
// ---------------------------------------------------------------------------

/// Selection and navigation state, independent of any front end.
///
/// Holds the active store, the ordered list of selected spike indices and
/// the current position inside that list. Every failing operation leaves
/// the previous state untouched.
#[derive(Debug)]
pub struct SelectionEngine {
    /// Active spike table (None until a table is opened).
    store: Option<SpikeStore>,

    /// Compiles filter expressions.
    evaluator: PredicateEvaluator,

    /// Store indices in the current selection, ascending, no duplicates.
    indices: Vec<usize>,

    /// Current position in `indices`.
    position: usize,

    mode: SelectionMode,

    /// Display `wave` (true) or `unfiltered_wave` (false).
    show_filtered: bool,
}

impl Default for SelectionEngine {
    fn default() -> Self {
        Self::with_helpers(HelperRegistry::default())
    }
}

impl SelectionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// An engine whose filters can use `helpers`.
    pub fn with_helpers(helpers: HelperRegistry) -> Self {
        Self {
            store: None,
            evaluator: PredicateEvaluator::new(helpers),
            indices: Vec::new(),
            position: 0,
            mode: SelectionMode::Empty,
            show_filtered: true,
        }
    }

    /// Open the spike table at `path` and select all of its spikes.
    ///
    /// The current table is closed before the new one is opened, so two
    /// tables are never open at once. If opening fails the engine is left
    /// empty.
    pub fn open(&mut self, path: impl AsRef<Path>) -> SelectionResult<&StoreMetadata> {
        let path = path.as_ref();
        let readable = std::fs::metadata(path)
            .map_err(|e| e.to_string())
            .and_then(|md| {
                if md.is_file() {
                    Ok(())
                } else {
                    Err("not a regular file".to_string())
                }
            });
        if let Err(reason) = readable {
            log::warn!("Cannot open {}: {reason}", path.display());
            return Err(StoreError::Open {
                path: path.to_path_buf(),
                reason,
            }
            .into());
        }

        self.close();
        let store = SpikeStore::open(path).inspect_err(|e| log::warn!("{e}"))?;
        self.load(store)?;
        self.metadata().ok_or(SelectionError::NoStore)
    }

    /// Make `store` the active table and select all of its spikes.
    ///
    /// A different active table is closed first.
    pub fn load(&mut self, store: SpikeStore) -> SelectionResult<()> {
        if !store.is_open() {
            return Err(StoreError::Closed.into());
        }
        if let Some(old) = self.store.take() {
            if !SpikeStore::ptr_eq(&old, &store) {
                old.close();
            }
        }

        self.indices = (0..store.count()).collect();
        self.position = 0;
        self.mode = SelectionMode::Loaded;
        log::info!(
            "Loaded {} ({} spikes)",
            store.metadata().filename,
            store.count()
        );
        self.store = Some(store);
        Ok(())
    }

    /// Close the active table, if any.
    pub fn close(&mut self) {
        if let Some(store) = self.store.take() {
            store.close();
        }
        self.indices.clear();
        self.position = 0;
        self.mode = SelectionMode::Empty;
    }

    /// Replace the selection with the spikes matching `expression`.
    ///
    /// An empty expression selects every spike. On any error the previous
    /// selection and position are kept. Returns the new selection size.
    pub fn apply_filter(&mut self, expression: &str) -> SelectionResult<usize> {
        self.apply_filter_with_progress(expression, |_| ControlFlow::Continue(()))
    }

    /// [`apply_filter`](Self::apply_filter) with a progress callback that
    /// may cancel the scan.
    pub fn apply_filter_with_progress<F>(
        &mut self,
        expression: &str,
        on_progress: F,
    ) -> SelectionResult<usize>
    where
        F: FnMut(FilterProgress) -> ControlFlow<()>,
    {
        let store = self.store.as_ref().ok_or(SelectionError::NoStore)?;
        if !store.is_open() {
            return Err(StoreError::Closed.into());
        }

        let predicate = self.evaluator.compile(expression).inspect_err(|e| {
            log::warn!("Bad filter: {e}");
        })?;

        let Some(predicate) = predicate else {
            self.indices = (0..store.count()).collect();
            self.position = 0;
            self.mode = SelectionMode::Loaded;
            log::info!("Filter cleared ({} spikes)", self.indices.len());
            return Ok(self.indices.len());
        };

        let indices = filtered_indices(store, &predicate, on_progress).inspect_err(|e| {
            log::warn!("Filter `{}` failed: {e}", predicate.expression());
        })?;

        log::info!(
            "Filter `{}` matched {} of {} spikes",
            predicate.expression(),
            indices.len(),
            store.count()
        );
        self.indices = indices;
        self.position = 0;
        self.mode = SelectionMode::Filtered {
            expression: expression.trim().to_string(),
        };
        Ok(self.indices.len())
    }

    /// Select every spike of the active table again.
    pub fn clear_filter(&mut self) -> SelectionResult<usize> {
        self.apply_filter("")
    }

    /// Move to `position` in the selection.
    pub fn step_to(&mut self, position: usize) -> SelectionResult<()> {
        if position >= self.indices.len() {
            return Err(SelectionError::PositionOutOfRange {
                position,
                len: self.indices.len(),
            });
        }
        self.position = position;
        Ok(())
    }

    /// Move one spike forward. Returns false, without moving, at the last spike.
    pub fn step_forward(&mut self) -> SelectionResult<bool> {
        self.ensure_navigable()?;
        if self.position + 1 >= self.indices.len() {
            return Ok(false);
        }
        self.position += 1;
        Ok(true)
    }

    /// Move one spike back. Returns false, without moving, at the first spike.
    pub fn step_back(&mut self) -> SelectionResult<bool> {
        self.ensure_navigable()?;
        if self.position == 0 {
            return Ok(false);
        }
        self.position -= 1;
        Ok(true)
    }

    fn ensure_navigable(&self) -> SelectionResult<()> {
        if self.store.is_none() {
            return Err(SelectionError::NoStore);
        }
        if self.indices.is_empty() {
            return Err(SelectionError::EmptySelection);
        }
        Ok(())
    }

    /// Store index of the current spike.
    pub fn current_index(&self) -> SelectionResult<usize> {
        self.ensure_navigable()?;
        Ok(self.indices[self.position])
    }

    /// The spike at the current position.
    pub fn current_record(&self) -> SelectionResult<SpikeRecord> {
        let index = self.current_index()?;
        let store = self.store.as_ref().ok_or(SelectionError::NoStore)?;
        Ok(store.get(index)?)
    }

    /// Waveform of the current spike, filtered or not per the display toggle.
    pub fn current_waveform(&self) -> SelectionResult<Array2<f64>> {
        Ok(self.current_record()?.waveform(self.show_filtered)?)
    }

    pub fn set_waveform_filtering(&mut self, filtered: bool) {
        self.show_filtered = filtered;
    }

    pub fn waveform_filtering(&self) -> bool {
        self.show_filtered
    }

    pub fn selection_size(&self) -> usize {
        self.indices.len()
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn mode(&self) -> &SelectionMode {
        &self.mode
    }

    pub fn store(&self) -> Option<&SpikeStore> {
        self.store.as_ref()
    }

    pub fn metadata(&self) -> Option<&StoreMetadata> {
        self.store.as_ref().map(SpikeStore::metadata)
    }

    /// The expression behind the current selection, if it is filtered.
    pub fn active_filter(&self) -> Option<&str> {
        match &self.mode {
            SelectionMode::Filtered { expression } => Some(expression),
            _ => None,
        }
    }

    pub fn evaluator(&self) -> &PredicateEvaluator {
        &self.evaluator
    }

    /// Status bar text: the selection size while a table is loaded.
    pub fn status_line(&self) -> String {
        match self.store {
            Some(_) => format!("Total spikes: {}", self.indices.len()),
            None => String::new(),
        }
    }
}

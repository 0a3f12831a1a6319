use std::ops::ControlFlow;

use super::store::SpikeStore;
use crate::error::{SelectionError, SelectionResult};
use crate::predicate::Predicate;

// ---------------------------------------------------------------------------
// Predicate scan over a whole store
// ---------------------------------------------------------------------------

/// Progress of a running filter scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterProgress {
    /// Spikes tested so far.
    pub scanned: usize,
    /// Spikes in the store.
    pub total: usize,
    /// Spikes that matched so far.
    pub matched: usize,
}

/// Return the ascending indices of spikes that satisfy `predicate`.
///
/// Every index in `0..store.count()` is tested. The first evaluation error
/// aborts the scan and is returned; no partial result is produced.
/// `on_progress` is called after each spike and may stop the scan with
/// [`ControlFlow::Break`], which yields [`SelectionError::FilterCancelled`].
pub fn filtered_indices<F>(
    store: &SpikeStore,
    predicate: &Predicate,
    mut on_progress: F,
) -> SelectionResult<Vec<usize>>
where
    F: FnMut(FilterProgress) -> ControlFlow<()>,
{
    let total = store.count();
    let mut matched = Vec::new();

    for index in 0..total {
        let record = store.get(index)?;
        if predicate.matches(&record)? {
            matched.push(index);
        }

        let progress = FilterProgress {
            scanned: index + 1,
            total,
            matched: matched.len(),
        };
        if on_progress(progress).is_break() {
            return Err(SelectionError::FilterCancelled {
                expression: predicate.expression().to_string(),
                scanned: progress.scanned,
            });
        }
    }

    Ok(matched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::writer::fixtures;
    use crate::error::PredicateError;
    use crate::predicate::HelperRegistry;

    fn compile(expression: &str) -> Predicate {
        Predicate::compile(expression, &HelperRegistry::default())
            .unwrap()
            .unwrap()
    }

    #[test]
    fn keeps_matching_indices_in_order() {
        let table = fixtures::table_with_row_groups(&[3, 1, 2, 4, 0], 2);
        let store = SpikeStore::open(table.path()).unwrap();
        let indices =
            filtered_indices(&store, &compile("sum(channel_mask) >= 2"), |_| ControlFlow::Continue(()))
                .unwrap();
        assert_eq!(indices, vec![0, 2, 3]);
    }

    #[test]
    fn reports_progress_for_every_spike() {
        let table = fixtures::masked_table(&[1, 3, 3]);
        let store = SpikeStore::open(table.path()).unwrap();
        let mut seen = Vec::new();
        filtered_indices(&store, &compile("sum(channel_mask) == 3"), |p| {
            seen.push(p);
            ControlFlow::Continue(())
        })
        .unwrap();

        assert_eq!(seen.len(), 3);
        assert_eq!(
            seen.last(),
            Some(&FilterProgress {
                scanned: 3,
                total: 3,
                matched: 2
            })
        );
    }

    #[test]
    fn cancellation_stops_the_scan() {
        let table = fixtures::masked_table(&[1, 1, 1, 1]);
        let store = SpikeStore::open(table.path()).unwrap();
        let err = filtered_indices(&store, &compile("time >= 0"), |p| {
            if p.scanned == 2 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
        .unwrap_err();
        assert!(matches!(err, SelectionError::FilterCancelled { scanned: 2, .. }));
    }

    #[test]
    fn first_failing_spike_aborts() {
        let table = fixtures::masked_table(&[1, 1, 1]);
        let store = SpikeStore::open(table.path()).unwrap();
        // time is 0 for spike 0 only
        let err = filtered_indices(&store, &compile("1 / time > 0"), |_| ControlFlow::Continue(()))
            .unwrap_err();
        match err {
            SelectionError::Predicate(e @ PredicateError::Evaluation { .. }) => {
                assert_eq!(e.spike_index(), Some(0));
                assert_eq!(e.expression(), "1 / time > 0");
            }
            other => panic!("expected evaluation error, got {other:?}"),
        }
    }
}

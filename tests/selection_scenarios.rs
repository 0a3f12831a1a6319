mod common;

use spike_viewer::{
    PredicateError, PredicateEvaluator, SelectionEngine, SelectionError, SelectionMode, SpikeStore,
    StoreError,
};

/// Five spikes; 0, 2 and 4 have three unmasked channels, 1 and 3 have one.
fn five_spikes() -> tempfile::NamedTempFile {
    common::spike_table(&[10, 20, 30, 40, 50], &[3, 1, 3, 1, 3])
}

fn loaded(table: &tempfile::NamedTempFile) -> SelectionEngine {
    let mut engine = SelectionEngine::new();
    engine.open(table.path()).unwrap();
    engine
}

#[test]
fn load_selects_every_spike() {
    let table = five_spikes();
    let engine = loaded(&table);
    assert_eq!(engine.indices(), &[0, 1, 2, 3, 4]);
    assert_eq!(engine.position(), 0);
    assert_eq!(engine.selection_size(), 5);
    assert_eq!(engine.metadata().unwrap().numspikes, 5);
}

#[test]
fn filter_matches_per_record_evaluation() {
    let table = common::spike_table(&[5, 15, 25, 35, 45, 55, 65], &[0, 4, 2, 1, 3, 4, 2]);
    let mut engine = loaded(&table);
    let store = SpikeStore::open(table.path()).unwrap();
    let evaluator = PredicateEvaluator::default();

    for expression in [
        "sum(channel_mask) >= 2",
        "time > 30 and min(wave) < -10",
        "any(fet_mask) and not channel_mask[0]",
        "20 <= time < 60 or count_nonzero(channel_mask) == 4",
    ] {
        engine.apply_filter(expression).unwrap();
        let expected: Vec<usize> = (0..store.count())
            .filter(|&i| evaluator.evaluate(expression, &store.get(i).unwrap()).unwrap())
            .collect();
        assert_eq!(engine.indices(), expected.as_slice(), "{expression}");
        assert_eq!(engine.position(), 0);
    }
}

#[test]
fn empty_filter_restores_full_range() {
    let table = five_spikes();
    let mut engine = loaded(&table);
    engine.apply_filter("time > 25").unwrap();
    assert_eq!(engine.indices(), &[2, 3, 4]);

    engine.apply_filter("   ").unwrap();
    assert_eq!(engine.indices(), &[0, 1, 2, 3, 4]);
    assert_eq!(engine.mode(), &SelectionMode::Loaded);
}

#[test]
fn failing_filter_leaves_state_unchanged() {
    let table = five_spikes();
    let mut engine = loaded(&table);
    engine.apply_filter("time != 20").unwrap();
    engine.step_to(2).unwrap();

    // spike 3 has time 40
    let err = engine.apply_filter("100 / (time - 40) > 0").unwrap_err();
    match &err {
        SelectionError::Predicate(e) => {
            assert_eq!(e.spike_index(), Some(3));
            assert_eq!(e.expression(), "100 / (time - 40) > 0");
        }
        other => panic!("expected predicate error, got {other:?}"),
    }
    assert_eq!(engine.indices(), &[0, 2, 3, 4]);
    assert_eq!(engine.position(), 2);
}

#[test]
fn step_to_is_bounds_checked() {
    let table = five_spikes();
    let mut engine = loaded(&table);
    for p in 0..5 {
        engine.step_to(p).unwrap();
        assert_eq!(engine.position(), p);
        assert_eq!(engine.current_index().unwrap(), p);
    }
    assert!(matches!(
        engine.step_to(5),
        Err(SelectionError::PositionOutOfRange { position: 5, len: 5 })
    ));
    assert_eq!(engine.position(), 4);
}

#[test]
fn closed_store_never_returns_stale_data() {
    let table = five_spikes();
    let store = SpikeStore::open(table.path()).unwrap();
    let record = store.get(1).unwrap();
    assert_eq!(record.time().unwrap(), 20);

    store.close();
    for i in 0..5 {
        assert!(matches!(store.get(i), Err(StoreError::Closed)));
    }
    assert!(matches!(record.channel_mask(), Err(StoreError::Closed)));
}

#[test]
fn scenario_mask_sum_filter() {
    let table = five_spikes();
    let mut engine = loaded(&table);
    engine.apply_filter("sum(channel_mask)>2").unwrap();
    assert_eq!(engine.indices(), &[0, 2, 4]);
    assert_eq!(engine.selection_size(), 3);
    assert_eq!(engine.current_record().unwrap().unmasked_channels().unwrap(), vec![0, 1, 2]);
}

#[test]
fn scenario_unbound_name() {
    let table = five_spikes();
    let mut engine = loaded(&table);
    match engine.apply_filter("undefined_name > 1") {
        Err(SelectionError::Predicate(PredicateError::UnboundName { name, .. })) => {
            assert_eq!(name, "undefined_name")
        }
        other => panic!("expected unbound name error, got {other:?}"),
    }
    assert_eq!(engine.indices(), &[0, 1, 2, 3, 4]);
}

#[test]
fn scenario_filter_matching_nothing() {
    let table = common::spike_table(&[0, 7, 9], &[1, 2, 3]);
    let mut engine = loaded(&table);
    assert_eq!(engine.apply_filter("time<0").unwrap(), 0);
    assert!(engine.indices().is_empty());
    assert!(matches!(engine.current_record(), Err(SelectionError::EmptySelection)));
}

#[test]
fn scenario_step_past_end() {
    let table = common::spike_table(&[0, 7, 9], &[1, 2, 3]);
    let mut engine = loaded(&table);
    assert!(matches!(
        engine.step_to(10),
        Err(SelectionError::PositionOutOfRange { position: 10, len: 3 })
    ));
}

#[test]
fn scenario_reopen_closes_previous_store() {
    let a = five_spikes();
    let b = common::spike_table(&[1, 2], &[4, 4]);
    let mut engine = loaded(&a);
    let handle_a = engine.store().unwrap().clone();
    assert!(handle_a.get(0).is_ok());

    engine.open(b.path()).unwrap();
    assert!(matches!(handle_a.get(0), Err(StoreError::Closed)));
    assert_eq!(engine.indices(), &[0, 1]);
    assert_eq!(engine.metadata().unwrap().numspikes, 2);
}

#[test]
fn waveform_toggle_switches_columns() {
    let table = five_spikes();
    let mut engine = loaded(&table);
    assert_eq!(engine.current_waveform().unwrap()[(5, 0)], -50.0);
    engine.set_waveform_filtering(false);
    assert_eq!(engine.current_waveform().unwrap()[(5, 0)], 950.0);
    assert_eq!(engine.current_waveform().unwrap()[(0, 3)], 1000.0);
}

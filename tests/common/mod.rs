#![allow(dead_code)]

use ndarray::{Array1, Array2};
use spike_viewer::{write_spike_table, SpikeData, SpikeDimensions};
use tempfile::NamedTempFile;

pub const DIMS: SpikeDimensions = SpikeDimensions {
    numchannels: 4,
    features_per_channel: 2,
    samples_per_spike: 10,
};

/// Spike `i` has time `times[i]` and `active[i]` leading unmasked channels.
pub fn spikes(times: &[i64], active: &[usize]) -> Vec<SpikeData> {
    times
        .iter()
        .zip(active)
        .map(|(&time, &n)| {
            let mut spike = SpikeData::zeros(time, DIMS);
            spike.channel_mask = Array1::from_shape_fn(DIMS.numchannels, |ch| ch < n);
            spike.wave = Array2::from_shape_fn((DIMS.samples_per_spike, DIMS.numchannels), |(s, c)| {
                if s == DIMS.samples_per_spike / 2 && c < n {
                    -50.0
                } else {
                    0.0
                }
            });
            spike.unfiltered_wave = spike.wave.mapv(|v| v as i32 + 1000);
            spike
        })
        .collect()
}

/// A spike table on disk; the file lives as long as the returned handle.
pub fn spike_table(times: &[i64], active: &[usize]) -> NamedTempFile {
    let file = tempfile::Builder::new()
        .suffix(".parquet")
        .tempfile()
        .unwrap();
    write_spike_table(file.path(), DIMS, &spikes(times, active), Some(2)).unwrap();
    file
}

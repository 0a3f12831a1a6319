use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use arrow::array::{
    ArrayRef, BooleanBuilder, Float32Builder, Int32Builder, Int64Builder, ListBuilder,
};
use arrow::datatypes::{Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;

use super::loader::{
    FEATURES_PER_CHANNEL_KEY, NUMCHANNELS_KEY, NUMFEATURES_KEY, SAMPLES_PER_SPIKE_KEY,
};
use super::model::{SpikeData, SpikeDimensions, SpikeField};

/// Rows per Parquet row group when the caller does not choose.
pub const DEFAULT_ROW_GROUP_SIZE: usize = 4096;

/// Write `spikes` as a spike table readable by [`SpikeStore`](super::SpikeStore).
///
/// Every spike is checked against `dims` before anything touches the disk.
/// Waveforms and features are stored as Float32, raw waveforms as Int32.
pub fn write_spike_table(
    path: &Path,
    dims: SpikeDimensions,
    spikes: &[SpikeData],
    row_group_size: Option<usize>,
) -> Result<()> {
    if dims.numchannels == 0 || dims.features_per_channel == 0 || dims.samples_per_spike == 0 {
        bail!("spike dimensions must be positive, got {dims:?}");
    }
    if !dims.is_representable() {
        bail!("spike dimensions are too large, got {dims:?}");
    }
    for (i, spike) in spikes.iter().enumerate() {
        if let Some((field, shape)) = spike.shape_mismatch(dims) {
            bail!(
                "spike {i}: '{field}' has shape {shape:?}, expected {} values",
                dims.flat_len(field)
            );
        }
    }

    let mut time = Int64Builder::with_capacity(spikes.len());
    let mut channel_mask = ListBuilder::new(BooleanBuilder::new());
    let mut wave = ListBuilder::new(Float32Builder::new());
    let mut unfiltered_wave = ListBuilder::new(Int32Builder::new());
    let mut fet = ListBuilder::new(Float32Builder::new());
    let mut fet_mask = ListBuilder::new(BooleanBuilder::new());

    for spike in spikes {
        time.append_value(spike.time);

        for &flag in spike.channel_mask.iter() {
            channel_mask.values().append_value(flag);
        }
        channel_mask.append(true);

        for &v in spike.wave.iter() {
            wave.values().append_value(v as f32);
        }
        wave.append(true);

        for &v in spike.unfiltered_wave.iter() {
            unfiltered_wave.values().append_value(v);
        }
        unfiltered_wave.append(true);

        for &v in spike.fet.iter() {
            fet.values().append_value(v as f32);
        }
        fet.append(true);

        for &flag in spike.fet_mask.iter() {
            fet_mask.values().append_value(flag);
        }
        fet_mask.append(true);
    }

    let columns: Vec<(SpikeField, ArrayRef)> = vec![
        (SpikeField::Time, Arc::new(time.finish())),
        (SpikeField::ChannelMask, Arc::new(channel_mask.finish())),
        (SpikeField::Wave, Arc::new(wave.finish())),
        (SpikeField::UnfilteredWave, Arc::new(unfiltered_wave.finish())),
        (SpikeField::Fet, Arc::new(fet.finish())),
        (SpikeField::FetMask, Arc::new(fet_mask.finish())),
    ];

    let fields: Vec<Field> = columns
        .iter()
        .map(|(field, array)| Field::new(field.name(), array.data_type().clone(), false))
        .collect();
    let header: HashMap<String, String> = [
        (NUMCHANNELS_KEY, dims.numchannels),
        (FEATURES_PER_CHANNEL_KEY, dims.features_per_channel),
        (SAMPLES_PER_SPIKE_KEY, dims.samples_per_spike),
        (NUMFEATURES_KEY, dims.numfeatures()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    let schema = Arc::new(Schema::new(fields).with_metadata(header));

    let batch = RecordBatch::try_new(
        schema.clone(),
        columns.into_iter().map(|(_, array)| array).collect(),
    )
    .context("assembling spike batch")?;

    let props = WriterProperties::builder()
        .set_max_row_group_size(row_group_size.unwrap_or(DEFAULT_ROW_GROUP_SIZE).max(1))
        .build();
    let file = File::create(path)
        .with_context(|| format!("creating spike table {}", path.display()))?;
    let mut writer =
        ArrowWriter::try_new(file, schema, Some(props)).context("creating parquet writer")?;
    writer.write(&batch).context("writing spike batch")?;
    writer.close().context("finalising spike table")?;

    log::debug!(
        "Wrote {} spikes to {} ({dims:?})",
        spikes.len(),
        path.display()
    );
    Ok(())
}

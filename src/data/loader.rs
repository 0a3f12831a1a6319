use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use arrow::array::{Array, ArrayRef, AsArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Float64Type, Int64Type};
use ndarray::{Array1, Array2};
use parquet::arrow::ProjectionMask;
use parquet::arrow::arrow_reader::{
    ArrowReaderMetadata, ArrowReaderOptions, ParquetRecordBatchReaderBuilder, RowSelection,
    RowSelector,
};

use super::model::{SpikeDimensions, SpikeField, StoreMetadata};

/// Schema-metadata keys carrying the table header.
pub const NUMCHANNELS_KEY: &str = "numchannels";
pub const FEATURES_PER_CHANNEL_KEY: &str = "features_per_channel";
pub const SAMPLES_PER_SPIKE_KEY: &str = "samples_per_spike";
pub const NUMFEATURES_KEY: &str = "numfeatures";

// ---------------------------------------------------------------------------
// Opened spike table
// ---------------------------------------------------------------------------

/// An open Parquet spike table: the file handle plus its decoded footer.
///
/// Cells are read on demand, one column of one row at a time, so a record
/// never pulls in more than the fields a caller asks for.
pub(crate) struct SpikeTableFile {
    file: File,
    reader_metadata: ArrowReaderMetadata,
    /// First spike index of every row group.
    row_group_starts: Vec<usize>,
    /// Root column index of every [`SpikeField`], by ordinal.
    columns: [usize; 6],
}

/// Open a spike table and validate its header and schema.
///
/// Expected layout:
/// - `time`: any integer column
/// - `channel_mask`, `fet_mask`: List<Boolean>
/// - `wave`, `unfiltered_wave`, `fet`: List<numeric>, row-major flattened
/// - schema metadata: `numchannels`, `features_per_channel`,
///   `samples_per_spike` and optionally `numfeatures`
pub(crate) fn open_table(path: &Path) -> Result<(SpikeTableFile, StoreMetadata)> {
    let file = File::open(path).context("opening spike table")?;
    let reader_metadata = ArrowReaderMetadata::load(&file, ArrowReaderOptions::new())
        .context("reading parquet metadata")?;

    let schema = reader_metadata.schema().clone();
    let header = schema.metadata();
    let dims = SpikeDimensions {
        numchannels: read_dimension(header, NUMCHANNELS_KEY)?,
        features_per_channel: read_dimension(header, FEATURES_PER_CHANNEL_KEY)?,
        samples_per_spike: read_dimension(header, SAMPLES_PER_SPIKE_KEY)?,
    };
    if !dims.is_representable() {
        bail!(
            "header dimensions are too large ({} channels, {} features per channel, \
             {} samples per spike)",
            dims.numchannels,
            dims.features_per_channel,
            dims.samples_per_spike
        );
    }
    let numfeatures = match header.get(NUMFEATURES_KEY) {
        Some(_) => {
            let declared = read_dimension(header, NUMFEATURES_KEY)?;
            if declared != dims.numfeatures() {
                bail!(
                    "header declares {declared} features, expected {} \
                     (features_per_channel * numchannels + 1)",
                    dims.numfeatures()
                );
            }
            declared
        }
        None => dims.numfeatures(),
    };

    let mut columns = [0usize; 6];
    for field in SpikeField::ALL {
        let idx = schema
            .index_of(field.name())
            .map_err(|_| anyhow!("spike table missing '{field}' column"))?;
        check_column_type(field, schema.field(idx).data_type())?;
        columns[field.ordinal()] = idx;
    }

    let mut row_group_starts = Vec::with_capacity(reader_metadata.metadata().num_row_groups());
    let mut numspikes = 0usize;
    for rg in reader_metadata.metadata().row_groups() {
        row_group_starts.push(numspikes);
        numspikes += usize::try_from(rg.num_rows()).context("negative row count")?;
    }

    let metadata = StoreMetadata {
        filename: path.display().to_string(),
        numspikes,
        numchannels: dims.numchannels,
        features_per_channel: dims.features_per_channel,
        numfeatures,
        samples_per_spike: dims.samples_per_spike,
    };

    let table = SpikeTableFile {
        file,
        reader_metadata,
        row_group_starts,
        columns,
    };
    Ok((table, metadata))
}

fn read_dimension(header: &HashMap<String, String>, key: &str) -> Result<usize> {
    let raw = header
        .get(key)
        .with_context(|| format!("header missing '{key}'"))?;
    let value: usize = raw
        .trim()
        .parse()
        .with_context(|| format!("header '{key}' = '{raw}' is not a non-negative integer"))?;
    if value == 0 {
        bail!("header '{key}' must be positive");
    }
    Ok(value)
}

fn check_column_type(field: SpikeField, data_type: &DataType) -> Result<()> {
    match field {
        SpikeField::Time => {
            if !data_type.is_integer() {
                bail!("column '{field}' must be an integer column, got {data_type:?}");
            }
        }
        _ => {
            let inner = match data_type {
                DataType::List(inner) | DataType::LargeList(inner) => inner.data_type(),
                other => bail!("column '{field}' must be a List column, got {other:?}"),
            };
            let ok = match field {
                SpikeField::ChannelMask | SpikeField::FetMask => *inner == DataType::Boolean,
                _ => inner.is_numeric(),
            };
            if !ok {
                bail!("column '{field}' has unsupported element type {inner:?}");
            }
        }
    }
    Ok(())
}

impl SpikeTableFile {
    /// Read the single cell `field` of spike `index` (caller checks bounds).
    pub(crate) fn read_cell(&self, index: usize, field: SpikeField) -> Result<ArrayRef> {
        let row_group = self
            .row_group_starts
            .partition_point(|&start| start <= index)
            .checked_sub(1)
            .context("table has no row groups")?;
        let offset = index - self.row_group_starts[row_group];

        let handle = self.file.try_clone().context("duplicating file handle")?;
        let builder =
            ParquetRecordBatchReaderBuilder::new_with_metadata(handle, self.reader_metadata.clone());
        let projection =
            ProjectionMask::roots(builder.parquet_schema(), [self.columns[field.ordinal()]]);

        let mut selectors = Vec::with_capacity(2);
        if offset > 0 {
            selectors.push(RowSelector::skip(offset));
        }
        selectors.push(RowSelector::select(1));

        let mut reader = builder
            .with_projection(projection)
            .with_row_groups(vec![row_group])
            .with_row_selection(RowSelection::from(selectors))
            .with_batch_size(1)
            .build()
            .context("building cell reader")?;

        let batch = reader
            .next()
            .context("row missing from row group")?
            .context("decoding row")?;
        if batch.num_rows() != 1 || batch.num_columns() != 1 {
            bail!(
                "expected a single cell, got {} rows x {} columns",
                batch.num_rows(),
                batch.num_columns()
            );
        }
        Ok(batch.column(0).clone())
    }
}

// ---------------------------------------------------------------------------
// Cell decoders
// ---------------------------------------------------------------------------

/// Decode the integer `time` cell.
pub(crate) fn extract_time(cell: &ArrayRef) -> Result<i64> {
    if cell.is_null(0) {
        bail!("null time");
    }
    let ints = cast(cell.as_ref(), &DataType::Int64).context("casting time to Int64")?;
    let ints = ints
        .as_primitive_opt::<Int64Type>()
        .context("expected an Int64 array")?;
    Ok(ints.value(0))
}

/// Decode a boolean list cell, checking its length.
pub(crate) fn extract_bool_list(cell: &ArrayRef, expected_len: usize) -> Result<Array1<bool>> {
    let values = list_values(cell, expected_len)?;
    let flags = values
        .as_boolean_opt()
        .with_context(|| format!("expected Boolean list items, got {:?}", values.data_type()))?;
    Ok(flags.iter().map(|v| v.unwrap_or(false)).collect())
}

/// Decode a numeric list cell into a `rows x cols` matrix (row-major).
pub(crate) fn extract_matrix(cell: &ArrayRef, rows: usize, cols: usize) -> Result<Array2<f64>> {
    let values = list_values(cell, rows * cols)?;
    let floats = cast(values.as_ref(), &DataType::Float64).with_context(|| {
        format!("casting {:?} list items to Float64", values.data_type())
    })?;
    let floats = floats
        .as_primitive_opt::<Float64Type>()
        .context("expected a Float64 array")?;
    let flat: Vec<f64> = floats.iter().map(|v| v.unwrap_or(f64::NAN)).collect();
    Array2::from_shape_vec((rows, cols), flat).context("reshaping list cell")
}

/// Extract the item array of a List or LargeList cell.
fn list_values(cell: &ArrayRef, expected_len: usize) -> Result<ArrayRef> {
    if cell.is_null(0) {
        bail!("null value in list column");
    }
    let values = match cell.data_type() {
        DataType::List(_) => cell
            .as_list_opt::<i32>()
            .context("expected ListArray")?
            .value(0),
        DataType::LargeList(_) => cell
            .as_list_opt::<i64>()
            .context("expected LargeListArray")?
            .value(0),
        other => bail!("expected List or LargeList column, got {other:?}"),
    };
    if values.len() != expected_len {
        bail!(
            "holds {} values but the header requires {expected_len}",
            values.len()
        );
    }
    Ok(values)
}

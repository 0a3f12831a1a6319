use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use arrow::array::ArrayRef;
use ndarray::{Array1, Array2};

use super::loader::{self, SpikeTableFile};
use super::model::{SpikeField, StoreMetadata};
use crate::error::{StoreError, StoreResult};

// ---------------------------------------------------------------------------
// SpikeStore – file-backed, random-access spike table
// ---------------------------------------------------------------------------

/// Handle to an opened spike table.
///
/// Clones share the single underlying file handle. Closing any clone closes
/// the table for every clone and every [`SpikeRecord`] obtained from it.
#[derive(Clone)]
pub struct SpikeStore {
    shared: Arc<Shared>,
}

struct Shared {
    metadata: StoreMetadata,
    table: Mutex<Option<SpikeTableFile>>,
}

impl SpikeStore {
    /// Open and validate a spike table.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let (table, metadata) = loader::open_table(path).map_err(|e| StoreError::Open {
            path: path.to_path_buf(),
            reason: format!("{e:#}"),
        })?;

        log::info!(
            "Opened spike table {} ({} spikes, {} channels, {} samples/spike)",
            metadata.filename,
            metadata.numspikes,
            metadata.numchannels,
            metadata.samples_per_spike
        );

        Ok(SpikeStore {
            shared: Arc::new(Shared {
                metadata,
                table: Mutex::new(Some(table)),
            }),
        })
    }

    /// Release the file handle. Calling this more than once is harmless.
    pub fn close(&self) {
        if self.lock().take().is_some() {
            log::info!("Closed spike table {}", self.shared.metadata.filename);
        }
    }

    pub fn is_open(&self) -> bool {
        self.lock().is_some()
    }

    /// Number of spikes in the table.
    pub fn count(&self) -> usize {
        self.shared.metadata.numspikes
    }

    pub fn metadata(&self) -> &StoreMetadata {
        &self.shared.metadata
    }

    /// Look up spike `index`.
    ///
    /// The returned record is a lazy view: its fields are read when asked for,
    /// and reading fails with [`StoreError::Closed`] once the store is closed.
    pub fn get(&self, index: usize) -> StoreResult<SpikeRecord> {
        if !self.is_open() {
            return Err(StoreError::Closed);
        }
        if index >= self.count() {
            return Err(StoreError::IndexOutOfRange {
                index,
                count: self.count(),
            });
        }
        Ok(SpikeRecord {
            store: self.clone(),
            index,
        })
    }

    /// Whether two handles refer to the same opened table.
    pub fn ptr_eq(a: &SpikeStore, b: &SpikeStore) -> bool {
        Arc::ptr_eq(&a.shared, &b.shared)
    }

    fn lock(&self) -> MutexGuard<'_, Option<SpikeTableFile>> {
        self.shared
            .table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn read_cell(&self, index: usize, field: SpikeField) -> StoreResult<ArrayRef> {
        let guard = self.lock();
        let table = guard.as_ref().ok_or(StoreError::Closed)?;
        table
            .read_cell(index, field)
            .map_err(|e| read_error(index, field, e))
    }
}

impl fmt::Debug for SpikeStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpikeStore")
            .field("filename", &self.shared.metadata.filename)
            .field("numspikes", &self.shared.metadata.numspikes)
            .field("open", &self.is_open())
            .finish()
    }
}

fn read_error(index: usize, field: SpikeField, err: anyhow::Error) -> StoreError {
    StoreError::Read {
        index,
        field,
        reason: format!("{err:#}"),
    }
}

// ---------------------------------------------------------------------------
// SpikeRecord – read-only view of one spike
// ---------------------------------------------------------------------------

/// One spike of an opened store. Each accessor reads only its own column.
#[derive(Debug, Clone)]
pub struct SpikeRecord {
    store: SpikeStore,
    index: usize,
}

impl SpikeRecord {
    /// Index of this spike in its store.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn time(&self) -> StoreResult<i64> {
        let cell = self.store.read_cell(self.index, SpikeField::Time)?;
        loader::extract_time(&cell).map_err(|e| read_error(self.index, SpikeField::Time, e))
    }

    /// One flag per channel, true = unmasked.
    pub fn channel_mask(&self) -> StoreResult<Array1<bool>> {
        self.flags(SpikeField::ChannelMask)
    }

    /// Filtered waveform, `samples_per_spike x numchannels`.
    pub fn wave(&self) -> StoreResult<Array2<f64>> {
        let md = self.store.metadata();
        self.matrix(SpikeField::Wave, md.samples_per_spike, md.numchannels)
    }

    /// Raw waveform, `samples_per_spike x numchannels`.
    pub fn unfiltered_wave(&self) -> StoreResult<Array2<f64>> {
        let md = self.store.metadata();
        self.matrix(SpikeField::UnfilteredWave, md.samples_per_spike, md.numchannels)
    }

    /// Feature vector, `numchannels x features_per_channel`.
    pub fn fet(&self) -> StoreResult<Array2<f64>> {
        let md = self.store.metadata();
        self.matrix(SpikeField::Fet, md.numchannels, md.features_per_channel)
    }

    /// `features_per_channel * numchannels + 1` flags.
    pub fn fet_mask(&self) -> StoreResult<Array1<bool>> {
        self.flags(SpikeField::FetMask)
    }

    /// The filtered or unfiltered waveform, as the display toggle picks.
    pub fn waveform(&self, filtered: bool) -> StoreResult<Array2<f64>> {
        if filtered {
            self.wave()
        } else {
            self.unfiltered_wave()
        }
    }

    /// Indices of the channels whose mask flag is set.
    pub fn unmasked_channels(&self) -> StoreResult<Vec<usize>> {
        Ok(self
            .channel_mask()?
            .iter()
            .enumerate()
            .filter_map(|(ch, &on)| on.then_some(ch))
            .collect())
    }

    fn flags(&self, field: SpikeField) -> StoreResult<Array1<bool>> {
        let len = self.store.metadata().dimensions().flat_len(field);
        let cell = self.store.read_cell(self.index, field)?;
        loader::extract_bool_list(&cell, len).map_err(|e| read_error(self.index, field, e))
    }

    fn matrix(&self, field: SpikeField, rows: usize, cols: usize) -> StoreResult<Array2<f64>> {
        let cell = self.store.read_cell(self.index, field)?;
        loader::extract_matrix(&cell, rows, cols).map_err(|e| read_error(self.index, field, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::writer::fixtures;

    #[test]
    fn open_reads_header() {
        let table = fixtures::masked_table(&[3, 1, 3]);
        let store = SpikeStore::open(table.path()).unwrap();
        let md = store.metadata();
        assert_eq!(md.numspikes, 3);
        assert_eq!(md.numchannels, 4);
        assert_eq!(md.numfeatures, md.features_per_channel * md.numchannels + 1);
        assert!(md.filename.ends_with(".parquet"));
    }

    #[test]
    fn open_missing_file_fails() {
        let err = SpikeStore::open("/definitely/not/here.parquet").unwrap_err();
        assert!(matches!(err, StoreError::Open { .. }));
    }

    #[test]
    fn open_rejects_non_parquet() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.parquet");
        std::fs::write(&path, b"not a parquet file").unwrap();
        assert!(matches!(
            SpikeStore::open(&path),
            Err(StoreError::Open { .. })
        ));
    }

    #[test]
    fn records_read_every_field_with_header_shapes() {
        let table = fixtures::masked_table(&[3, 1]);
        let store = SpikeStore::open(table.path()).unwrap();
        let record = store.get(1).unwrap();

        assert_eq!(record.index(), 1);
        assert_eq!(record.time().unwrap(), 100);
        assert_eq!(record.channel_mask().unwrap().to_vec(), vec![true, false, false, false]);
        assert_eq!(record.unmasked_channels().unwrap(), vec![0]);

        let md = store.metadata();
        assert_eq!(record.wave().unwrap().dim(), (md.samples_per_spike, md.numchannels));
        assert_eq!(record.unfiltered_wave().unwrap().dim(), (md.samples_per_spike, md.numchannels));
        assert_eq!(record.fet().unwrap().dim(), (md.numchannels, md.features_per_channel));
        assert_eq!(record.fet_mask().unwrap().len(), md.numfeatures);
    }

    #[test]
    fn waveform_toggle_picks_column() {
        let table = fixtures::masked_table(&[2]);
        let store = SpikeStore::open(table.path()).unwrap();
        let record = store.get(0).unwrap();
        assert_eq!(record.waveform(true).unwrap(), record.wave().unwrap());
        assert_eq!(record.waveform(false).unwrap(), record.unfiltered_wave().unwrap());
        assert_ne!(record.wave().unwrap(), record.unfiltered_wave().unwrap());
    }

    #[test]
    fn get_checks_bounds() {
        let table = fixtures::masked_table(&[1, 1]);
        let store = SpikeStore::open(table.path()).unwrap();
        assert!(matches!(
            store.get(2),
            Err(StoreError::IndexOutOfRange { index: 2, count: 2 })
        ));
    }

    #[test]
    fn reads_across_row_groups() {
        let table = fixtures::table_with_row_groups(&[1, 2, 3, 4, 1, 2, 3], 2);
        let store = SpikeStore::open(table.path()).unwrap();
        for i in 0..store.count() {
            let record = store.get(i).unwrap();
            assert_eq!(record.time().unwrap(), i as i64 * 100);
        }
        assert_eq!(store.get(5).unwrap().unmasked_channels().unwrap().len(), 2);
    }

    #[test]
    fn close_is_idempotent_and_invalidates_records() {
        let table = fixtures::masked_table(&[2, 2]);
        let store = SpikeStore::open(table.path()).unwrap();
        let record = store.get(0).unwrap();
        let other_handle = store.clone();

        store.close();
        store.close();

        assert!(!other_handle.is_open());
        assert!(matches!(store.get(0), Err(StoreError::Closed)));
        assert!(matches!(other_handle.get(1), Err(StoreError::Closed)));
        assert!(matches!(record.time(), Err(StoreError::Closed)));
        assert!(matches!(record.wave(), Err(StoreError::Closed)));
    }

    #[test]
    fn ptr_eq_distinguishes_tables() {
        let table = fixtures::masked_table(&[1]);
        let a = SpikeStore::open(table.path()).unwrap();
        let b = SpikeStore::open(table.path()).unwrap();
        assert!(SpikeStore::ptr_eq(&a, &a.clone()));
        assert!(!SpikeStore::ptr_eq(&a, &b));
    }
}

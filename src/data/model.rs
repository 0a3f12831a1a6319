use std::fmt;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// SpikeField – the six per-spike columns
// ---------------------------------------------------------------------------

/// One of the per-spike fields a record exposes (and a predicate may name).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpikeField {
    Time,
    ChannelMask,
    Wave,
    UnfilteredWave,
    Fet,
    FetMask,
}

impl SpikeField {
    pub const ALL: [SpikeField; 6] = [
        SpikeField::Time,
        SpikeField::ChannelMask,
        SpikeField::Wave,
        SpikeField::UnfilteredWave,
        SpikeField::Fet,
        SpikeField::FetMask,
    ];

    /// Column name in the spike table, also the name used in predicates.
    pub fn name(self) -> &'static str {
        match self {
            SpikeField::Time => "time",
            SpikeField::ChannelMask => "channel_mask",
            SpikeField::Wave => "wave",
            SpikeField::UnfilteredWave => "unfiltered_wave",
            SpikeField::Fet => "fet",
            SpikeField::FetMask => "fet_mask",
        }
    }

    /// Resolve a column / predicate name to a field.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.name() == name)
    }

    /// Position of the field in [`SpikeField::ALL`].
    pub fn ordinal(self) -> usize {
        self as usize
    }
}

impl fmt::Display for SpikeField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Dimensions and metadata
// ---------------------------------------------------------------------------

/// The per-table shape header every spike row must agree with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpikeDimensions {
    pub numchannels: usize,
    pub features_per_channel: usize,
    pub samples_per_spike: usize,
}

impl SpikeDimensions {
    /// Whether every flattened length fits in a `usize`. The other size
    /// methods assume it does.
    pub fn is_representable(&self) -> bool {
        let wave = self.samples_per_spike.checked_mul(self.numchannels);
        let features = self
            .features_per_channel
            .checked_mul(self.numchannels)
            .and_then(|n| n.checked_add(1));
        wave.is_some() && features.is_some()
    }

    /// Length of `fet_mask`: one flag per feature plus the trailing time feature.
    pub fn numfeatures(&self) -> usize {
        self.features_per_channel * self.numchannels + 1
    }

    /// Expected flattened length of a field's list cell (1 for `time`).
    pub fn flat_len(&self, field: SpikeField) -> usize {
        match field {
            SpikeField::Time => 1,
            SpikeField::ChannelMask => self.numchannels,
            SpikeField::Wave | SpikeField::UnfilteredWave => {
                self.samples_per_spike * self.numchannels
            }
            SpikeField::Fet => self.numchannels * self.features_per_channel,
            SpikeField::FetMask => self.numfeatures(),
        }
    }
}

/// Summary of an opened spike table (the "properties" of the viewer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreMetadata {
    pub filename: String,
    pub numspikes: usize,
    pub numchannels: usize,
    pub features_per_channel: usize,
    pub numfeatures: usize,
    pub samples_per_spike: usize,
}

impl StoreMetadata {
    pub fn dimensions(&self) -> SpikeDimensions {
        SpikeDimensions {
            numchannels: self.numchannels,
            features_per_channel: self.features_per_channel,
            samples_per_spike: self.samples_per_spike,
        }
    }
}

impl fmt::Display for StoreMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Filename: {}", self.filename)?;
        writeln!(f, "Num spikes: {}", self.numspikes)?;
        writeln!(f, "Num channels: {}", self.numchannels)?;
        writeln!(f, "Features per channel: {}", self.features_per_channel)?;
        writeln!(f, "Num features: {}", self.numfeatures)?;
        write!(f, "Samples per spike: {}", self.samples_per_spike)
    }
}

// ---------------------------------------------------------------------------
// SpikeData – one fully materialised spike (used when writing tables)
// ---------------------------------------------------------------------------

/// An owned spike, with every field in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct SpikeData {
    pub time: i64,
    /// `numchannels` flags, true = unmasked.
    pub channel_mask: Array1<bool>,
    /// `samples_per_spike × numchannels`.
    pub wave: Array2<f64>,
    /// `samples_per_spike × numchannels`, raw integer samples.
    pub unfiltered_wave: Array2<i32>,
    /// `numchannels × features_per_channel`.
    pub fet: Array2<f64>,
    /// `features_per_channel * numchannels + 1` flags.
    pub fet_mask: Array1<bool>,
}

impl SpikeData {
    /// A spike with every array zeroed and every channel unmasked.
    pub fn zeros(time: i64, dims: SpikeDimensions) -> Self {
        SpikeData {
            time,
            channel_mask: Array1::from_elem(dims.numchannels, true),
            wave: Array2::zeros((dims.samples_per_spike, dims.numchannels)),
            unfiltered_wave: Array2::zeros((dims.samples_per_spike, dims.numchannels)),
            fet: Array2::zeros((dims.numchannels, dims.features_per_channel)),
            fet_mask: Array1::from_elem(dims.numfeatures(), true),
        }
    }

    /// Return the first field whose shape disagrees with `dims`, if any.
    pub fn shape_mismatch(&self, dims: SpikeDimensions) -> Option<(SpikeField, Vec<usize>)> {
        let wave_shape = [dims.samples_per_spike, dims.numchannels];
        let fet_shape = [dims.numchannels, dims.features_per_channel];
        if self.channel_mask.len() != dims.numchannels {
            return Some((SpikeField::ChannelMask, self.channel_mask.shape().to_vec()));
        }
        if self.wave.shape() != wave_shape {
            return Some((SpikeField::Wave, self.wave.shape().to_vec()));
        }
        if self.unfiltered_wave.shape() != wave_shape {
            return Some((
                SpikeField::UnfilteredWave,
                self.unfiltered_wave.shape().to_vec(),
            ));
        }
        if self.fet.shape() != fet_shape {
            return Some((SpikeField::Fet, self.fet.shape().to_vec()));
        }
        if self.fet_mask.len() != dims.numfeatures() {
            return Some((SpikeField::FetMask, self.fet_mask.shape().to_vec()));
        }
        None
    }
}

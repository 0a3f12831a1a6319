use std::fmt::Write;

use ndarray::{Array1, Array2, Axis};

// ---------------------------------------------------------------------------
// Per-channel waveform summary (text stand-in for the waveform plot)
// ---------------------------------------------------------------------------

/// Extent of one channel's trace in a spike waveform.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSummary {
    pub channel: usize,
    pub unmasked: bool,
    pub min: f64,
    pub max: f64,
    /// Sample with the largest absolute amplitude.
    pub peak_sample: usize,
}

/// Summarise every channel (column) of `wave`.
///
/// Channels beyond the end of `mask` count as masked.
pub fn channel_summaries(wave: &Array2<f64>, mask: &Array1<bool>) -> Vec<ChannelSummary> {
    wave.axis_iter(Axis(1))
        .enumerate()
        .map(|(channel, trace)| {
            let (min, max) = trace
                .iter()
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                    (lo.min(v), hi.max(v))
                });
            let peak_sample = trace
                .iter()
                .enumerate()
                .fold((0, f64::NEG_INFINITY), |(best, amp), (s, &v)| {
                    if v.abs() > amp {
                        (s, v.abs())
                    } else {
                        (best, amp)
                    }
                })
                .0;
            ChannelSummary {
                channel,
                unmasked: mask.get(channel).copied().unwrap_or(false),
                min,
                max,
                peak_sample,
            }
        })
        .collect()
}

/// One line per channel; masked channels are flagged rather than hidden.
pub fn render(wave: &Array2<f64>, mask: &Array1<bool>, filtered: bool) -> String {
    let (samples, channels) = wave.dim();
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} waveform, {samples} samples x {channels} channels (centre sample {})",
        if filtered { "Filtered" } else { "Unfiltered" },
        samples / 2
    );
    for s in channel_summaries(wave, mask) {
        let _ = writeln!(
            out,
            "  ch {:>3} {:<9} min {:>10.3}  max {:>10.3}  peak @ {}",
            s.channel,
            if s.unmasked { "" } else { "(masked)" },
            s.min,
            s.max,
            s.peak_sample
        );
    }
    out
}

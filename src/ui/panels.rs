use std::fmt::Write;

use crate::data::StoreMetadata;
use crate::error::SelectionResult;
use crate::state::SelectionEngine;
use crate::ui::waveform;

pub const HELP_TEXT: &str = "\
Spike viewer

Open a spike table (.parquet) with `open <path>`.

Step through spikes with `goto <n>`, `next` and `prev`; `show` prints the
current spike. Masked channels are flagged, unmasked ones are listed.
Choose filtered or unfiltered data with `filtering on|off`.

Reduce the spike list with a condition, e.g. `filter sum(channel_mask)>5`;
`filter` on its own or `clear` selects every spike again.
Available variables are:
- time (int)
- channel_mask (bool array length num_channels)
- wave (float array size num_samples x num_channels)
- unfiltered_wave (int array size num_samples x num_channels)
- fet (float array size num_channels x features_per_channel)
- fet_mask (bool array length features_per_channel*num_channels+1)

Other commands: props [json], status, close, help, quit.";

// ---------------------------------------------------------------------------
// Text panels
// ---------------------------------------------------------------------------

/// The "Spike table properties" panel.
pub fn properties(metadata: &StoreMetadata) -> String {
    format!("Spike table properties\n{metadata}")
}

pub fn properties_json(metadata: &StoreMetadata) -> serde_json::Result<String> {
    serde_json::to_string_pretty(metadata)
}

/// The current spike: where it sits in the selection, its time, unmasked
/// channels and waveform summary.
pub fn spike_panel(engine: &SelectionEngine) -> SelectionResult<String> {
    let record = engine.current_record()?;
    let filtered = engine.waveform_filtering();
    let mask = record.channel_mask()?;
    let wave = record.waveform(filtered)?;

    let mut out = String::new();
    let _ = writeln!(
        out,
        "Spike number {} of {} (spike {}, time {})",
        engine.position(),
        engine.selection_size(),
        record.index(),
        record.time()?
    );
    let _ = writeln!(out, "Unmasked channels: {:?}", record.unmasked_channels()?);
    out.push_str(&waveform::render(&wave, &mask, filtered));
    Ok(out)
}

/// Status bar line, with the active filter when there is one.
pub fn status_bar(engine: &SelectionEngine) -> String {
    match engine.active_filter() {
        Some(expression) => format!("{}  (filter: {expression})", engine.status_line()),
        None => engine.status_line(),
    }
}

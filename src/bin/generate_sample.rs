use std::path::PathBuf;

use anyhow::{Context, Result};
use ndarray::{Array1, Array2};
use spike_viewer::data::{write_spike_table, SpikeData, SpikeDimensions};

const DIMS: SpikeDimensions = SpikeDimensions {
    numchannels: 8,
    features_per_channel: 3,
    samples_per_spike: 32,
};

/// Biphasic spike template: sharp trough at the centre, slower positive rebound.
fn template(sample: usize, samples: usize) -> f64 {
    let t = sample as f64 - (samples / 2) as f64;
    let trough = -(-(t * t) / 4.0).exp();
    let rebound = 0.35 * (-((t - 6.0).powi(2)) / 18.0).exp();
    trough + rebound
}

fn generate_spike(time: i64, rng: &mut SimpleRng) -> SpikeData {
    let home = (rng.next_u64() % DIMS.numchannels as u64) as usize;
    let amplitude = 40.0 + 160.0 * rng.next_f64();
    let noise = 3.0;

    // Amplitude decays with distance from the home channel
    let gains: Vec<f64> = (0..DIMS.numchannels)
        .map(|ch| (-(ch.abs_diff(home) as f64) / 1.5).exp())
        .collect();

    let mut spike = SpikeData::zeros(time, DIMS);
    spike.channel_mask = Array1::from_shape_fn(DIMS.numchannels, |ch| gains[ch] * amplitude > 30.0);
    spike.wave = Array2::from_shape_fn((DIMS.samples_per_spike, DIMS.numchannels), |(s, ch)| {
        amplitude * gains[ch] * template(s, DIMS.samples_per_spike) + rng.gauss(0.0, noise)
    });

    let offsets: Vec<f64> = (0..DIMS.numchannels).map(|_| rng.gauss(0.0, 50.0)).collect();
    spike.unfiltered_wave = Array2::from_shape_fn(spike.wave.raw_dim(), |(s, ch)| {
        (spike.wave[(s, ch)] + offsets[ch] + rng.gauss(0.0, 2.0 * noise)).round() as i32
    });

    // Features: peak-to-peak, trough depth, and a noise projection per channel
    spike.fet = Array2::from_shape_fn((DIMS.numchannels, DIMS.features_per_channel), |(ch, f)| {
        let trace = spike.wave.column(ch);
        let hi = trace.fold(f64::NEG_INFINITY, |m, &v| m.max(v));
        let lo = trace.fold(f64::INFINITY, |m, &v| m.min(v));
        match f {
            0 => hi - lo,
            1 => -lo,
            _ => rng.gauss(0.0, 1.0),
        }
    });
    let mut fet_mask = Vec::with_capacity(DIMS.numfeatures());
    for &unmasked in spike.channel_mask.iter() {
        fet_mask.extend(std::iter::repeat(unmasked).take(DIMS.features_per_channel));
    }
    fet_mask.push(true);
    spike.fet_mask = Array1::from(fet_mask);

    spike
}

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let output = PathBuf::from(args.next().unwrap_or_else(|| "sample_spikes.parquet".to_string()));
    let count: usize = match args.next() {
        Some(n) => n.parse().with_context(|| format!("invalid spike count `{n}`"))?,
        None => 1000,
    };

    let mut rng = SimpleRng::new(42);

    // Spike times in samples, refractory gap plus exponential-ish jitter
    let mut time: i64 = 0;
    let spikes: Vec<SpikeData> = (0..count)
        .map(|_| {
            time += 40 + (-rng.next_f64().max(1e-12).ln() * 600.0) as i64;
            generate_spike(time, &mut rng)
        })
        .collect();

    write_spike_table(&output, DIMS, &spikes, None)?;

    println!(
        "Wrote {} spikes ({} channels, {} samples/spike) to {}",
        spikes.len(),
        DIMS.numchannels,
        DIMS.samples_per_spike,
        output.display()
    );
    Ok(())
}

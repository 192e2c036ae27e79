//! Audio timing constants and sample quantization.
//!
//! One audio sample is played per tick opcode by toggling the speaker after
//! a variable number of cycles within the opcode's fixed 73-cycle budget, so
//! the sample value is carried entirely by the opcode's entry address.

/// Player CPU clock.
pub const CPU_HZ: u32 = 1024 * 1024;
/// Fixed cycle budget of every tick opcode.
pub const CYCLES_PER_TICK: u32 = 73;
/// Effective audio sample rate. Slightly below `CPU_HZ / CYCLES_PER_TICK`
/// because buffer management overhead eats a fraction of each stream block.
pub const SAMPLE_RATE: u32 = 14_340;

/// Smallest representable sample value.
pub const SAMPLE_MIN: i8 = -15;
/// Largest representable sample value.
pub const SAMPLE_MAX: i8 = 16;

/// Raw decoded samples are treated as 16-bit PCM scaled floats.
const PCM_SCALE: f32 = 16384.0;

/// Tick cycle count encoding a sample: even, in [4, 66].
pub fn tick_cycles(sample: i8) -> u8 {
    debug_assert!((SAMPLE_MIN..=SAMPLE_MAX).contains(&sample));
    (2 * i16::from(sample) + 34) as u8
}

/// Sample value recovered from a tick cycle count.
pub fn sample_for_cycles(tick_cycles: u8) -> i8 {
    ((i16::from(tick_cycles) - 34) / 2) as i8
}

/// Quantize a normalized sample (nominally in [-1, 1]) to the speaker range,
/// clipping at the extremes.
pub fn quantize(value: f32) -> i8 {
    ((value * 16.0) as i32).clamp(i32::from(SAMPLE_MIN), i32::from(SAMPLE_MAX)) as i8
}

/// Normalization factor such that the 2.5th..97.5th percentile range of the
/// given 16-bit-scaled samples maps into [-1, 1]; only 2.5% of samples will
/// clip on either side.
pub fn normalization(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 1.0;
    }
    let mut sorted: Vec<f32> = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());

    let norm = percentile(&sorted, 2.5)
        .abs()
        .max(percentile(&sorted, 97.5).abs());
    if norm <= f32::EPSILON {
        return 1.0;
    }
    PCM_SCALE / norm
}

/// Linearly interpolated percentile of pre-sorted data.
fn percentile(sorted: &[f32], p: f32) -> f32 {
    let rank = p / 100.0 * (sorted.len() - 1) as f32;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f32;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Scale a raw 16-bit PCM sample by the normalization factor, ready for
/// [`quantize`].
pub fn normalize(raw: f32, normalization: f32) -> f32 {
    raw / PCM_SCALE * normalization
}

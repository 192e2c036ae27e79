//! Nominal display colours and the perceptual cost model between them.
//!
//! A run of display dots is decoded to colours by sliding a 4-bit window
//! along the dot bits; the window is rotated by the colour-carrier phase of
//! the byte-offset class being decoded. These are the "asymptotic" colours
//! of continuous dot runs; the analogue artifacting process is continuous
//! and this is a deliberate approximation.

use crate::mode::{Palette, VideoMode};

/// Colour code of a black dot (both bitplane modes).
pub const BLACK: u8 = 0;
/// Colour code of a white dot.
pub const WHITE: u8 = 0b1111;

/// Rotate a 4-bit value right.
pub fn ror4(v: u8, count: u32) -> u8 {
    let mut res = v & 0xf;
    for _ in 0..count {
        res = ((res & 0b1110) >> 1) | ((res & 0b0001) << 3);
    }
    res
}

/// Rotate a 4-bit value left.
pub fn rol4(v: u8, count: u32) -> u8 {
    let mut res = v & 0xf;
    for _ in 0..count {
        res = ((res & 0b0111) << 1) | ((res & 0b1000) >> 3);
    }
    res
}

/// Colour-carrier phase at the start of each byte-offset class's dot window.
///
/// The two modes differ by one carrier tick, so the HGR phases are the DHGR
/// phases rotated by one.
pub fn init_phase(mode: VideoMode, class: usize) -> u32 {
    const DHGR_PHASES: [u32; 4] = [0, 3, 2, 1];
    match mode {
        VideoMode::Dhgr => DHGR_PHASES[class],
        VideoMode::Hgr => (DHGR_PHASES[class] + 1) % 4,
    }
}

/// Decode `num_bits` dots into colour codes via the sliding 4-bit window,
/// writing one code per dot into `out`.
pub fn dots_to_colours(dots: u32, num_bits: u32, init_phase: u32, out: &mut [u8]) {
    debug_assert!(out.len() >= num_bits as usize);
    let mut shifted = dots;
    let mut phase = init_phase;

    for slot in out.iter_mut().take(num_bits as usize) {
        *slot = rol4((shifted & 0xf) as u8, phase);
        shifted >>= 1;
        phase += 1;
        if phase == 4 {
            phase = 0;
        }
    }
}

/// RGB values per DHGR colour code, taken from the external converter's
/// palettes so the distance model matches what the converter targets.
fn rgb_table(palette: Palette) -> [(u8, u8, u8); 16] {
    match palette {
        Palette::Ntsc => [
            (0, 0, 0),       // black
            (32, 54, 212),   // dark blue
            (51, 111, 0),    // dark green
            (7, 168, 225),   // medium blue
            (99, 77, 0),     // brown
            (126, 126, 126), // grey2
            (67, 200, 0),    // green
            (93, 248, 133),  // aqua
            (148, 12, 125),  // magenta
            (188, 55, 255),  // violet
            (126, 126, 126), // grey1
            (158, 172, 255), // light blue
            (249, 86, 29),   // orange
            (255, 129, 236), // pink
            (221, 206, 23),  // yellow
            (255, 255, 255), // white
        ],
        Palette::Iigs => [
            (0, 0, 0),
            (0, 0, 153),
            (0, 119, 0),
            (34, 34, 255),
            (136, 85, 34),
            (170, 170, 170),
            (0, 221, 0),
            (0, 255, 153),
            (221, 0, 51),
            (221, 0, 221),
            (85, 85, 85),
            (102, 170, 255),
            (255, 102, 0),
            (255, 153, 136),
            (255, 255, 0),
            (255, 255, 255),
        ],
    }
}

/// RGB of a colour code as decoded in the given mode. HGR codes are the DHGR
/// codes rotated right by the one-tick carrier difference.
pub fn rgb(mode: VideoMode, palette: Palette, code: u8) -> (u8, u8, u8) {
    let table = rgb_table(palette);
    match mode {
        VideoMode::Dhgr => table[code as usize],
        VideoMode::Hgr => table[ror4(code, 1) as usize],
    }
}

/// Weighted-edit costs over colour codes.
pub struct CostModel {
    pub substitute: [[u16; 16]; 16],
    pub transpose: u32,
    pub insert_delete: u32,
}

/// Substituting a black dot for any colour (or back) costs 5.
const BLACK_COST: u16 = 5;
/// Insertions and deletions make no sense for fixed dot runs.
const INSERT_DELETE_COST: u32 = 100_000;

fn rgb_distance(a: (u8, u8, u8), b: (u8, u8, u8)) -> f64 {
    let dr = f64::from(a.0) - f64::from(b.0);
    let dg = f64::from(a.1) - f64::from(b.1);
    let db = f64::from(a.2) - f64::from(b.2);
    (dr * dr + dg * dg + db * db).sqrt()
}

/// Build the substitution-cost matrix for a mode and palette.
///
/// Colour-to-colour costs scale the palette RGB distance into [0, 5], with
/// the black rule pinned at 5; the `error` variant multiplies substitution
/// costs by 5 to penalize speculative stores that introduce visual noise.
pub fn cost_model(mode: VideoMode, palette: Palette, error: bool) -> CostModel {
    // Black <-> white spans the full RGB cube, so it normalizes the scale.
    let max_dist = rgb_distance((0, 0, 0), (255, 255, 255));
    let scale = if error { 5 } else { 1 };

    let mut substitute = [[0u16; 16]; 16];
    for a in 0..16u8 {
        for b in 0..16u8 {
            if a == b {
                continue;
            }
            let cost = if a == BLACK || b == BLACK {
                BLACK_COST
            } else {
                let d = rgb_distance(rgb(mode, palette, a), rgb(mode, palette, b));
                (5.0 * d / max_dist).round() as u16
            };
            substitute[a as usize][b as usize] = cost * scale;
        }
    }

    CostModel {
        substitute,
        transpose: 1,
        insert_delete: INSERT_DELETE_COST,
    }
}

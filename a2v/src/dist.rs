//! Perceptual edit-distance tables over packed dot windows.
//!
//! For every pair of window values a byte-offset class can take, the window
//! bits decode to colour runs and a weighted Damerau-Levenshtein comparison
//! scores how different the runs look. Transposing neighbouring dots is
//! cheap (colour fringing shifts by a dot), substituting colours is
//! expensive, and insertions/deletions are effectively forbidden since dot
//! runs have fixed length.

use rayon::prelude::*;

use crate::colour::{self, CostModel};
use crate::mode::{Palette, VideoMode};
use crate::window::WINDOW_BITS;

/// Largest dot window width; decode buffers are sized for it.
const MAX_WINDOW: usize = 12;

/// The four per-class distance tables of one cost variant, each indexed by
/// `(source_window << bits) | target_window`.
pub type ClassTables = [Vec<u16>; 4];

/// Distance tables for one `(mode, palette)` pair: the substitution variant
/// scores a store that lands on its target, the error variant scores a
/// speculative store at a non-target offset.
pub struct TableSet {
    mode: VideoMode,
    palette: Palette,
    pub(crate) substitute: ClassTables,
    pub(crate) error: ClassTables,
}

impl TableSet {
    /// Build both table variants for all four byte-offset classes.
    pub fn build(mode: VideoMode, palette: Palette) -> Self {
        let sub_costs = colour::cost_model(mode, palette, false);
        let err_costs = colour::cost_model(mode, palette, true);

        let mut substitute: ClassTables = Default::default();
        let mut error: ClassTables = Default::default();
        for class in 0..4 {
            log::info!(
                "building {}-bit distance tables for {} {} (class {})",
                WINDOW_BITS[class],
                mode.name(),
                palette.name(),
                class
            );
            let (sub, err) = build_class(mode, class, &sub_costs, &err_costs);
            substitute[class] = sub;
            error[class] = err;
        }

        TableSet {
            mode,
            palette,
            substitute,
            error,
        }
    }

    /// Reassemble a table set from deserialized parts.
    pub(crate) fn from_parts(
        mode: VideoMode,
        palette: Palette,
        substitute: ClassTables,
        error: ClassTables,
    ) -> Self {
        TableSet {
            mode,
            palette,
            substitute,
            error,
        }
    }

    pub fn mode(&self) -> VideoMode {
        self.mode
    }

    pub fn palette(&self) -> Palette {
        self.palette
    }

    /// Remaining perceived difference after the target window is stored.
    pub fn substitution(&self, class: usize, source: u32, target: u32) -> u16 {
        self.substitute[class][table_index(class, source, target)]
    }

    /// Perceived error introduced by a speculative store (5x substitution
    /// penalty).
    pub fn error(&self, class: usize, source: u32, target: u32) -> u16 {
        self.error[class][table_index(class, source, target)]
    }
}

fn table_index(class: usize, source: u32, target: u32) -> usize {
    debug_assert!(source < (1 << WINDOW_BITS[class]));
    debug_assert!(target < (1 << WINDOW_BITS[class]));
    ((source as usize) << WINDOW_BITS[class]) | target as usize
}

/// Build the substitution and error tables for one byte-offset class.
///
/// Distances are symmetric, so only pairs with `source >= target` are
/// computed; the mirror triangle is copied afterwards.
fn build_class(
    mode: VideoMode,
    class: usize,
    sub_costs: &CostModel,
    err_costs: &CostModel,
) -> (Vec<u16>, Vec<u16>) {
    let bits = WINDOW_BITS[class];
    let n = 1usize << bits;
    let phase = colour::init_phase(mode, class);

    // Decode every window value once up front.
    let runs: Vec<[u8; MAX_WINDOW]> = (0..n)
        .map(|w| {
            let mut out = [0u8; MAX_WINDOW];
            colour::dots_to_colours(w as u32, bits, phase, &mut out);
            out
        })
        .collect();
    let len = bits as usize;

    let mut sub = vec![0u16; n * n];
    let mut err = vec![0u16; n * n];

    sub.par_chunks_mut(n)
        .zip(err.par_chunks_mut(n))
        .enumerate()
        .for_each(|(i, (sub_row, err_row))| {
            let a = &runs[i][..len];
            for j in 0..=i {
                let b = &runs[j][..len];
                sub_row[j] = weighted_dam_lev(a, b, sub_costs);
                err_row[j] = weighted_dam_lev(a, b, err_costs);
            }
            debug_assert_eq!(sub_row[i], 0);
        });

    // Mirror the computed triangle.
    for i in 0..n {
        for j in i + 1..n {
            sub[i * n + j] = sub[j * n + i];
            err[i * n + j] = err[j * n + i];
        }
    }

    (sub, err)
}

/// Weighted Damerau-Levenshtein distance (optimal string alignment) between
/// two colour runs.
pub(crate) fn weighted_dam_lev(a: &[u8], b: &[u8], costs: &CostModel) -> u16 {
    let (la, lb) = (a.len(), b.len());
    let width = lb + 1;
    let mut d = vec![0u32; (la + 1) * width];

    for i in 1..=la {
        d[i * width] = i as u32 * costs.insert_delete;
    }
    for j in 1..=lb {
        d[j] = j as u32 * costs.insert_delete;
    }

    for i in 1..=la {
        for j in 1..=lb {
            let sub =
                d[(i - 1) * width + j - 1] + u32::from(costs.substitute[a[i - 1] as usize][b[j - 1] as usize]);
            let del = d[(i - 1) * width + j] + costs.insert_delete;
            let ins = d[i * width + j - 1] + costs.insert_delete;
            let mut best = sub.min(del).min(ins);

            if i > 1 && j > 1 && a[i - 1] == b[j - 2] && a[i - 2] == b[j - 1] {
                best = best.min(d[(i - 2) * width + j - 2] + costs.transpose);
            }
            d[i * width + j] = best;
        }
    }

    let dist = d[la * width + lb];
    debug_assert!(dist < u32::from(u16::MAX));
    dist as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::colour::cost_model;

    fn costs() -> CostModel {
        cost_model(VideoMode::Hgr, Palette::Ntsc, false)
    }

    #[test]
    fn test_identical_runs_are_free() {
        let c = costs();
        assert_eq!(weighted_dam_lev(&[0, 1, 2, 3], &[0, 1, 2, 3], &c), 0);
    }

    #[test]
    fn test_transposition_beats_substitution() {
        let c = costs();
        // Swapped neighbours cost one transposition...
        assert_eq!(weighted_dam_lev(&[0, 15, 1, 2], &[15, 0, 1, 2], &c), 1);
        // ...while replacing black outright costs 5.
        assert_eq!(weighted_dam_lev(&[0, 1], &[15, 1], &c), 5);
    }

    #[test]
    fn test_insertions_forbidden_for_equal_lengths() {
        let c = costs();
        // Any equal-length comparison stays far below one insert+delete.
        let worst = weighted_dam_lev(&[0; 12], &[15; 12], &c);
        assert!(u32::from(worst) < c.insert_delete);
        assert_eq!(worst, 12 * 5);
    }

    #[test]
    fn test_class0_table_symmetric_zero_diagonal() {
        let sub_costs = cost_model(VideoMode::Hgr, Palette::Ntsc, false);
        let err_costs = cost_model(VideoMode::Hgr, Palette::Ntsc, true);
        let (sub, err) = build_class(VideoMode::Hgr, 0, &sub_costs, &err_costs);

        let n = 1usize << WINDOW_BITS[0];
        for i in 0..n {
            assert_eq!(sub[i * n + i], 0);
            assert_eq!(err[i * n + i], 0);
            for j in 0..i {
                assert_eq!(sub[i * n + j], sub[j * n + i]);
                assert_eq!(err[i * n + j], err[j * n + i]);
            }
        }
    }

    #[test]
    fn test_error_variant_dominates_substitution() {
        let sub_costs = cost_model(VideoMode::Hgr, Palette::Ntsc, false);
        let err_costs = cost_model(VideoMode::Hgr, Palette::Ntsc, true);
        let (sub, err) = build_class(VideoMode::Hgr, 3, &sub_costs, &err_costs);
        for (s, e) in sub.iter().zip(err.iter()) {
            assert!(e >= s);
        }
    }
}

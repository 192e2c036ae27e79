//! Convergence scheduler: picks, for every tick, the display write that
//! best reduces perceived error against the current target frame.
//!
//! Every tick opcode stores one content byte at four offsets of one page,
//! so the search space per tick is (content, page) pairs scored by the best
//! four offsets each. Error is signed: the perceived noise a speculative
//! store would introduce (error tables, 5x substitution penalty) minus the
//! priority accumulated by the byte across frames, so long-neglected bytes
//! win even when the immediate gain is modest.

use crate::dist::TableSet;
use crate::frames::TargetFrame;
use crate::mode::VideoMode;
use crate::screen::{self, MemoryMap, PAGES, PAGE_SIZE};
use crate::window::{self, PackedBitmap, WINDOW_BITS};

/// Content bytes worth enumerating: the palette bit is fixed, leaving 7
/// free bits.
pub const CONTENT_RANGE: usize = 128;

/// The display write selected for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickWrite {
    /// Absolute page (32..64).
    pub page: u8,
    pub content: u8,
    pub offsets: [u8; 4],
}

type PriorityGrid = Box<[[i32; PAGE_SIZE]; PAGES]>;

/// Per-frame search state for one memory bank.
struct FramePlan {
    is_aux: bool,
    /// Diff of reconstruction vs target at frame start; doubles as the
    /// "already resolved" marker during the frame.
    diff_weights: PriorityGrid,
    /// `error_delta - update_priority` per (content, page, offset).
    edit: Box<[i32]>,
    /// Running 4-smallest partition of `edit` per (content, page).
    smallest_idx: Box<[[u8; 4]]>,
    smallest_val: Box<[[i32; 4]]>,
    /// No improving opcode remains this frame.
    done: bool,
}

/// Owns the reconstructed display state and schedules writes frame by
/// frame.
pub struct Scheduler<'t> {
    mode: VideoMode,
    tables: &'t TableSet,
    memory: MemoryMap,
    aux_memory: Option<MemoryMap>,
    packed: PackedBitmap,
    update_priority: PriorityGrid,
    aux_update_priority: Option<PriorityGrid>,
    main_plan: Option<FramePlan>,
    aux_plan: Option<FramePlan>,
}

impl<'t> Scheduler<'t> {
    pub fn new(mode: VideoMode, tables: &'t TableSet) -> Self {
        debug_assert_eq!(tables.mode(), mode);
        let memory = MemoryMap::new(1);
        let aux_memory = (mode == VideoMode::Dhgr).then(|| MemoryMap::new(1));
        let packed = PackedBitmap::from_memory(mode, &memory, aux_memory.as_ref());

        Scheduler {
            mode,
            tables,
            memory,
            aux_memory,
            packed,
            update_priority: zero_grid(),
            aux_update_priority: (mode == VideoMode::Dhgr).then(zero_grid),
            main_plan: None,
            aux_plan: None,
        }
    }

    pub fn memory(&self) -> &MemoryMap {
        &self.memory
    }

    pub fn aux_memory(&self) -> Option<&MemoryMap> {
        self.aux_memory.as_ref()
    }

    /// Sum of all pending update priorities, across banks.
    pub fn priority_total(&self) -> i64 {
        let sum = |grid: &PriorityGrid| -> i64 {
            grid.iter()
                .flat_map(|page| page.iter())
                .map(|&v| i64::from(v))
                .sum()
        };
        sum(&self.update_priority) + self.aux_update_priority.as_ref().map_or(0, sum)
    }

    /// Begin converging toward a new target frame.
    pub fn start_frame(&mut self, target: &TargetFrame) {
        log::debug!(
            "starting frame, residual priority {}",
            self.priority_total()
        );

        let main_target =
            PackedBitmap::from_memory(self.mode, &target.main, self.aux_memory.as_ref());
        self.main_plan = Some(self.build_plan(false, main_target));

        if self.mode == VideoMode::Dhgr {
            let aux = target.aux.as_ref().expect("DHGR target frame without AUX bank");
            let aux_target = PackedBitmap::from_memory(self.mode, &self.memory, Some(aux));
            self.aux_plan = Some(self.build_plan(true, aux_target));
        }
    }

    /// Select the next write for the active bank. Returns a no-op write
    /// once no improving opcode remains for this frame.
    pub fn next_write(&mut self, aux_bank: bool) -> TickWrite {
        debug_assert!(!aux_bank || self.mode == VideoMode::Dhgr);

        // The plan is detached from self while we mutate both.
        let mut plan = match if aux_bank {
            self.aux_plan.take()
        } else {
            self.main_plan.take()
        } {
            Some(plan) => plan,
            None => return self.pad_write(aux_bank),
        };

        let write = self.search(&mut plan);
        if aux_bank {
            self.aux_plan = Some(plan);
        } else {
            self.main_plan = Some(plan);
        }
        write
    }

    fn build_plan(&mut self, is_aux: bool, target_packed: PackedBitmap) -> FramePlan {
        let priority = if is_aux {
            self.aux_update_priority.as_mut().unwrap()
        } else {
            &mut self.update_priority
        };

        // Per-byte diff between reconstruction and target, at each byte's
        // window class. Screen holes stay zero.
        let mut diff_weights = zero_grid();
        for page in 0..PAGES {
            for offset in 0..PAGE_SIZE {
                if screen::is_hole(page, offset) {
                    continue;
                }
                let class = window::offset_class(self.mode, offset, is_aux);
                let source = window::window(self.packed.packed_for(page, offset), class);
                let target = window::window(target_packed.packed_for(page, offset), class);
                diff_weights[page][offset] = i32::from(self.tables.substitution(class, source, target));
            }
        }

        // Anything the new frame resolved by itself stops accruing
        // priority; everything else accumulates its residual error.
        let mut candidates = 0usize;
        for page in 0..PAGES {
            for offset in 0..PAGE_SIZE {
                let diff = diff_weights[page][offset];
                if diff == 0 {
                    priority[page][offset] = 0;
                } else {
                    priority[page][offset] = priority[page][offset].saturating_add(diff);
                    candidates += 1;
                }
            }
        }
        log::debug!("frame diff candidates: {}", candidates);

        // Signed edit distance per (content, page, offset): the error a
        // store of `content` would leave at the target window, minus the
        // accumulated priority.
        let mut edit = vec![0i32; CONTENT_RANGE * PAGES * PAGE_SIZE].into_boxed_slice();
        for page in 0..PAGES {
            for offset in 0..PAGE_SIZE {
                if screen::is_hole(page, offset) {
                    continue;
                }
                let class = window::offset_class(self.mode, offset, is_aux);
                let quad = target_packed.packed_for(page, offset);
                let target = window::window(quad, class);
                let pri = priority[page][offset];

                for content in 0..CONTENT_RANGE {
                    let stored =
                        window::window(window::masked_update(quad, class, content as u8), class);
                    debug_assert!(stored < (1 << WINDOW_BITS[class]));
                    let delta = i32::from(self.tables.error(class, stored, target));
                    edit[edit_index(content, page, offset)] = delta.saturating_sub(pri);
                }
            }
        }

        let mut smallest_idx = vec![[0u8; 4]; CONTENT_RANGE * PAGES].into_boxed_slice();
        let mut smallest_val = vec![[0i32; 4]; CONTENT_RANGE * PAGES].into_boxed_slice();
        for content in 0..CONTENT_RANGE {
            for page in 0..PAGES {
                let row = edit_row(&edit, content, page);
                let (idx, val) = partition4(row);
                smallest_idx[content * PAGES + page] = idx;
                smallest_val[content * PAGES + page] = val;
            }
        }

        FramePlan {
            is_aux,
            diff_weights,
            edit,
            smallest_idx,
            smallest_val,
            done: false,
        }
    }

    fn search(&mut self, plan: &mut FramePlan) -> TickWrite {
        if plan.done {
            return self.pad_write(plan.is_aux);
        }

        loop {
            // Best (content, page) by the sum of its four best offsets.
            let mut best_score = 0i64;
            let mut best = 0usize;
            for (cp, vals) in plan.smallest_val.iter().enumerate() {
                let score: i64 = vals.iter().map(|&v| i64::from(v)).sum();
                if score < best_score {
                    best_score = score;
                    best = cp;
                }
            }
            if best_score >= 0 {
                log::debug!("frame converged ({} bank)", if plan.is_aux { "aux" } else { "main" });
                plan.done = true;
                return self.pad_write(plan.is_aux);
            }

            let content = (best / PAGES) as u8;
            let page = best % PAGES;

            // Only offsets that still strictly improve are written.
            let mut offsets = [0u8; 4];
            let mut count = 0;
            for slot in 0..4 {
                if plan.smallest_val[best][slot] < 0 {
                    offsets[count] = plan.smallest_idx[best][slot];
                    count += 1;
                }
            }
            debug_assert!(count > 0);

            // A stale partition can still reference offsets an earlier
            // opcode already resolved; refresh it and retry the search.
            if offsets[..count]
                .iter()
                .any(|&o| plan.diff_weights[page][o as usize] == 0)
            {
                Self::repartition(plan, content as usize, page);
                continue;
            }

            let priority = if plan.is_aux {
                self.aux_update_priority.as_mut().unwrap()
            } else {
                &mut self.update_priority
            };
            let memory = if plan.is_aux {
                self.aux_memory.as_mut().unwrap()
            } else {
                &mut self.memory
            };

            for &o in &offsets[..count] {
                let o = o as usize;
                debug_assert!(!screen::is_hole(page, o));
                priority[page][o] = 0;
                plan.diff_weights[page][o] = 0;
                for c in 0..CONTENT_RANGE {
                    plan.edit[edit_index(c, page, o)] = 0;
                }

                memory.write(page, o, content);
                self.packed.apply(page, o, plan.is_aux, content);
            }

            // Pad to four stores; repeated writes are idempotent.
            for slot in count..4 {
                offsets[slot] = offsets[0];
            }

            // Cleared offsets (and quad-edge effects on neighbours) change
            // the 4-smallest picture for the whole page.
            for c in 0..CONTENT_RANGE {
                Self::repartition(plan, c, page);
            }

            return TickWrite {
                page: screen::PAGE_BASE + page as u8,
                content,
                offsets,
            };
        }
    }

    fn repartition(plan: &mut FramePlan, content: usize, page: usize) {
        let row = edit_row(&plan.edit, content, page);
        let (idx, val) = partition4(row);
        plan.smallest_idx[content * PAGES + page] = idx;
        plan.smallest_val[content * PAGES + page] = val;
    }

    /// Explicit no-op: rewrite the first visible byte with its current
    /// contents.
    fn pad_write(&self, aux_bank: bool) -> TickWrite {
        let memory = if aux_bank {
            self.aux_memory.as_ref().unwrap()
        } else {
            &self.memory
        };
        TickWrite {
            page: screen::PAGE_BASE,
            content: memory.get(0, 0),
            offsets: [0; 4],
        }
    }
}

fn zero_grid() -> PriorityGrid {
    Box::new([[0i32; PAGE_SIZE]; PAGES])
}

fn edit_index(content: usize, page: usize, offset: usize) -> usize {
    (content * PAGES + page) * PAGE_SIZE + offset
}

fn edit_row(edit: &[i32], content: usize, page: usize) -> &[i32] {
    let start = (content * PAGES + page) * PAGE_SIZE;
    &edit[start..start + PAGE_SIZE]
}

/// Indices and values of the four smallest entries of a page row. Order
/// within the four is unspecified; ties keep the lowest offsets.
fn partition4(row: &[i32]) -> ([u8; 4], [i32; 4]) {
    let mut idx = [0u8, 1, 2, 3];
    let mut val = [row[0], row[1], row[2], row[3]];

    for (o, &v) in row.iter().enumerate().skip(4) {
        // Replace the current worst if this entry beats it.
        let mut worst = 0;
        for slot in 1..4 {
            if val[slot] > val[worst] {
                worst = slot;
            }
        }
        if v < val[worst] {
            val[worst] = v;
            idx[worst] = o as u8;
        }
    }

    (idx, val)
}

#[cfg(test)]
pub(crate) mod testutil {
    use crate::dist::TableSet;
    use crate::mode::{Palette, VideoMode};
    use crate::window::WINDOW_BITS;

    /// Synthetic tables: popcount of the window XOR, error variant 5x. Keeps
    /// scheduler and muxer tests independent of the (slow to build)
    /// perceptual model.
    pub(crate) fn popcount_tables(mode: VideoMode) -> TableSet {
        let make = |scale: u16| -> [Vec<u16>; 4] {
            let mut tables: [Vec<u16>; 4] = Default::default();
            for (class, table) in tables.iter_mut().enumerate() {
                let n = 1usize << WINDOW_BITS[class];
                *table = (0..n * n)
                    .map(|i| {
                        let (s, t) = (i >> WINDOW_BITS[class], i & (n - 1));
                        scale * (s ^ t).count_ones() as u16
                    })
                    .collect();
            }
            tables
        };
        TableSet::from_parts(mode, Palette::Ntsc, make(1), make(5))
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::popcount_tables;
    use super::*;

    #[test]
    fn test_partition4_picks_smallest() {
        let mut row = vec![0i32; PAGE_SIZE];
        row[10] = -5;
        row[20] = -1;
        row[200] = -7;
        let (idx, val) = partition4(&row);

        let mut pairs: Vec<(u8, i32)> = idx.iter().copied().zip(val.iter().copied()).collect();
        pairs.sort_by_key(|&(_, v)| v);
        assert_eq!(pairs[0], (200, -7));
        assert_eq!(pairs[1], (10, -5));
        assert_eq!(pairs[2], (20, -1));
        assert_eq!(pairs[3].1, 0);
    }

    fn one_byte_target(page: usize, offset: usize, value: u8) -> TargetFrame {
        let mut main = MemoryMap::new(1);
        main.write(page, offset, value);
        TargetFrame::new(VideoMode::Hgr, main, None)
    }

    #[test]
    fn test_single_byte_converges_in_one_write() {
        let tables = popcount_tables(VideoMode::Hgr);
        let mut scheduler = Scheduler::new(VideoMode::Hgr, &tables);

        scheduler.start_frame(&one_byte_target(0, 0, 0x03));
        let write = scheduler.next_write(false);
        assert_eq!(write.page, 32);
        assert_eq!(write.content, 0x03);
        assert_eq!(write.offsets, [0; 4]);
        assert_eq!(scheduler.memory().get(0, 0), 0x03);

        // Converged: everything further is the explicit no-op.
        let pad = scheduler.next_write(false);
        assert_eq!(pad, TickWrite { page: 32, content: 0x03, offsets: [0; 4] });
        assert_eq!(scheduler.priority_total(), 0);
    }

    #[test]
    fn test_black_frame_emits_no_writes() {
        let tables = popcount_tables(VideoMode::Hgr);
        let mut scheduler = Scheduler::new(VideoMode::Hgr, &tables);

        scheduler.start_frame(&TargetFrame::new(VideoMode::Hgr, MemoryMap::new(1), None));
        let write = scheduler.next_write(false);
        assert_eq!(write, TickWrite { page: 32, content: 0, offsets: [0; 4] });
    }

    #[test]
    fn test_residual_priority_carries_across_frames() {
        let tables = popcount_tables(VideoMode::Hgr);
        let mut scheduler = Scheduler::new(VideoMode::Hgr, &tables);

        let target = one_byte_target(5, 17, 0x7f);
        scheduler.start_frame(&target);
        // Pull no writes this frame; the diff must roll into the next one.
        scheduler.start_frame(&target);

        // Priority doubled, so the fix is still preferred and found first.
        let write = scheduler.next_write(false);
        assert_eq!(write.page, 37);
        assert_eq!(write.content, 0x7f);
        assert_eq!(write.offsets[0], 17);

        // Draining the frame clears the neighbour-window residuals too.
        for _ in 0..16 {
            scheduler.next_write(false);
        }
        assert_eq!(scheduler.priority_total(), 0);
    }

    #[test]
    fn test_writes_never_touch_holes() {
        let tables = popcount_tables(VideoMode::Hgr);
        let mut scheduler = Scheduler::new(VideoMode::Hgr, &tables);

        // A busy target touching every visible byte around the holes.
        let mut main = MemoryMap::new(1);
        for page in 0..PAGES {
            for offset in 0..PAGE_SIZE {
                if !screen::is_hole(page, offset) {
                    main.write(page, offset, 0x55);
                }
            }
        }
        scheduler.start_frame(&TargetFrame::new(VideoMode::Hgr, main, None));

        for _ in 0..2000 {
            let write = scheduler.next_write(false);
            for &o in &write.offsets {
                assert!(!screen::is_hole((write.page - 32) as usize, o as usize));
            }
        }
    }

    #[test]
    fn test_dhgr_schedules_banks_independently() {
        let tables = popcount_tables(VideoMode::Dhgr);
        let mut scheduler = Scheduler::new(VideoMode::Dhgr, &tables);

        let mut aux = MemoryMap::new(1);
        aux.write(0, 0, 0x0f);
        let target = TargetFrame::new(VideoMode::Dhgr, MemoryMap::new(1), Some(aux));
        scheduler.start_frame(&target);

        // The MAIN bank has nothing to do; the AUX bank fixes its byte.
        let main = scheduler.next_write(false);
        assert_eq!(main, TickWrite { page: 32, content: 0, offsets: [0; 4] });

        let write = scheduler.next_write(true);
        assert_eq!(write.page, 32);
        assert_eq!(write.content, 0x0f);
        assert_eq!(write.offsets[0], 0);
        assert_eq!(scheduler.aux_memory().unwrap().get(0, 0), 0x0f);
        assert_eq!(scheduler.memory().get(0, 0), 0);
    }

    #[test]
    fn test_priority_total_non_increasing_within_frame() {
        let tables = popcount_tables(VideoMode::Hgr);
        let mut scheduler = Scheduler::new(VideoMode::Hgr, &tables);

        let mut main = MemoryMap::new(1);
        for offset in [0usize, 1, 39, 40, 80, 119] {
            main.write(0, offset, 0x2a);
        }
        scheduler.start_frame(&TargetFrame::new(VideoMode::Hgr, main, None));

        let mut last = scheduler.priority_total();
        for _ in 0..64 {
            scheduler.next_write(false);
            let now = scheduler.priority_total();
            assert!(now <= last);
            last = now;
        }
        assert_eq!(last, 0);
    }
}

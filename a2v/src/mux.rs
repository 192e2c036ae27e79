//! Multiplexes the audio tick stream and the video convergence schedule
//! into the output byte stream.
//!
//! One tick opcode is emitted per audio sample; the sample picks the opcode
//! row (tick cycles) and the scheduler picks the column (page) plus the
//! content and offsets. The player drains the stream in fixed 2048-byte
//! blocks over its socket, and every block must end exactly on an ACK.

use std::io::Write;

use crate::audio;
use crate::dist::TableSet;
use crate::error::Result;
use crate::frames::FrameSource;
use crate::mode::VideoMode;
use crate::opcode::{Opcode, OpcodeTable, TICK_CYCLES};
use crate::scheduler::Scheduler;

/// Socket buffer size of the player; the stream is framed to it.
pub const BLOCK_SIZE: u64 = 2048;

/// Free-running CPU cycle count of the player, advanced by the cost of each
/// emitted opcode. This is the only synchronization between audio time and
/// video time.
#[derive(Debug, Default)]
pub struct CycleCounter {
    cycles: u64,
}

impl CycleCounter {
    pub fn new() -> Self {
        CycleCounter::default()
    }

    pub fn tick(&mut self, cycles: u32) {
        self.cycles += u64::from(cycles);
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }
}

/// Encoder tuning knobs.
#[derive(Debug, Clone, Default)]
pub struct EncoderOpts {
    /// Stop emitting after this many output bytes (terminator included).
    pub max_bytes_out: Option<u64>,
    /// Re-target only every nth input frame; skipped frames keep converging
    /// toward the previous target, which can look better for noisy input.
    pub every_n_frames: u32,
}

/// Drives the whole pipeline: audio in, frames in, opcode bytes out.
pub struct Encoder<'t> {
    mode: VideoMode,
    opcodes: OpcodeTable,
    scheduler: Scheduler<'t>,
    counter: CycleCounter,
    opts: EncoderOpts,
    stream_pos: u64,
    aux_bank: bool,
    buf: Vec<u8>,
}

impl<'t> Encoder<'t> {
    pub fn new(tables: &'t TableSet, opcodes: OpcodeTable, opts: EncoderOpts) -> Self {
        Encoder {
            mode: tables.mode(),
            opcodes,
            scheduler: Scheduler::new(tables.mode(), tables),
            counter: CycleCounter::new(),
            opts,
            stream_pos: 0,
            aux_bank: false,
            buf: Vec::with_capacity(8),
        }
    }

    /// Encode until the audio ends or the byte budget is reached. Returns
    /// the total bytes written, always a multiple of the block size.
    pub fn encode<A, F, W>(&mut self, audio_ticks: A, frames: &mut F, out: &mut W) -> Result<u64>
    where
        A: IntoIterator<Item = i8>,
        F: FrameSource + ?Sized,
        W: Write,
    {
        let cycles_per_frame = f64::from(audio::CPU_HZ) / frames.frame_rate();
        let every_n = self.opts.every_n_frames.max(1) as u64;
        log::info!(
            "encoding {}: {:.3} frames/s, {} cycles per frame",
            self.mode.name(),
            frames.frame_rate(),
            cycles_per_frame as u64
        );

        self.emit_op(&Opcode::Header { mode: self.mode }, out)?;

        let mut frame_number: u64 = 0;
        for sample in audio_ticks {
            if let Some(max) = self.opts.max_bytes_out {
                if self.stream_pos >= max {
                    log::info!("output byte budget reached at {} bytes", self.stream_pos);
                    break;
                }
            }

            // Frame advance is driven purely by the cycle counter; the tick
            // about to be emitted belongs to whichever frame it lands in.
            let after_tick = self.counter.cycles() + u64::from(TICK_CYCLES);
            if after_tick as f64 >= cycles_per_frame * frame_number as f64 {
                frame_number += 1;
                if let Some(frame) = frames.next_frame()? {
                    if (frame_number - 1) % every_n == 0 {
                        log::debug!("starting frame {}", frame_number);
                        self.scheduler.start_frame(&frame);
                    }
                }
                // A drained frame source leaves the scheduler converging
                // toward its last target for the rest of the audio.
            }

            self.pace_block(out)?;

            let write = self.scheduler.next_write(self.aux_bank);
            self.emit_op(
                &Opcode::Tick {
                    tick_cycles: audio::tick_cycles(sample),
                    page: write.page,
                    content: write.content,
                    offsets: write.offsets,
                },
                out,
            )?;
        }

        self.finish(out)?;
        Ok(self.stream_pos)
    }

    /// Keep the block boundary reachable before emitting a 7-byte tick
    /// opcode: once the remaining room cannot hold the tick and still reach
    /// the boundary with 2-byte NOPs plus the 4-byte ACK, pad out the block
    /// and acknowledge it.
    fn pace_block<W: Write>(&mut self, out: &mut W) -> Result<()> {
        let room = BLOCK_SIZE - self.stream_pos % BLOCK_SIZE;
        if room >= 18 || (room >= 11 && room % 2 == 1) {
            return Ok(());
        }

        while BLOCK_SIZE - self.stream_pos % BLOCK_SIZE > 4 {
            self.emit_op(&Opcode::Nop, out)?;
        }

        // The ACK doubles as the bank flip in DHGR: the player switches
        // which memory bank subsequent stores hit.
        if self.mode == VideoMode::Dhgr {
            self.aux_bank = !self.aux_bank;
        }
        self.emit_op(&Opcode::Ack, out)?;
        debug_assert_eq!(self.stream_pos % BLOCK_SIZE, 0);
        Ok(())
    }

    /// Terminate the stream and zero-pad so the player drains a complete
    /// final buffer.
    fn finish<W: Write>(&mut self, out: &mut W) -> Result<()> {
        self.emit_op(&Opcode::Terminate, out)?;

        let pad = (BLOCK_SIZE - self.stream_pos % BLOCK_SIZE) % BLOCK_SIZE;
        for _ in 0..pad {
            out.write_all(&[0x00])?;
        }
        self.stream_pos += pad;

        log::info!(
            "stream complete: {} bytes, {} cycles",
            self.stream_pos,
            self.counter.cycles()
        );
        Ok(())
    }

    fn emit_op<W: Write>(&mut self, op: &Opcode, out: &mut W) -> Result<()> {
        self.buf.clear();
        self.opcodes.emit(op, &mut self.buf);
        out.write_all(&self.buf)?;
        self.stream_pos += op.wire_len();
        self.counter.tick(op.cycles());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::{FrameSource, TargetFrame};
    use crate::opcode::testutil::test_symbols;
    use crate::scheduler::testutil::popcount_tables;
    use crate::screen::MemoryMap;

    /// Frame source repeating one target forever.
    struct Repeat {
        rate: f64,
        frame: TargetFrame,
    }

    impl Repeat {
        fn black(rate: f64) -> Self {
            Repeat {
                rate,
                frame: TargetFrame::new(VideoMode::Hgr, MemoryMap::new(1), None),
            }
        }
    }

    impl FrameSource for Repeat {
        fn frame_rate(&self) -> f64 {
            self.rate
        }

        fn next_frame(&mut self) -> std::io::Result<Option<TargetFrame>> {
            Ok(Some(self.frame.clone()))
        }
    }

    fn encode_silence(samples: usize) -> Vec<u8> {
        let tables = popcount_tables(VideoMode::Hgr);
        let opcodes = OpcodeTable::from_symbols(&test_symbols()).unwrap();
        let mut encoder = Encoder::new(&tables, opcodes, EncoderOpts::default());
        let mut out = Vec::new();
        encoder
            .encode(
                std::iter::repeat(0i8).take(samples),
                &mut Repeat::black(30.0),
                &mut out,
            )
            .unwrap();
        out
    }

    #[test]
    fn test_silent_black_stream_shape() {
        let out = encode_silence(10);
        let opcodes = OpcodeTable::from_symbols(&test_symbols()).unwrap();

        // Header first.
        let mut expect = Vec::new();
        opcodes.emit(&Opcode::Header { mode: VideoMode::Hgr }, &mut expect);
        assert_eq!(&out[..4], &expect[..]);

        // Ten identical no-op ticks at 34 cycles (sample 0), page 32.
        expect.clear();
        opcodes.emit(
            &Opcode::Tick {
                tick_cycles: 34,
                page: 32,
                content: 0,
                offsets: [0; 4],
            },
            &mut expect,
        );
        for i in 0..10 {
            assert_eq!(&out[4 + 7 * i..4 + 7 * (i + 1)], &expect[..]);
        }

        // Terminator and zero padding to the block boundary.
        expect.clear();
        opcodes.emit(&Opcode::Terminate, &mut expect);
        assert_eq!(&out[74..76], &expect[..]);
        assert!(out[76..].iter().all(|&b| b == 0));
        assert_eq!(out.len() as u64, BLOCK_SIZE);
    }

    #[test]
    fn test_every_block_ends_on_ack() {
        let out = encode_silence(1000);
        let opcodes = OpcodeTable::from_symbols(&test_symbols()).unwrap();

        let mut ack = Vec::new();
        opcodes.emit(&Opcode::Ack, &mut ack);

        assert!(out.len() as u64 > 3 * BLOCK_SIZE);
        assert_eq!(out.len() as u64 % BLOCK_SIZE, 0);

        let blocks = out.len() / BLOCK_SIZE as usize;
        for block in 0..blocks - 1 {
            let end = (block + 1) * BLOCK_SIZE as usize;
            assert_eq!(&out[end - 4..end], &ack[..], "block {} missing ACK", block);
        }
        // The last block ends in zero padding after TERMINATE instead.
        assert_eq!(*out.last().unwrap(), 0);
    }

    #[test]
    fn test_byte_budget_terminates_stream() {
        let tables = popcount_tables(VideoMode::Hgr);
        let opcodes = OpcodeTable::from_symbols(&test_symbols()).unwrap();
        let mut encoder = Encoder::new(
            &tables,
            opcodes,
            EncoderOpts {
                max_bytes_out: Some(3000),
                every_n_frames: 1,
            },
        );
        let mut out = Vec::new();
        let written = encoder
            .encode(
                std::iter::repeat(0i8).take(100_000),
                &mut Repeat::black(30.0),
                &mut out,
            )
            .unwrap();

        // Budget cuts the stream far short of the audio length.
        assert_eq!(written, out.len() as u64);
        assert!(written >= 3000 && written <= 3000 + 2 * BLOCK_SIZE);
        assert_eq!(written % BLOCK_SIZE, 0);
    }

    #[test]
    fn test_single_pixel_first_opcode() {
        let tables = popcount_tables(VideoMode::Hgr);
        let opcodes = OpcodeTable::from_symbols(&test_symbols()).unwrap();
        let mut encoder = Encoder::new(&tables, opcodes, EncoderOpts::default());

        let mut main = MemoryMap::new(1);
        main.write(0, 0, 0x03);
        let mut frames = Repeat {
            rate: 30.0,
            frame: TargetFrame::new(VideoMode::Hgr, main, None),
        };

        let mut out = Vec::new();
        encoder
            .encode(std::iter::repeat(0i8).take(4), &mut frames, &mut out)
            .unwrap();

        let opcodes = OpcodeTable::from_symbols(&test_symbols()).unwrap();
        let mut expect = Vec::new();
        opcodes.emit(
            &Opcode::Tick {
                tick_cycles: 34,
                page: 32,
                content: 0x03,
                offsets: [0; 4],
            },
            &mut expect,
        );
        assert_eq!(&out[4..11], &expect[..]);
    }

    #[test]
    fn test_deterministic_output() {
        assert_eq!(encode_silence(500), encode_silence(500));
    }
}

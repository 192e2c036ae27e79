//! Player opcodes and their wire encoding.
//!
//! Every opcode on the wire is the big-endian entry address of its player
//! routine followed by the routine's operand bytes; the player "decodes" the
//! stream by jumping to each address in turn. Tick opcodes exist once per
//! `(tick_cycles, page)` combination so that neither quantity needs an
//! operand byte.

use std::collections::HashMap;

use crate::error::{EncodeError, Result};
use crate::mode::VideoMode;

/// Cycle cost of every tick opcode variant; the audio sample period.
pub const TICK_CYCLES: u32 = crate::audio::CYCLES_PER_TICK;
/// Cycle cost of the stream header.
pub const HEADER_CYCLES: u32 = 14;
/// Cycle cost of `TERMINATE`.
pub const TERMINATE_CYCLES: u32 = 6;
// TODO: measure op_nop/op_ack against the real player binary; these came
// from an early build and have not been re-counted since the socket code
// changed.
/// Cycle cost of `NOP`.
pub const NOP_CYCLES: u32 = 11;
/// Cycle cost of `ACK`.
pub const ACK_CYCLES: u32 = 100;

/// Smallest legal tick cycle count.
pub const TICK_MIN: u8 = 4;
/// Largest legal tick cycle count.
pub const TICK_MAX: u8 = 66;
/// First display page a tick opcode can address.
pub const PAGE_MIN: u8 = 32;
/// Number of addressable display pages.
pub const PAGE_COUNT: usize = 32;

const TICK_VARIANTS: usize = ((TICK_MAX - TICK_MIN) / 2) as usize + 1;

/// One stream opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// Stream preamble carrying the display-mode tag.
    Header { mode: VideoMode },
    /// Store `content` at four offsets of `page`, then toggle the speaker
    /// after `tick_cycles` cycles.
    Tick {
        tick_cycles: u8,
        page: u8,
        content: u8,
        offsets: [u8; 4],
    },
    /// Padding before a buffer boundary.
    Nop,
    /// End-of-buffer acknowledgement; the player refills its socket buffer.
    Ack,
    /// End of stream.
    Terminate,
}

impl Opcode {
    /// Encoded size in bytes, including the two address bytes.
    pub fn wire_len(&self) -> u64 {
        match self {
            Opcode::Header { .. } => 4,
            Opcode::Tick { .. } => 7,
            Opcode::Nop => 2,
            Opcode::Ack => 4,
            Opcode::Terminate => 2,
        }
    }

    /// Player cycle cost of executing this opcode.
    pub fn cycles(&self) -> u32 {
        match self {
            Opcode::Header { .. } => HEADER_CYCLES,
            Opcode::Tick { .. } => TICK_CYCLES,
            Opcode::Nop => NOP_CYCLES,
            Opcode::Ack => ACK_CYCLES,
            Opcode::Terminate => TERMINATE_CYCLES,
        }
    }
}

/// Entry addresses of every opcode routine, resolved once at startup from
/// the player's symbol table.
pub struct OpcodeTable {
    tick: [[u16; PAGE_COUNT]; TICK_VARIANTS],
    header: u16,
    nop: u16,
    ack: u16,
    terminate: u16,
}

impl OpcodeTable {
    /// Resolve all required opcode symbols. A missing symbol is fatal: the
    /// stream cannot address a routine the player does not export.
    pub fn from_symbols(syms: &HashMap<String, u16>) -> Result<Self> {
        let require = |name: &str| -> Result<u16> {
            syms.get(name)
                .copied()
                .ok_or_else(|| EncodeError::MissingSymbol { name: name.into() })
        };

        let mut tick = [[0u16; PAGE_COUNT]; TICK_VARIANTS];
        for (t, row) in tick.iter_mut().enumerate() {
            let cycles = TICK_MIN as usize + 2 * t;
            for (p, addr) in row.iter_mut().enumerate() {
                let page = PAGE_MIN as usize + p;
                *addr = require(&format!("op_tick_{}_page_{}", cycles, page))?;
            }
        }

        Ok(OpcodeTable {
            tick,
            header: require("op_header")?,
            nop: require("op_nop")?,
            ack: require("op_ack")?,
            terminate: require("op_terminate")?,
        })
    }

    /// Entry address for an opcode.
    pub fn address(&self, op: &Opcode) -> u16 {
        match *op {
            Opcode::Header { .. } => self.header,
            Opcode::Tick {
                tick_cycles, page, ..
            } => {
                debug_assert!(
                    tick_cycles >= TICK_MIN && tick_cycles <= TICK_MAX && tick_cycles % 2 == 0
                );
                debug_assert!(page >= PAGE_MIN && (page as usize) < PAGE_MIN as usize + PAGE_COUNT);
                self.tick[((tick_cycles - TICK_MIN) / 2) as usize][(page - PAGE_MIN) as usize]
            }
            Opcode::Nop => self.nop,
            Opcode::Ack => self.ack,
            Opcode::Terminate => self.terminate,
        }
    }

    /// Append the opcode's wire bytes.
    pub fn emit(&self, op: &Opcode, out: &mut Vec<u8>) {
        let addr = self.address(op);
        out.push((addr >> 8) as u8);
        out.push((addr & 0xff) as u8);

        match *op {
            Opcode::Header { mode } => {
                out.push(mode.tag());
                out.push(0xff);
            }
            Opcode::Tick {
                content, offsets, ..
            } => {
                out.push(content);
                out.extend_from_slice(&offsets);
            }
            Opcode::Ack => {
                // Dummy bytes padding out the TCP frame.
                out.push(0xff);
                out.push(0xff);
            }
            Opcode::Nop | Opcode::Terminate => {}
        }
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    /// Synthetic symbol table covering every opcode routine.
    pub(crate) fn test_symbols() -> HashMap<String, u16> {
        let mut syms = HashMap::new();
        syms.insert("op_header".into(), 0x8000);
        syms.insert("op_nop".into(), 0x8004);
        syms.insert("op_ack".into(), 0x8008);
        syms.insert("op_terminate".into(), 0x800c);
        let mut addr = 0x8100u16;
        for cycles in (TICK_MIN..=TICK_MAX).step_by(2) {
            for page in PAGE_MIN..PAGE_MIN + PAGE_COUNT as u8 {
                syms.insert(format!("op_tick_{}_page_{}", cycles, page), addr);
                addr += 3;
            }
        }
        syms
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::test_symbols;
    use super::*;

    #[test]
    fn test_missing_symbol_is_fatal() {
        let mut syms = test_symbols();
        syms.remove("op_tick_34_page_40");
        match OpcodeTable::from_symbols(&syms) {
            Err(EncodeError::MissingSymbol { name }) => {
                assert_eq!(name, "op_tick_34_page_40");
            }
            other => panic!("expected MissingSymbol, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_tick_addresses_distinct() {
        let table = OpcodeTable::from_symbols(&test_symbols()).unwrap();
        let a = table.address(&Opcode::Tick {
            tick_cycles: 4,
            page: 32,
            content: 0,
            offsets: [0; 4],
        });
        let b = table.address(&Opcode::Tick {
            tick_cycles: 6,
            page: 32,
            content: 0,
            offsets: [0; 4],
        });
        let c = table.address(&Opcode::Tick {
            tick_cycles: 4,
            page: 33,
            content: 0,
            offsets: [0; 4],
        });
        assert!(a != b && a != c && b != c);
    }

    #[test]
    fn test_wire_forms() {
        let table = OpcodeTable::from_symbols(&test_symbols()).unwrap();

        let mut out = Vec::new();
        table.emit(&Opcode::Header { mode: VideoMode::Hgr }, &mut out);
        assert_eq!(out, [0x80, 0x00, 0x00, 0xff]);

        out.clear();
        let tick = Opcode::Tick {
            tick_cycles: 4,
            page: 32,
            content: 0x55,
            offsets: [1, 2, 3, 4],
        };
        table.emit(&tick, &mut out);
        assert_eq!(out[..2], [0x81, 0x00]);
        assert_eq!(out[2..], [0x55, 1, 2, 3, 4]);
        assert_eq!(out.len() as u64, tick.wire_len());

        out.clear();
        table.emit(&Opcode::Ack, &mut out);
        assert_eq!(out, [0x80, 0x08, 0xff, 0xff]);

        out.clear();
        table.emit(&Opcode::Terminate, &mut out);
        assert_eq!(out, [0x80, 0x0c]);
        assert_eq!(Opcode::Nop.wire_len(), 2);
    }
}

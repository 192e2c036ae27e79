//! Encoder core for streaming video to a 1 MHz Apple II class machine.
//!
//! The encoder multiplexes a resampled audio envelope and a sequence of
//! target display-memory images into a single byte stream of "tick opcodes":
//! each opcode stores four bytes into display memory and toggles the speaker
//! after a cycle count that encodes one audio sample. See [`mux::Encoder`]
//! for the top of the pipeline.

pub mod audio;
pub mod cache;
pub mod colour;
pub mod dist;
pub mod error;
pub mod frames;
pub mod mode;
pub mod mux;
pub mod opcode;
pub mod scheduler;
pub mod screen;
pub mod symbols;
pub mod window;

pub use error::{EncodeError, Result};
pub use mode::{Palette, VideoMode};

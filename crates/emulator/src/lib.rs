//! fpvm-emulator: deterministic MIPS32 fraud-proof emulator core.
//!
//! This crate provides:
//! - The machine [`State`] with its canonical, Keccak-hashed witness encoding
//! - Sparse Merkle-paged guest [`memory`]
//! - The single-instruction step executor ([`InstrumentedState`]) with
//!   per-step [`StepWitness`] emission
//! - The pre-image oracle consumption trait ([`PreimageOracle`])
//! - The [`disasm`] disassembler and the step-pattern [`matcher`] DSL used
//!   by the run loop
//!
//! Determinism contract: identical initial state plus identical oracle
//! responses produce byte-identical state encodings — and therefore
//! identical state hashes and witnesses — at every step, across
//! implementations.

pub mod disasm;
pub mod error;
pub mod hexser;
pub mod logwriter;
pub mod matcher;
pub mod memory;
pub mod meta;
pub mod mips;
pub mod page;
pub mod state;
pub mod witness;

pub use error::EmulatorError;
pub use logwriter::LoggingWriter;
pub use matcher::StepPattern;
pub use memory::{Memory, MEM_PROOF_SIZE};
pub use meta::Metadata;
pub use mips::{InstrumentedState, PreimageOracle};
pub use state::{State, STATE_WITNESS_SIZE};
pub use witness::StepWitness;

use std::fmt;

/// Compute a Keccak-256 hash.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    use tiny_keccak::{Hasher, Keccak};
    let mut hasher = Keccak::v256();
    let mut output = [0u8; 32];
    hasher.update(data);
    hasher.finalize(&mut output);
    output
}

/// Display wrapper printing a word as `0x…` hex.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HexU32(pub u32);

impl fmt::Display for HexU32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

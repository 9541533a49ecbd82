//! Emulator errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmulatorError {
    #[error("unaligned memory access at address {addr:#010x}")]
    UnalignedAccess { addr: u32 },

    #[error("invalid instruction at pc={pc:#010x}: {insn:#010x}")]
    InvalidInstruction { pc: u32, insn: u32 },

    #[error("{kind} in delay slot at pc={pc:#010x}")]
    DelaySlot { kind: &'static str, pc: u32 },

    #[error("division by zero at pc={pc:#010x}")]
    DivisionByZero { pc: u32 },

    #[error("unexpected second memory access at {addr:#010x}, proof already tracks {tracked:#010x}")]
    MultipleMemAccess { addr: u32, tracked: u32 },

    #[error("no pre-image oracle available to serve key 0x{}", hex::encode(.key))]
    NoOracle { key: [u8; 32] },

    #[error("pre-image oracle request failed: {0}")]
    OracleIo(#[source] std::io::Error),

    #[error("pre-image offset {offset} out of range for pre-image of {size} bytes")]
    PreimageOffsetOutOfRange { offset: u32, size: usize },

    #[error("failed to write guest output: {0}")]
    GuestOutput(#[source] std::io::Error),

    #[error("cannot encode pre-image oracle input: witness has no pre-image")]
    MissingPreimage,
}

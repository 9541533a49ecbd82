//! Machine state and its canonical witness encoding.

use serde::{Deserialize, Serialize};

use crate::hexser;
use crate::memory::Memory;

/// Byte length of the canonical state encoding.
pub const STATE_WITNESS_SIZE: usize = 226;

/// The full MIPS32 machine state.
///
/// The JSON form below is a persistence convenience; the authoritative
/// encoding for hashing and witnesses is [`State::encode_witness`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct State {
    pub memory: Memory,

    /// Content address of the pre-image currently being read, zero when none.
    #[serde(rename = "preimageKey", with = "hexser::b32")]
    pub preimage_key: [u8; 32],
    /// Read position within the current pre-image, including its 8-byte
    /// length prefix.
    #[serde(rename = "preimageOffset")]
    pub preimage_offset: u32,

    /// Address of the next instruction to execute.
    pub pc: u32,
    /// Delayed-branch slot target.
    #[serde(rename = "nextPC")]
    pub next_pc: u32,
    pub lo: u32,
    pub hi: u32,

    /// Bump pointer for guest `mmap` allocation.
    pub heap: u32,

    #[serde(rename = "exitCode")]
    pub exit_code: u8,
    pub exited: bool,

    /// Number of completed instructions.
    pub step: u64,

    pub registers: [u32; 32],

    /// Buffered hint bytes (u32-BE length prefix included). The buffer may
    /// hold an incomplete hint across steps, so it is persisted; it is not
    /// part of the hashed encoding.
    #[serde(
        rename = "lastHint",
        with = "hexser::bytes",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub last_hint: Vec<u8>,
}

impl State {
    pub fn new() -> Self {
        Self {
            memory: Memory::new(),
            preimage_key: [0u8; 32],
            preimage_offset: 0,
            pc: 0,
            next_pc: 4,
            lo: 0,
            hi: 0,
            heap: 0,
            exit_code: 0,
            exited: false,
            step: 0,
            registers: [0u32; 32],
            last_hint: Vec::new(),
        }
    }

    /// Canonical byte encoding of the state, the exact input to the state
    /// hash and the witness `state_input`. All multi-byte fields big-endian:
    ///
    /// `memory_root(32) ∥ preimage_key(32) ∥ preimage_offset(4) ∥ pc(4) ∥
    /// next_pc(4) ∥ lo(4) ∥ hi(4) ∥ heap(4) ∥ exit_code(1) ∥ exited(1) ∥
    /// step(8) ∥ registers[0..31](4×32)`
    pub fn encode_witness(&mut self) -> [u8; STATE_WITNESS_SIZE] {
        let mut out = [0u8; STATE_WITNESS_SIZE];
        out[..32].copy_from_slice(&self.memory.merkle_root());
        out[32..64].copy_from_slice(&self.preimage_key);
        out[64..68].copy_from_slice(&self.preimage_offset.to_be_bytes());
        out[68..72].copy_from_slice(&self.pc.to_be_bytes());
        out[72..76].copy_from_slice(&self.next_pc.to_be_bytes());
        out[76..80].copy_from_slice(&self.lo.to_be_bytes());
        out[80..84].copy_from_slice(&self.hi.to_be_bytes());
        out[84..88].copy_from_slice(&self.heap.to_be_bytes());
        out[88] = self.exit_code;
        out[89] = self.exited as u8;
        out[90..98].copy_from_slice(&self.step.to_be_bytes());
        for (i, reg) in self.registers.iter().enumerate() {
            out[98 + i * 4..102 + i * 4].copy_from_slice(&reg.to_be_bytes());
        }
        out
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keccak256;

    #[test]
    fn witness_layout() {
        let mut state = State::new();
        state.preimage_key = [0x11; 32];
        state.preimage_offset = 8;
        state.pc = 0x1000;
        state.next_pc = 0x1004;
        state.lo = 1;
        state.hi = 2;
        state.heap = 0x2000_0000;
        state.exit_code = 3;
        state.exited = true;
        state.step = 0x0102_0304_0506_0708;
        state.registers[31] = 0xdead_beef;

        let wit = state.encode_witness();
        assert_eq!(wit.len(), STATE_WITNESS_SIZE);
        assert_eq!(&wit[32..64], &[0x11; 32]);
        assert_eq!(&wit[64..68], &8u32.to_be_bytes());
        assert_eq!(&wit[68..72], &0x1000u32.to_be_bytes());
        assert_eq!(&wit[72..76], &0x1004u32.to_be_bytes());
        assert_eq!(wit[88], 3);
        assert_eq!(wit[89], 1);
        assert_eq!(&wit[90..98], &0x0102_0304_0506_0708u64.to_be_bytes());
        assert_eq!(&wit[222..226], &0xdead_beefu32.to_be_bytes());
    }

    #[test]
    fn json_round_trip_is_hash_stable() {
        let mut state = State::new();
        state.pc = 0x1000;
        state.next_pc = 0x1004;
        state.registers[8] = 42;
        state.memory.write_u32(0x1000, 0x2408_0001).unwrap();
        let hash = keccak256(&state.encode_witness());

        let json = serde_json::to_string(&state).unwrap();
        let mut back: State = serde_json::from_str(&json).unwrap();
        assert_eq!(keccak256(&back.encode_witness()), hash);
    }

    #[test]
    fn last_hint_omitted_when_empty() {
        let state = State::new();
        let json = serde_json::to_string(&state).unwrap();
        assert!(!json.contains("lastHint"));

        let mut state = State::new();
        state.last_hint = vec![0, 0, 0, 1, 0xab];
        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("\"lastHint\":\"0x00000001ab\""));
        let back: State = serde_json::from_str(&json).unwrap();
        assert_eq!(back.last_hint, vec![0, 0, 0, 1, 0xab]);
    }
}

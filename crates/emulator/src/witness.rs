//! Per-step witness: the byte input an on-chain verifier needs to replay
//! exactly one instruction.

use crate::error::EmulatorError;

/// Witness for a single executed step.
#[derive(Clone, Debug, Default)]
pub struct StepWitness {
    /// Canonical encoding of the pre-state.
    pub state: Vec<u8>,
    /// Merkle proofs for the memory words touched this step: always the
    /// instruction word at PC, then the loaded/stored word if any.
    pub mem_proof: Vec<u8>,
    /// Content address of the pre-image requested this step.
    pub preimage_key: Option<[u8; 32]>,
    /// Pre-image bytes as received from the oracle, 8-byte BE length prefix
    /// included.
    pub preimage_value: Option<Vec<u8>>,
    /// Byte offset within the pre-image addressed this step.
    pub preimage_offset: Option<u32>,
}

impl StepWitness {
    /// Whether the step consulted the pre-image oracle.
    pub fn has_preimage(&self) -> bool {
        self.preimage_key.is_some()
    }

    /// Verifier input for the state transition: `state_input ∥ mem_proof`.
    pub fn encode_step_input(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.state.len() + self.mem_proof.len());
        out.extend_from_slice(&self.state);
        out.extend_from_slice(&self.mem_proof);
        out
    }

    /// Verifier input for the oracle interaction:
    /// `key(32) ∥ offset(4 BE) ∥ value`, where `value` keeps its 8-byte BE
    /// length prefix.
    pub fn encode_preimage_oracle_input(&self) -> Result<Vec<u8>, EmulatorError> {
        let (Some(key), Some(value), Some(offset)) = (
            self.preimage_key.as_ref(),
            self.preimage_value.as_ref(),
            self.preimage_offset,
        ) else {
            return Err(EmulatorError::MissingPreimage);
        };
        let mut out = Vec::with_capacity(36 + value.len());
        out.extend_from_slice(key);
        out.extend_from_slice(&offset.to_be_bytes());
        out.extend_from_slice(value);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::STATE_WITNESS_SIZE;

    #[test]
    fn step_input_concatenates_state_and_proof() {
        let wit = StepWitness {
            state: vec![1u8; STATE_WITNESS_SIZE],
            mem_proof: vec![2u8; 64],
            ..Default::default()
        };
        let input = wit.encode_step_input();
        assert_eq!(input.len(), STATE_WITNESS_SIZE + 64);
        assert_eq!(input[STATE_WITNESS_SIZE - 1], 1);
        assert_eq!(input[STATE_WITNESS_SIZE], 2);
    }

    #[test]
    fn oracle_input_requires_preimage() {
        let wit = StepWitness::default();
        assert!(!wit.has_preimage());
        assert!(wit.encode_preimage_oracle_input().is_err());

        let wit = StepWitness {
            preimage_key: Some([7u8; 32]),
            preimage_value: Some(vec![0, 0, 0, 0, 0, 0, 0, 2, 0xaa, 0xbb]),
            preimage_offset: Some(8),
            ..Default::default()
        };
        let input = wit.encode_preimage_oracle_input().unwrap();
        assert_eq!(&input[..32], &[7u8; 32]);
        assert_eq!(&input[32..36], &8u32.to_be_bytes());
        assert_eq!(&input[36..], &[0, 0, 0, 0, 0, 0, 0, 2, 0xaa, 0xbb]);
    }
}

//! Witness generation, state hashing and the pre-image flow.

use std::collections::HashMap;
use std::io::sink;

use fpvm_emulator::{
    keccak256, EmulatorError, InstrumentedState, PreimageOracle, State, MEM_PROOF_SIZE,
    STATE_WITNESS_SIZE,
};

#[derive(Default)]
struct TestOracle {
    preimages: HashMap<[u8; 32], Vec<u8>>,
}

impl PreimageOracle for TestOracle {
    fn hint(&mut self, _hint: &[u8]) -> Result<(), EmulatorError> {
        Ok(())
    }

    fn get_preimage(&mut self, key: [u8; 32]) -> Result<Vec<u8>, EmulatorError> {
        self.preimages
            .get(&key)
            .cloned()
            .ok_or(EmulatorError::NoOracle { key })
    }
}

fn base_state(pc: u32, program: &[u32]) -> State {
    let mut state = State::new();
    state.pc = pc;
    state.next_pc = pc + 4;
    for (i, &insn) in program.iter().enumerate() {
        state.memory.write_u32(pc + 4 * i as u32, insn).unwrap();
    }
    state
}

fn vm_for(state: State, oracle: TestOracle) -> InstrumentedState<TestOracle> {
    InstrumentedState::new(state, oracle, Box::new(sink()), Box::new(sink()))
}

#[test]
fn witness_reproduces_pre_state_hash() {
    // addiu $t0, $zero, 1
    let mut state = base_state(0x1000, &[0x2408_0001]);
    let pre = keccak256(&state.encode_witness());

    let mut vm = vm_for(state, TestOracle::default());
    let wit = vm.step(true).unwrap();

    assert_eq!(wit.state.len(), STATE_WITNESS_SIZE);
    assert_eq!(keccak256(&wit.state), pre);
    // no data word touched: only the instruction proof
    assert_eq!(wit.mem_proof.len(), MEM_PROOF_SIZE);
    assert!(!wit.has_preimage());

    let post = keccak256(&vm.state.encode_witness());
    assert_ne!(post, pre);

    // step input is the concatenation of both parts
    let input = wit.encode_step_input();
    assert_eq!(input.len(), STATE_WITNESS_SIZE + MEM_PROOF_SIZE);
    assert_eq!(&input[..STATE_WITNESS_SIZE], &wit.state[..]);
}

#[test]
fn loads_add_a_second_memory_proof() {
    // lw $t2, 0($t0)
    let mut state = base_state(0x1000, &[0x8d0a_0000]);
    state.registers[8] = 0x3000;
    state.memory.write_u32(0x3000, 99).unwrap();

    let mut vm = vm_for(state, TestOracle::default());
    let wit = vm.step(true).unwrap();
    assert_eq!(wit.mem_proof.len(), 2 * MEM_PROOF_SIZE);
    assert_eq!(vm.state.registers[10], 99);
}

#[test]
fn fast_path_witness_is_empty() {
    let state = base_state(0x1000, &[0x2408_0001]);
    let mut vm = vm_for(state, TestOracle::default());
    let wit = vm.step(false).unwrap();
    assert!(wit.state.is_empty());
    assert!(wit.mem_proof.is_empty());
}

#[test]
fn two_runs_produce_identical_hashes() {
    let program = [
        0x2408_0005, // addiu $t0, $zero, 5
        0x2129_0003, // addi  $t1, $t1, 3
        0x0109_0018, // mult  $t0, $t1
        0x0000_5012, // mflo  $t2
        0xad0a_0000, // sw    $t2, 0($t0)
    ];
    let state = base_state(0x1000, &program);

    let run = |state: State| -> Vec<[u8; 32]> {
        let mut vm = vm_for(state, TestOracle::default());
        let mut hashes = Vec::new();
        for _ in 0..program.len() {
            vm.step(true).unwrap();
            hashes.push(keccak256(&vm.state.encode_witness()));
        }
        hashes
    };

    assert_eq!(run(state.clone()), run(state));
}

#[test]
fn preimage_read_flows_into_witness_and_memory() {
    let key = [0x42u8; 32];
    let value = b"hello pre-image".to_vec();
    let mut oracle = TestOracle::default();
    oracle.preimages.insert(key, value.clone());

    // read(fd=5, addr=0x3000, count=4)
    let mut state = base_state(0x1000, &[0x0000_000c]);
    state.preimage_key = key;
    state.preimage_offset = 8; // skip the length prefix
    state.registers[2] = 4003;
    state.registers[4] = 5;
    state.registers[5] = 0x3000;
    state.registers[6] = 4;

    let mut vm = vm_for(state, oracle);
    let wit = vm.step(true).unwrap();

    // the guest received the first 4 pre-image bytes
    assert_eq!(vm.state.memory.read_u32(0x3000).unwrap(), u32::from_be_bytes(*b"hell"));
    assert_eq!(vm.state.registers[2], 4); // bytes read
    assert_eq!(vm.state.preimage_offset, 12);

    // and the witness records the full oracle interaction
    assert!(wit.has_preimage());
    assert_eq!(wit.preimage_key, Some(key));
    assert_eq!(wit.preimage_offset, Some(8));
    // instruction proof plus the touched data word's proof
    assert_eq!(wit.mem_proof.len(), 2 * MEM_PROOF_SIZE);
    let prefixed = wit.preimage_value.unwrap();
    assert_eq!(&prefixed[..8], &(value.len() as u64).to_be_bytes());
    assert_eq!(&prefixed[8..], &value[..]);
}

#[test]
fn preimage_write_shifts_key_and_resets_offset() {
    // write(fd=6, addr=0x3000, count=4) four times builds up the key tail
    let mut state = base_state(
        0x1000,
        &[0x0000_000c, 0x0000_000c, 0x0000_000c, 0x0000_000c],
    );
    state.preimage_offset = 77;
    state.memory.write_u32(0x3000, 0x0102_0304).unwrap();

    let mut vm = vm_for(state, TestOracle::default());
    for _ in 0..4 {
        vm.state.registers[2] = 4004;
        vm.state.registers[4] = 6;
        vm.state.registers[5] = 0x3000;
        vm.state.registers[6] = 4;
        vm.step(false).unwrap();
        assert_eq!(vm.state.registers[2], 4);
    }
    // 16 bytes of 01 02 03 04 shifted in from the right
    assert_eq!(&vm.state.preimage_key[..16], &[0u8; 16]);
    assert_eq!(
        &vm.state.preimage_key[16..],
        &[1, 2, 3, 4, 1, 2, 3, 4, 1, 2, 3, 4, 1, 2, 3, 4]
    );
    assert_eq!(vm.state.preimage_offset, 0);
}

#[test]
fn missing_oracle_fails_the_step() {
    let mut state = base_state(0x1000, &[0x0000_000c]);
    state.preimage_key = [9u8; 32];
    state.registers[2] = 4003;
    state.registers[4] = 5;
    state.registers[5] = 0x3000;
    state.registers[6] = 4;

    let mut vm = vm_for(state, TestOracle::default());
    let err = vm.step(false).unwrap_err();
    assert!(matches!(err, EmulatorError::NoOracle { .. }));
    assert_eq!(vm.state.step, 0);
}

#[test]
fn oracle_input_encoding_matches_layout() {
    let key = [0x42u8; 32];
    let value = b"xy".to_vec();
    let mut oracle = TestOracle::default();
    oracle.preimages.insert(key, value);

    let mut state = base_state(0x1000, &[0x0000_000c]);
    state.preimage_key = key;
    state.registers[2] = 4003;
    state.registers[4] = 5;
    state.registers[5] = 0x3000;
    state.registers[6] = 4;

    let mut vm = vm_for(state, oracle);
    let wit = vm.step(true).unwrap();
    let input = wit.encode_preimage_oracle_input().unwrap();
    assert_eq!(&input[..32], &key);
    assert_eq!(&input[32..36], &0u32.to_be_bytes());
    assert_eq!(&input[36..44], &2u64.to_be_bytes());
    assert_eq!(&input[44..], b"xy");
}

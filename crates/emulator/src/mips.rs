//! Single-instruction MIPS32 step executor.
//!
//! [`InstrumentedState`] advances the machine [`State`] by exactly one
//! instruction per [`step`](InstrumentedState::step) call and can emit a
//! [`StepWitness`] capturing everything an independent verifier needs to
//! replay that one transition: the canonical pre-state encoding, Merkle
//! proofs for the touched memory words, and any pre-image consulted.
//!
//! # Execution model
//!
//! - Single guest thread, no interrupts, no floating point.
//! - Classic MIPS delayed branches: `pc` executes, `next_pc` holds the
//!   delay-slot target. Branching or jumping from within a delay slot is an
//!   error.
//! - Register 0 is never written.
//! - Syscalls cover the minimal Linux O32 surface a static guest needs:
//!   `mmap`/`brk`/`clone`/`exit_group`/`read`/`write`/`fcntl`. The pre-image
//!   oracle is reached through dedicated file descriptors on `read`/`write`.
//! - Determinism: identical pre-state plus identical oracle responses yield
//!   identical post-state and witness bytes.

use std::io::Write;

use crate::error::EmulatorError;
use crate::memory::MEM_PROOF_SIZE;
use crate::page::{PAGE_ADDR_MASK, PAGE_SIZE};
use crate::state::State;
use crate::witness::StepWitness;

/// File descriptors as seen by the guest.
pub mod fd {
    pub const STDIN: u32 = 0;
    pub const STDOUT: u32 = 1;
    pub const STDERR: u32 = 2;
    pub const HINT_READ: u32 = 3;
    pub const HINT_WRITE: u32 = 4;
    pub const PREIMAGE_READ: u32 = 5;
    pub const PREIMAGE_WRITE: u32 = 6;
}

/// Linux O32 syscall numbers.
mod sys {
    pub const READ: u32 = 4003;
    pub const WRITE: u32 = 4004;
    pub const BRK: u32 = 4045;
    pub const FCNTL: u32 = 4055;
    pub const MMAP: u32 = 4090;
    pub const CLONE: u32 = 4120;
    pub const EXIT_GROUP: u32 = 4246;
}

const MIPS_EBADF: u32 = 0x9;
const MIPS_EINVAL: u32 = 0x16;

/// Sentinel address: no memory access tracked this step.
const NO_ADDR: u32 = u32::MAX;

/// Source of pre-images and sink for hints, as consumed by the step
/// executor when the guest drives the oracle file descriptors.
pub trait PreimageOracle {
    /// Deliver one complete hint. Fire-and-forget; never blocks on the
    /// server processing it.
    fn hint(&mut self, hint: &[u8]) -> Result<(), EmulatorError>;

    /// Fetch the pre-image for a 32-byte key, blocking until served.
    fn get_preimage(&mut self, key: [u8; 32]) -> Result<Vec<u8>, EmulatorError>;
}

/// The step executor: owns the machine state and the oracle binding.
pub struct InstrumentedState<O: PreimageOracle> {
    pub state: State,
    oracle: O,
    std_out: Box<dyn Write>,
    std_err: Box<dyn Write>,

    mem_proof_enabled: bool,
    /// The one data address whose proof is captured this step.
    last_mem_access: u32,
    mem_proof: [u8; MEM_PROOF_SIZE],

    /// Cached pre-image for `last_preimage_key`, 8-byte BE length prefix
    /// included.
    last_preimage: Vec<u8>,
    last_preimage_key: [u8; 32],
    /// Offset read this step, `u32::MAX` when no pre-image byte was read.
    last_preimage_offset: u32,
}

impl<O: PreimageOracle> InstrumentedState<O> {
    pub fn new(state: State, oracle: O, std_out: Box<dyn Write>, std_err: Box<dyn Write>) -> Self {
        Self {
            state,
            oracle,
            std_out,
            std_err,
            mem_proof_enabled: false,
            last_mem_access: NO_ADDR,
            mem_proof: [0u8; MEM_PROOF_SIZE],
            last_preimage: Vec::new(),
            last_preimage_key: [0u8; 32],
            last_preimage_offset: u32::MAX,
        }
    }

    /// Execute one instruction.
    ///
    /// With `want_witness` the returned [`StepWitness`] carries the
    /// canonical pre-state encoding and the Merkle proofs of the touched
    /// memory words; without it the witness is empty (the hot path skips
    /// all hashing).
    pub fn step(&mut self, want_witness: bool) -> Result<StepWitness, EmulatorError> {
        self.mem_proof_enabled = want_witness;
        self.last_mem_access = NO_ADDR;
        self.last_preimage_offset = u32::MAX;

        let mut wit = StepWitness::default();
        if want_witness {
            wit.state = self.state.encode_witness().to_vec();
            wit.mem_proof = self.state.memory.merkle_proof(self.state.pc).to_vec();
        }

        self.mips_step()?;

        if want_witness {
            if self.last_mem_access != NO_ADDR {
                wit.mem_proof.extend_from_slice(&self.mem_proof);
            }
            if self.last_preimage_offset != u32::MAX {
                wit.preimage_key = Some(self.last_preimage_key);
                wit.preimage_value = Some(self.last_preimage.clone());
                wit.preimage_offset = Some(self.last_preimage_offset);
            }
        }
        Ok(wit)
    }

    fn mips_step(&mut self) -> Result<(), EmulatorError> {
        if self.state.exited {
            return Ok(());
        }
        self.exec_instruction()?;
        self.state.step += 1;
        Ok(())
    }

    fn exec_instruction(&mut self) -> Result<(), EmulatorError> {
        // instruction fetch
        let insn = self.state.memory.read_u32(self.state.pc)?;
        let opcode = insn >> 26;

        // j-type: j/jal
        if opcode == 2 || opcode == 3 {
            let link_reg = if opcode == 3 { 31 } else { 0 };
            // the target shares the upper 4 bits of the delay-slot PC
            let target = (self.state.next_pc & 0xf000_0000) | ((insn & 0x03ff_ffff) << 2);
            return self.handle_jump(link_reg, target);
        }

        // register fetch
        let mut rs = self.state.registers[((insn >> 21) & 0x1f) as usize];
        let mut rt = 0u32;
        let rt_reg = (insn >> 16) & 0x1f;
        let mut rd_reg = rt_reg;

        if opcode == 0 || opcode == 0x1c {
            // R-type stores to rd
            rt = self.state.registers[rt_reg as usize];
            rd_reg = (insn >> 11) & 0x1f;
        } else if opcode < 0x20 {
            // immediate operand stands in for rt
            rt = if opcode == 0xc || opcode == 0xd || opcode == 0xe {
                insn & 0xffff // zero-extended for andi/ori/xori
            } else {
                sign_extend(insn & 0xffff, 16)
            };
        } else if opcode >= 0x28 || opcode == 0x22 || opcode == 0x26 {
            // stores read rt; lwl/lwr merge into the current rt
            rt = self.state.registers[rt_reg as usize];
            rd_reg = rt_reg;
        }

        if (4..8).contains(&opcode) || opcode == 1 {
            return self.handle_branch(opcode, insn, rt_reg, rs);
        }

        // memory fetch (all I-type loads and stores)
        let mut store_addr = NO_ADDR;
        let mut mem = 0u32;
        if opcode >= 0x20 {
            rs = rs.wrapping_add(sign_extend(insn & 0xffff, 16));
            let addr = rs & 0xffff_fffc;
            self.track_mem_access(addr)?;
            mem = self.state.memory.read_u32(addr)?;
            if opcode >= 0x28 && opcode != 0x30 {
                // stores don't write back to a register
                store_addr = addr;
                rd_reg = 0;
            }
        }

        // ALU
        let val = execute(insn, rs, rt, mem).ok_or(EmulatorError::InvalidInstruction {
            pc: self.state.pc,
            insn,
        })?;

        let fun = insn & 0x3f;
        if opcode == 0 && (8..0x1c).contains(&fun) {
            match fun {
                8 | 9 => {
                    // jr/jalr
                    let link_reg = if fun == 9 { rd_reg } else { 0 };
                    return self.handle_jump(link_reg, rs);
                }
                0xa => return self.handle_rd(rd_reg, rs, rt == 0), // movz
                0xb => return self.handle_rd(rd_reg, rs, rt != 0), // movn
                0xc => return self.handle_syscall(),
                0x10..=0x13 | 0x18..=0x1b => return self.handle_hi_lo(fun, rs, rt, rd_reg),
                0xf => {} // sync falls through as a no-op write
                _ => {
                    // reserved functs; execute() has already rejected these
                    return Err(EmulatorError::InvalidInstruction {
                        pc: self.state.pc,
                        insn,
                    });
                }
            }
        }

        // sc reports success through rt
        if opcode == 0x38 && rt_reg != 0 {
            self.state.registers[rt_reg as usize] = 1;
        }

        // memory write
        if store_addr != NO_ADDR {
            self.track_mem_access(store_addr)?;
            self.state.memory.write_u32(store_addr, val)?;
        }

        self.handle_rd(rd_reg, val, true)
    }

    fn handle_jump(&mut self, link_reg: u32, dest: u32) -> Result<(), EmulatorError> {
        if self.state.next_pc != self.state.pc.wrapping_add(4) {
            return Err(EmulatorError::DelaySlot {
                kind: "jump",
                pc: self.state.pc,
            });
        }
        let prev_pc = self.state.pc;
        self.state.pc = self.state.next_pc;
        self.state.next_pc = dest;
        if link_reg != 0 {
            // return address skips the delay slot
            self.state.registers[link_reg as usize] = prev_pc.wrapping_add(8);
        }
        Ok(())
    }

    fn handle_branch(
        &mut self,
        opcode: u32,
        insn: u32,
        rt_reg: u32,
        rs: u32,
    ) -> Result<(), EmulatorError> {
        if self.state.next_pc != self.state.pc.wrapping_add(4) {
            return Err(EmulatorError::DelaySlot {
                kind: "branch",
                pc: self.state.pc,
            });
        }
        let should_branch = match opcode {
            4 | 5 => {
                let rt = self.state.registers[rt_reg as usize];
                (rs == rt && opcode == 4) || (rs != rt && opcode == 5) // beq/bne
            }
            6 => (rs as i32) <= 0, // blez
            7 => (rs as i32) > 0,  // bgtz
            1 => match (insn >> 16) & 0x1f {
                0 => (rs as i32) < 0,  // bltz
                1 => (rs as i32) >= 0, // bgez
                _ => false,
            },
            _ => false,
        };
        let prev_pc = self.state.pc;
        self.state.pc = self.state.next_pc; // the delay slot executes first
        if should_branch {
            self.state.next_pc = prev_pc
                .wrapping_add(4)
                .wrapping_add(sign_extend(insn & 0xffff, 16) << 2);
        } else {
            self.state.next_pc = self.state.next_pc.wrapping_add(4);
        }
        Ok(())
    }

    fn handle_rd(&mut self, store_reg: u32, val: u32, conditional: bool) -> Result<(), EmulatorError> {
        debug_assert!(store_reg < 32);
        if store_reg != 0 && conditional {
            self.state.registers[store_reg as usize] = val;
        }
        self.state.pc = self.state.next_pc;
        self.state.next_pc = self.state.next_pc.wrapping_add(4);
        Ok(())
    }

    fn handle_hi_lo(
        &mut self,
        fun: u32,
        rs: u32,
        rt: u32,
        store_reg: u32,
    ) -> Result<(), EmulatorError> {
        let mut val = 0u32;
        match fun {
            0x10 => val = self.state.hi, // mfhi
            0x11 => self.state.hi = rs,  // mthi
            0x12 => val = self.state.lo, // mflo
            0x13 => self.state.lo = rs,  // mtlo
            0x18 => {
                // mult
                let acc = ((rs as i32 as i64).wrapping_mul(rt as i32 as i64)) as u64;
                self.state.hi = (acc >> 32) as u32;
                self.state.lo = acc as u32;
            }
            0x19 => {
                // multu
                let acc = (rs as u64) * (rt as u64);
                self.state.hi = (acc >> 32) as u32;
                self.state.lo = acc as u32;
            }
            0x1a => {
                // div
                if rt == 0 {
                    return Err(EmulatorError::DivisionByZero { pc: self.state.pc });
                }
                self.state.hi = (rs as i32).wrapping_rem(rt as i32) as u32;
                self.state.lo = (rs as i32).wrapping_div(rt as i32) as u32;
            }
            0x1b => {
                // divu
                if rt == 0 {
                    return Err(EmulatorError::DivisionByZero { pc: self.state.pc });
                }
                self.state.hi = rs % rt;
                self.state.lo = rs / rt;
            }
            _ => {}
        }
        if store_reg != 0 {
            self.state.registers[store_reg as usize] = val;
        }
        self.state.pc = self.state.next_pc;
        self.state.next_pc = self.state.next_pc.wrapping_add(4);
        Ok(())
    }

    fn handle_syscall(&mut self) -> Result<(), EmulatorError> {
        let num = self.state.registers[2]; // v0
        let mut v0 = 0u32;
        let mut v1 = 0u32;

        let a0 = self.state.registers[4];
        let a1 = self.state.registers[5];
        let a2 = self.state.registers[6];

        match num {
            sys::MMAP => {
                let mut sz = a1;
                if sz & PAGE_ADDR_MASK != 0 {
                    // round the allocation up to a page boundary
                    sz = sz.wrapping_add(PAGE_SIZE as u32 - (sz & PAGE_ADDR_MASK));
                }
                if a0 == 0 {
                    v0 = self.state.heap;
                    self.state.heap = self.state.heap.wrapping_add(sz);
                } else {
                    v0 = a0;
                }
            }
            sys::BRK => v0 = 0x4000_0000,
            sys::CLONE => v0 = 1, // no threads
            sys::EXIT_GROUP => {
                self.state.exited = true;
                self.state.exit_code = a0 as u8;
                return Ok(());
            }
            sys::READ => match a0 {
                fd::STDIN => {} // read nothing, no error
                fd::PREIMAGE_READ => {
                    let eff_addr = a1 & 0xffff_fffc;
                    self.track_mem_access(eff_addr)?;
                    let mem = self.state.memory.read_u32(eff_addr)?;
                    let (dat, mut dat_len) =
                        self.read_preimage(self.state.preimage_key, self.state.preimage_offset)?;
                    let alignment = a1 & 3;
                    let space = 4 - alignment;
                    dat_len = dat_len.min(space).min(a2);
                    let mut out = mem.to_be_bytes();
                    out[alignment as usize..(alignment + dat_len) as usize]
                        .copy_from_slice(&dat[..dat_len as usize]);
                    self.state.memory.write_u32(eff_addr, u32::from_be_bytes(out))?;
                    self.state.preimage_offset += dat_len;
                    v0 = dat_len;
                }
                fd::HINT_READ => v0 = a2, // nothing to deliver, report it consumed
                _ => {
                    v0 = 0xffff_ffff;
                    v1 = MIPS_EBADF;
                }
            },
            sys::WRITE => match a0 {
                fd::STDOUT => {
                    let data = self.state.memory.read_range(a1, a2);
                    self.std_out
                        .write_all(&data)
                        .map_err(EmulatorError::GuestOutput)?;
                    v0 = a2;
                }
                fd::STDERR => {
                    let data = self.state.memory.read_range(a1, a2);
                    self.std_err
                        .write_all(&data)
                        .map_err(EmulatorError::GuestOutput)?;
                    v0 = a2;
                }
                fd::HINT_WRITE => {
                    let data = self.state.memory.read_range(a1, a2);
                    self.state.last_hint.extend_from_slice(&data);
                    // emit every complete length-prefixed hint in the buffer
                    while self.state.last_hint.len() >= 4 {
                        let hint_len = u32::from_be_bytes([
                            self.state.last_hint[0],
                            self.state.last_hint[1],
                            self.state.last_hint[2],
                            self.state.last_hint[3],
                        ]) as usize;
                        if hint_len > self.state.last_hint.len() - 4 {
                            break; // incomplete hint, keep buffering
                        }
                        let hint: Vec<u8> = self.state.last_hint[4..4 + hint_len].to_vec();
                        self.state.last_hint.drain(..4 + hint_len);
                        self.oracle.hint(&hint)?;
                    }
                    v0 = a2;
                }
                fd::PREIMAGE_WRITE => {
                    let eff_addr = a1 & 0xffff_fffc;
                    self.track_mem_access(eff_addr)?;
                    let mem = self.state.memory.read_u32(eff_addr)?;
                    let alignment = (a1 & 3) as usize;
                    let space = 4 - alignment;
                    let count = (a2 as usize).min(space);
                    // shift the written bytes into the key from the right
                    let mut key = self.state.preimage_key;
                    key.copy_within(count.., 0);
                    let word = mem.to_be_bytes();
                    key[32 - count..].copy_from_slice(&word[alignment..alignment + count]);
                    self.state.preimage_key = key;
                    self.state.preimage_offset = 0;
                    v0 = count as u32;
                }
                _ => {
                    v0 = 0xffff_ffff;
                    v1 = MIPS_EBADF;
                }
            },
            sys::FCNTL => {
                if a1 == 3 {
                    // F_GETFL
                    match a0 {
                        fd::STDIN | fd::HINT_READ | fd::PREIMAGE_READ => v0 = 0, // O_RDONLY
                        fd::STDOUT | fd::STDERR | fd::HINT_WRITE | fd::PREIMAGE_WRITE => v0 = 1, // O_WRONLY
                        _ => {
                            v0 = 0xffff_ffff;
                            v1 = MIPS_EBADF;
                        }
                    }
                } else {
                    v0 = 0xffff_ffff;
                    v1 = MIPS_EINVAL;
                }
            }
            _ => {} // unrecognized syscalls return 0 without error
        }

        self.state.registers[2] = v0;
        self.state.registers[7] = v1;
        self.state.pc = self.state.next_pc;
        self.state.next_pc = self.state.next_pc.wrapping_add(4);
        Ok(())
    }

    /// Fetch up to 32 bytes of the current pre-image at `offset`, loading it
    /// from the oracle on a key change. The cached value keeps the 8-byte BE
    /// length prefix so the guest can read the length first.
    fn read_preimage(
        &mut self,
        key: [u8; 32],
        offset: u32,
    ) -> Result<([u8; 32], u32), EmulatorError> {
        if key != self.last_preimage_key {
            let data = self.oracle.get_preimage(key)?;
            let mut preimage = Vec::with_capacity(8 + data.len());
            preimage.extend_from_slice(&(data.len() as u64).to_be_bytes());
            preimage.extend_from_slice(&data);
            self.last_preimage_key = key;
            self.last_preimage = preimage;
        }
        self.last_preimage_offset = offset;
        if offset as usize > self.last_preimage.len() {
            return Err(EmulatorError::PreimageOffsetOutOfRange {
                offset,
                size: self.last_preimage.len(),
            });
        }
        let src = &self.last_preimage[offset as usize..];
        let n = src.len().min(32);
        let mut dat = [0u8; 32];
        dat[..n].copy_from_slice(&src[..n]);
        Ok((dat, n as u32))
    }

    /// Capture the Merkle proof of the one data word this step may touch.
    /// The proof must be taken before the word is written.
    fn track_mem_access(&mut self, eff_addr: u32) -> Result<(), EmulatorError> {
        if !self.mem_proof_enabled || self.last_mem_access == eff_addr {
            return Ok(());
        }
        if self.last_mem_access != NO_ADDR {
            return Err(EmulatorError::MultipleMemAccess {
                addr: eff_addr,
                tracked: self.last_mem_access,
            });
        }
        self.last_mem_access = eff_addr;
        self.mem_proof = self.state.memory.merkle_proof(eff_addr);
        Ok(())
    }
}

fn sign_extend(val: u32, size: u32) -> u32 {
    let shift = 32 - size;
    (((val << shift) as i32) >> shift) as u32
}

/// Pure ALU evaluation: immediates have been folded into `rt`, loads and
/// stores see the fetched word in `mem`. Returns `None` on encodings the
/// machine does not implement.
fn execute(insn: u32, rs: u32, rt: u32, mem: u32) -> Option<u32> {
    let mut opcode = insn >> 26;
    let mut fun = insn & 0x3f;

    // fold immediate ALU opcodes onto their R-type equivalents
    if (8..0xf).contains(&opcode) {
        fun = match opcode {
            8 => 0x20,   // addi
            9 => 0x21,   // addiu
            0xa => 0x2a, // slti
            0xb => 0x2b, // sltiu
            0xc => 0x24, // andi
            0xd => 0x25, // ori
            0xe => 0x26, // xori
            _ => fun,
        };
        opcode = 0;
    }

    if opcode == 0 {
        let shamt = (insn >> 6) & 0x1f;
        if fun < 0x20 {
            return Some(match fun {
                0x00 => rt << shamt,                          // sll
                0x02 => rt >> shamt,                          // srl
                0x03 => sign_extend(rt >> shamt, 32 - shamt), // sra
                0x04 => rt << (rs & 0x1f),                    // sllv
                0x06 => rt >> (rs & 0x1f),                    // srlv
                0x07 => sign_extend(rt >> (rs & 0x1f), 32 - (rs & 0x1f)), // srav
                // jumps, moves, syscall, sync and hi/lo resolve elsewhere
                0x08..=0x0c | 0x0f | 0x10..=0x13 | 0x18..=0x1b => rs,
                _ => return None,
            });
        }
        return match fun {
            0x20 | 0x21 => Some(rs.wrapping_add(rt)), // add/addu
            0x22 | 0x23 => Some(rs.wrapping_sub(rt)), // sub/subu
            0x24 => Some(rs & rt),
            0x25 => Some(rs | rt),
            0x26 => Some(rs ^ rt),
            0x27 => Some(!(rs | rt)),                         // nor
            0x2a => Some(((rs as i32) < (rt as i32)) as u32), // slt
            0x2b => Some((rs < rt) as u32),                   // sltu
            _ => None,
        };
    } else if opcode == 0xf {
        return Some(rt << 16); // lui
    } else if opcode == 0x1c {
        // SPECIAL2
        return match fun {
            2 => Some((rs as i32).wrapping_mul(rt as i32) as u32), // mul
            0x20 => Some(rs.leading_zeros()),                      // clz
            0x21 => Some(rs.leading_ones()),                       // clo
            _ => None,
        };
    } else if opcode >= 0x20 {
        // big-endian sub-word lane selection; rs already holds the
        // unaligned effective address
        let val = match opcode {
            0x20 => sign_extend((mem >> (24 - (rs & 3) * 8)) & 0xff, 8), // lb
            0x21 => sign_extend((mem >> (16 - (rs & 2) * 8)) & 0xffff, 16), // lh
            0x22 => {
                // lwl
                let val = mem << ((rs & 3) * 8);
                let mask = 0xffff_ffffu32 << ((rs & 3) * 8);
                (rt & !mask) | val
            }
            0x23 => mem,                                   // lw
            0x24 => (mem >> (24 - (rs & 3) * 8)) & 0xff,   // lbu
            0x25 => (mem >> (16 - (rs & 2) * 8)) & 0xffff, // lhu
            0x26 => {
                // lwr
                let val = mem >> (24 - (rs & 3) * 8);
                let mask = 0xffff_ffffu32 >> (24 - (rs & 3) * 8);
                (rt & !mask) | val
            }
            0x28 => {
                // sb
                let val = (rt & 0xff) << (24 - (rs & 3) * 8);
                let mask = 0xffff_ffffu32 ^ (0xffu32 << (24 - (rs & 3) * 8));
                (mem & mask) | val
            }
            0x29 => {
                // sh
                let val = (rt & 0xffff) << (16 - (rs & 2) * 8);
                let mask = 0xffff_ffffu32 ^ (0xffffu32 << (16 - (rs & 2) * 8));
                (mem & mask) | val
            }
            0x2a => {
                // swl
                let val = rt >> ((rs & 3) * 8);
                let mask = 0xffff_ffffu32 >> ((rs & 3) * 8);
                (mem & !mask) | val
            }
            0x2b => rt, // sw
            0x2e => {
                // swr
                let val = rt << (24 - (rs & 3) * 8);
                let mask = 0xffff_ffffu32 << (24 - (rs & 3) * 8);
                (mem & !mask) | val
            }
            0x30 => mem, // ll
            0x38 => rt,  // sc
            _ => return None,
        };
        return Some(val);
    }
    None
}

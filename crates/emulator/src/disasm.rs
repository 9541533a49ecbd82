//! Logging-only MIPS32 disassembler.
//!
//! Decodes the top six opcode bits into the R-type, REGIMM, J-type,
//! SPECIAL2 and I-type families. Operand positions that name `rs`/`rt`/`rd`
//! print the *current register values*, not the register indices, so a
//! disassembled line doubles as a tiny trace of the operands in flight.
//! Unknown encodings within a family produce a diagnostic line starting
//! with `err`. Output never affects emulation.

use crate::state::State;

/// Disassemble one instruction word against the current state.
pub fn disasm(state: &State, insn: u32) -> String {
    let op = insn >> 26;
    match op {
        0 => disasm_r(state, insn),
        1 => disasm_regimm(state, insn),
        2 | 3 => disasm_j(insn),
        0x1c => disasm_special2(state, insn),
        _ => disasm_i(state, insn),
    }
}

fn reg(state: &State, r: u32) -> u32 {
    state.registers[(r & 0x1f) as usize]
}

fn r_name(fun: u32) -> &'static str {
    match fun {
        0 => "sll",
        2 => "srl",
        3 => "sra",
        4 => "sllv",
        6 => "srlv",
        7 => "srav",
        8 => "jr",
        9 => "jalr",
        10 => "movz",
        11 => "movn",
        12 => "syscall",
        15 => "sync",
        16 => "mfhi",
        17 => "mthi",
        18 => "mflo",
        19 => "mtlo",
        24 => "mult",
        25 => "multu",
        26 => "div",
        27 => "divu",
        32 => "add",
        33 => "addu",
        34 => "sub",
        35 => "subu",
        36 => "and",
        37 => "or",
        38 => "xor",
        39 => "nor",
        42 => "slt",
        43 => "sltu",
        _ => "",
    }
}

fn disasm_r(state: &State, insn: u32) -> String {
    let fun = insn & 0x3f;
    let opc = r_name(fun);
    let rs = (insn >> 21) & 0x1f;
    let rt = (insn >> 16) & 0x1f;
    let rd = (insn >> 11) & 0x1f;
    let shamt = (insn >> 6) & 0x1f;
    match opc {
        "sll" | "srl" | "sra" => {
            format!("{} {}, {}, {}", opc, reg(state, rd), reg(state, rt), shamt)
        }
        "sllv" | "srlv" | "srav" => format!(
            "{} {}, {}, {}",
            opc,
            reg(state, rd),
            reg(state, rt),
            reg(state, rs)
        ),
        "jr" => format!("{} {}", opc, reg(state, rs)),
        "jalr" => {
            if rd != 31 {
                format!("{} {}, {}", opc, reg(state, rd), reg(state, rs))
            } else {
                format!("{} {}", opc, reg(state, rs))
            }
        }
        "syscall" => opc.to_string(),
        "sync" => format!("{} {}", opc, shamt),
        "mfhi" | "mflo" => format!("{} {}", opc, reg(state, rd)),
        // mthi reads rs just like mtlo does
        "mthi" | "mtlo" => format!("{} {}", opc, reg(state, rs)),
        "mult" | "multu" | "div" | "divu" => {
            format!("{} {}, {}", opc, reg(state, rs), reg(state, rt))
        }
        "add" | "addu" | "sub" | "subu" | "and" | "or" | "xor" | "nor" | "slt" | "sltu"
        | "movz" | "movn" => format!(
            "{} {}, {}, {}",
            opc,
            reg(state, rd),
            reg(state, rs),
            reg(state, rt)
        ),
        _ => format!("err R inst:0,{},{}, {}", fun, opc, insn),
    }
}

fn regimm_name(fun: u32) -> &'static str {
    match fun {
        0 => "bltz",
        1 => "bgez",
        2 => "bltzl",
        3 => "bgezl",
        17 => "bgezal",
        _ => "",
    }
}

fn disasm_regimm(state: &State, insn: u32) -> String {
    let rs = (insn >> 21) & 0x1f;
    let fun = (insn >> 16) & 0x1f;
    let offset = insn & 0xffff;
    let opc = regimm_name(fun);
    match opc {
        "" => format!("err rmm inst:1,{},{}, {}", fun, opc, insn),
        _ => format!("{} {}, {}", opc, reg(state, rs), offset),
    }
}

fn disasm_j(insn: u32) -> String {
    let op = insn >> 26;
    let opc = if op == 2 { "j" } else { "jal" };
    format!("{} {}", opc, insn & 0x03ff_ffff)
}

fn special2_name(fun: u32) -> &'static str {
    match fun {
        0 => "madd",
        1 => "maddu",
        2 => "mul",
        4 => "msub",
        5 => "msubu",
        32 => "clz",
        33 => "clo",
        _ => "",
    }
}

fn disasm_special2(state: &State, insn: u32) -> String {
    let fun = insn & 0x3f;
    let opc = special2_name(fun);
    let rs = (insn >> 21) & 0x1f;
    let rt = (insn >> 16) & 0x1f;
    let rd = (insn >> 11) & 0x1f;
    match opc {
        "madd" | "maddu" | "msub" | "msubu" => {
            format!("{} {}, {}", opc, reg(state, rs), reg(state, rt))
        }
        "mul" => format!(
            "{} {}, {}, {}",
            opc,
            reg(state, rd),
            reg(state, rs),
            reg(state, rt)
        ),
        "clz" | "clo" => format!("{} {}, {}", opc, reg(state, rd), reg(state, rs)),
        _ => format!("err S28 inst:28,{},{}, {}", fun, opc, insn),
    }
}

fn i_name(op: u32) -> &'static str {
    match op {
        4 => "beq",
        5 => "bne",
        6 => "blez",
        7 => "bgtz",
        8 => "addi",
        9 => "addiu",
        10 => "slti",
        11 => "sltiu",
        12 => "andi",
        13 => "ori",
        14 => "xori",
        15 => "lui",
        32 => "lb",
        33 => "lh",
        34 => "lwl",
        35 => "lw",
        36 => "lbu",
        37 => "lhu",
        38 => "lwr",
        40 => "sb",
        41 => "sh",
        42 => "swl",
        43 => "sw",
        46 => "swr",
        48 => "ll",
        56 => "sc",
        _ => "",
    }
}

fn disasm_i(state: &State, insn: u32) -> String {
    let op = insn >> 26;
    let opc = i_name(op);
    let rs = (insn >> 21) & 0x1f;
    let rt = (insn >> 16) & 0x1f;
    let imm = insn & 0xffff;
    match opc {
        "beq" | "bne" => format!("{} {}, {}, {}", opc, reg(state, rs), reg(state, rt), imm),
        "blez" | "bgtz" => format!("{} {}, {}", opc, reg(state, rs), imm),
        "addi" | "addiu" | "slti" | "sltiu" | "andi" | "ori" | "xori" => {
            format!("{} {}, {}, {}", opc, reg(state, rt), reg(state, rs), imm)
        }
        "lui" | "lwr" | "swl" | "swr" => format!("{} {}, {}", opc, reg(state, rt), imm),
        "lb" | "lh" | "lwl" | "lw" | "lbu" | "lhu" | "sb" | "sh" | "sw" | "ll" | "sc" => {
            format!("{} {}, {} ({})", opc, reg(state, rt), imm, reg(state, rs))
        }
        _ => format!("err I inst:{},{}, {}", op, opc, insn),
    }
}

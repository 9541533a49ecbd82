//! The run loop: replay steps, schedule proofs/snapshots/info, stop, persist.

use anyhow::{bail, Context, Result};
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{info, warn};

use fpvm_emulator::{
    disasm::disasm, hexser, keccak256, HexU32, InstrumentedState, LoggingWriter, Metadata, State,
    StepPattern,
};

use crate::files;
use crate::process::{self, OracleServer, ProcessPreimageOracle};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path of the input JSON state.
    #[arg(long, value_name = "PATH", default_value = "state.json")]
    input: PathBuf,

    /// Path of the output JSON state.
    #[arg(long, value_name = "PATH", default_value = "out.json")]
    output: PathBuf,

    /// Step pattern to output proofs at: 'never' (default), 'always',
    /// '=123' at exactly step 123, '%123' for every 123 steps.
    #[arg(long, value_name = "PATTERN", default_value = "never")]
    proof_at: StepPattern,

    /// Format for proof data output file names; %d is replaced by the step.
    #[arg(long, value_name = "FMT", default_value = "proof-%d.json")]
    proof_fmt: String,

    /// Step pattern to output snapshots at (same DSL as --proof-at).
    #[arg(long, value_name = "PATTERN", default_value = "never")]
    snapshot_at: StepPattern,

    /// Format for snapshot output file names; %d is replaced by the step.
    #[arg(long, value_name = "FMT", default_value = "state-%d.json")]
    snapshot_fmt: String,

    /// Step pattern to stop at (same DSL as --proof-at).
    #[arg(long, value_name = "PATTERN", default_value = "never")]
    stop_at: StepPattern,

    /// Path to metadata file for symbol lookup during execution.
    #[arg(long, value_name = "PATH")]
    meta: Option<PathBuf>,

    /// Step pattern to log execution info at (same DSL as --proof-at).
    #[arg(long, value_name = "PATTERN", default_value = "%100000")]
    info_at: StepPattern,

    /// Step pattern to print the disassembled current instruction at
    /// (same DSL as --proof-at).
    #[arg(long, value_name = "PATTERN", default_value = "%100000")]
    opc_at: StepPattern,

    /// Symbol treated as the guest runtime's idle sleep; reaching it aborts
    /// the run instead of spinning forever.
    #[arg(long, value_name = "SYMBOL", default_value = "runtime.notesleep")]
    sleep_symbol: String,

    /// Accept the CPU profiling flag for interface compatibility.
    #[arg(long = "pprof.cpu")]
    pprof_cpu: bool,

    /// Pre-image oracle server command; its channels are inherited as fds 3-6.
    #[arg(last = true, value_name = "SERVER")]
    server: Vec<String>,
}

/// One proof record as persisted to disk.
#[derive(Serialize)]
struct Proof {
    step: u64,
    #[serde(with = "hexser::b32")]
    pre: [u8; 32],
    #[serde(with = "hexser::b32")]
    post: [u8; 32],
    #[serde(rename = "step-input", with = "hexser::bytes")]
    step_input: Vec<u8>,
    #[serde(
        rename = "oracle-input",
        with = "hexser::opt_bytes",
        skip_serializing_if = "Option::is_none"
    )]
    oracle_input: Option<Vec<u8>>,
}

/// Substitute the step number for the first `%d` in a file name format.
fn step_path(fmt: &str, step: u64) -> PathBuf {
    PathBuf::from(fmt.replacen("%d", &step.to_string(), 1))
}

pub fn run(args: RunArgs, cancelled: &AtomicBool) -> Result<()> {
    if args.pprof_cpu {
        warn!("CPU profiling is delegated to external tooling in this build");
    }

    let state: State = files::load_json(&args.input)?;

    let meta: Metadata = match &args.meta {
        Some(path) => files::load_json(path)?,
        None => {
            info!("no metadata file specified, defaulting to empty metadata");
            Metadata::default()
        }
    };

    let (oracle, mut server) =
        process::spawn_oracle(&args.server).context("failed to create pre-image oracle process")?;

    let mut vm = InstrumentedState::new(
        state,
        oracle,
        Box::new(LoggingWriter::new("program std-out")),
        Box::new(LoggingWriter::new("program std-err")),
    );

    let result = run_loop(&args, &meta, &mut vm, &mut server, cancelled);
    if let Err(err) = server.close() {
        warn!("failed to close pre-image server: {err:#}");
    }
    result
}

fn run_loop(
    args: &RunArgs,
    meta: &Metadata,
    vm: &mut InstrumentedState<ProcessPreimageOracle>,
    server: &mut OracleServer,
    cancelled: &AtomicBool,
) -> Result<()> {
    let start = Instant::now();
    let start_step = vm.state.step;

    // one range check per instruction instead of a symbol lookup
    let sleep_check = meta.symbol_matcher(&args.sleep_symbol);

    while !vm.state.exited {
        let step = vm.state.step;
        let pc = vm.state.pc;

        // polling the flag involves an atomic load, keep it off the hot path
        if step % 100 == 0 && cancelled.load(Ordering::Relaxed) {
            bail!("interrupted at step {step}");
        }

        if args.opc_at.matches(step) {
            let insn = vm
                .state
                .memory
                .read_u32(pc)
                .with_context(|| format!("failed to fetch instruction at {}", HexU32(pc)))?;
            println!("{}", disasm(&vm.state, insn));
        }

        if args.info_at.matches(step) {
            let insn = vm.state.memory.read_u32(pc).unwrap_or(0);
            let elapsed = start.elapsed().as_secs_f64();
            info!(
                step,
                pc = %HexU32(pc),
                insn = %HexU32(insn),
                ips = (step - start_step) as f64 / elapsed,
                pages = vm.state.memory.page_count(),
                mem = %vm.state.memory.usage(),
                name = meta.lookup_symbol(pc),
                "processing"
            );
        }

        // bail out instead of spinning in the guest's idle loop forever
        if sleep_check.contains(pc) {
            bail!("got stuck in {} at step {}", args.sleep_symbol, step);
        }

        if args.stop_at.matches(step) {
            break;
        }

        if args.snapshot_at.matches(step) {
            files::write_json(&step_path(&args.snapshot_fmt, step), &vm.state)
                .context("failed to write state snapshot")?;
        }

        if args.proof_at.matches(step) {
            let pre = keccak256(&vm.state.encode_witness());
            let witness = server
                .step(vm, true)
                .with_context(|| format!("failed at proof-gen step {step} (PC: {:#010x})", pc))?;
            let post = keccak256(&vm.state.encode_witness());
            let oracle_input = if witness.has_preimage() {
                Some(
                    witness
                        .encode_preimage_oracle_input()
                        .context("failed to encode pre-image oracle input")?,
                )
            } else {
                None
            };
            let proof = Proof {
                step,
                pre,
                post,
                step_input: witness.encode_step_input(),
                oracle_input,
            };
            files::write_json(&step_path(&args.proof_fmt, step), &proof)
                .context("failed to write proof data")?;
        } else {
            server
                .step(vm, false)
                .with_context(|| format!("failed at step {step} (PC: {:#010x})", pc))?;
        }
    }

    files::write_json(&args.output, &vm.state).context("failed to write state output")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_path_substitutes_step() {
        assert_eq!(step_path("proof-%d.json", 7), PathBuf::from("proof-7.json"));
        assert_eq!(step_path("state.json", 7), PathBuf::from("state.json"));
    }

    #[test]
    fn proof_json_shape() {
        let proof = Proof {
            step: 1,
            pre: [0u8; 32],
            post: [0xff; 32],
            step_input: vec![0xab],
            oracle_input: None,
        };
        let json = serde_json::to_string(&proof).unwrap();
        assert!(json.contains("\"step\":1"));
        assert!(json.contains(&format!("\"post\":\"0x{}\"", "ff".repeat(32))));
        assert!(json.contains("\"step-input\":\"0xab\""));
        assert!(!json.contains("oracle-input"));

        let proof = Proof {
            oracle_input: Some(vec![1, 2]),
            ..proof
        };
        let json = serde_json::to_string(&proof).unwrap();
        assert!(json.contains("\"oracle-input\":\"0x0102\""));
    }
}

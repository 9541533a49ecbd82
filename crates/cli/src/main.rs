//! fpvm: replay MIPS32 programs and emit fraud-proof witnesses.

mod files;
mod process;
mod run;

use clap::{Parser, Subcommand};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::error;

#[derive(Parser)]
#[command(name = "fpvm")]
#[command(version)]
#[command(about = "Deterministic MIPS32 fraud-proof emulator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run VM steps and generate proof data to replicate on-chain.
    ///
    /// See the flags to choose when to output a proof, a snapshot, or to
    /// stop early. Arguments after `--` launch the pre-image oracle server.
    Run(run::RunArgs),
}

/// Set by the signal handler, polled by the run loop every 100 steps.
static CANCELLED: AtomicBool = AtomicBool::new(false);

extern "C" fn request_cancel(_sig: libc::c_int) {
    CANCELLED.store(true, Ordering::Relaxed);
}

fn install_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGINT, request_cancel as libc::sighandler_t);
        libc::signal(libc::SIGTERM, request_cancel as libc::sighandler_t);
    }
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}

fn main() {
    init_logging();
    install_signal_handlers();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Run(args) => run::run(args, &CANCELLED),
    };

    if let Err(err) = result {
        error!("{err:#}");
        std::process::exit(1);
    }
}

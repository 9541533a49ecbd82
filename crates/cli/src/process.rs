//! Pre-image oracle sub-process supervision.
//!
//! The oracle server runs as a separate process. It inherits the server
//! ends of the two oracle channels at fixed descriptors — 3 = hint-read,
//! 4 = hint-write, 5 = pre-image-read, 6 = pre-image-write — with stdout
//! and stderr passed through. The supervisor owns the child handle,
//! guarantees interrupt-then-reap on shutdown, and annotates step errors
//! with the server's exit code when the server died first.

use anyhow::{anyhow, bail, Context, Result};
use std::io;
use std::process::{Child, Command, ExitStatus};
use std::time::{Duration, Instant};

use fpvm_emulator::{EmulatorError, InstrumentedState, PreimageOracle, StepWitness};
use fpvm_preimage::{create_bidirectional_channel, Channel, HintWriter, OracleClient};

/// Descriptor indices the child sees, in channel order.
const CHILD_FDS: [i32; 4] = [3, 4, 5, 6];

/// How long the server gets to exit after SIGINT before being killed.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Client side of the oracle channels. With no server configured, hints
/// are dropped and any pre-image request is an error.
pub struct ProcessPreimageOracle {
    hint: Option<HintWriter<Channel>>,
    oracle: Option<OracleClient<Channel>>,
}

impl PreimageOracle for ProcessPreimageOracle {
    fn hint(&mut self, hint: &[u8]) -> Result<(), EmulatorError> {
        match &mut self.hint {
            Some(writer) => writer.hint(hint).map_err(EmulatorError::OracleIo),
            None => Ok(()), // no hint processor
        }
    }

    fn get_preimage(&mut self, key: [u8; 32]) -> Result<Vec<u8>, EmulatorError> {
        match &mut self.oracle {
            Some(client) => client.get(key).map_err(EmulatorError::OracleIo),
            None => Err(EmulatorError::NoOracle { key }),
        }
    }
}

/// Owner of the oracle server process.
pub struct OracleServer {
    child: Option<Child>,
    /// Status observed by a crash check. Once set, the child is reaped and
    /// its pid may be recycled, so it must never be signalled again.
    exit_status: Option<ExitStatus>,
}

/// Create the oracle channels and launch the server executable. An empty
/// command degrades to the stub oracle and no child process.
pub fn spawn_oracle(cmd: &[String]) -> Result<(ProcessPreimageOracle, OracleServer)> {
    let Some((program, args)) = cmd.split_first() else {
        return Ok((
            ProcessPreimageOracle {
                hint: None,
                oracle: None,
            },
            OracleServer {
                child: None,
                exit_status: None,
            },
        ));
    };

    let (hint_client, hint_server) =
        create_bidirectional_channel().context("failed to create hint channel")?;
    let (pre_client, pre_server) =
        create_bidirectional_channel().context("failed to create pre-image channel")?;

    let mut command = Command::new(program);
    command.args(args);

    let hint_fd = hint_server.as_raw_fd();
    let pre_fd = pre_server.as_raw_fd();
    unsafe {
        use std::os::unix::process::CommandExt;
        command.pre_exec(move || {
            // Move the inherited sockets above the target range first so a
            // dup2 onto 3..6 cannot clobber the other channel's descriptor.
            let hint_high = libc::fcntl(hint_fd, libc::F_DUPFD, 10);
            let pre_high = libc::fcntl(pre_fd, libc::F_DUPFD, 10);
            if hint_high < 0 || pre_high < 0 {
                return Err(io::Error::last_os_error());
            }
            for (slot, fd) in CHILD_FDS.iter().zip([hint_high, hint_high, pre_high, pre_high]) {
                if libc::dup2(fd, *slot) < 0 {
                    return Err(io::Error::last_os_error());
                }
            }
            Ok(())
        });
    }

    let child = command
        .spawn()
        .with_context(|| format!("failed to start pre-image oracle server {program:?}"))?;
    drop(hint_server);
    drop(pre_server);

    Ok((
        ProcessPreimageOracle {
            hint: Some(HintWriter::new(hint_client)),
            oracle: Some(OracleClient::new(pre_client)),
        },
        OracleServer {
            child: Some(child),
            exit_status: None,
        },
    ))
}

impl OracleServer {
    /// Run one emulator step, annotating any error with the server's exit
    /// code when the server has already died — an oracle crash and a guest
    /// fault look very different to the operator.
    pub fn step<O: PreimageOracle>(
        &mut self,
        vm: &mut InstrumentedState<O>,
        want_witness: bool,
    ) -> Result<StepWitness> {
        match vm.step(want_witness) {
            Ok(witness) => Ok(witness),
            Err(err) => match self.exit_code() {
                Some(code) => Err(anyhow!(
                    "pre-image server exited with code {code}, resulting in err {err}"
                )),
                None => Err(err.into()),
            },
        }
    }

    /// Exit code of the server if it has terminated. A `Some` answer reaps
    /// the child; the status is cached so shutdown knows not to signal the
    /// stale pid.
    fn exit_code(&mut self) -> Option<i32> {
        if self.exit_status.is_none() {
            self.exit_status = self.child.as_mut()?.try_wait().ok().flatten();
        }
        self.exit_status.map(|status| status.code().unwrap_or(-1))
    }

    /// Interrupt the server, give it [`SHUTDOWN_GRACE`] to exit, then kill
    /// and reap it. A clean exit (or a forced kill after the grace period)
    /// is success; a non-zero exit is propagated.
    pub fn close(&mut self) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        // already reaped by a crash check: report the cached status, the pid
        // is no longer ours to signal
        if let Some(status) = self.exit_status {
            if status.success() {
                return Ok(());
            }
            bail!("pre-image server exited with {status}");
        }
        unsafe {
            libc::kill(child.id() as libc::pid_t, libc::SIGINT);
        }
        let deadline = Instant::now() + SHUTDOWN_GRACE;
        loop {
            match child.try_wait().context("failed to wait for pre-image server")? {
                Some(status) => {
                    if status.success() {
                        return Ok(());
                    }
                    bail!("pre-image server exited with {status}");
                }
                None if Instant::now() >= deadline => {
                    child.kill().context("failed to kill pre-image server")?;
                    child.wait().context("failed to reap pre-image server")?;
                    return Ok(());
                }
                None => std::thread::sleep(Duration::from_millis(50)),
            }
        }
    }
}

impl Drop for OracleServer {
    fn drop(&mut self) {
        if self.child.is_some() {
            let _ = self.close();
        }
    }
}

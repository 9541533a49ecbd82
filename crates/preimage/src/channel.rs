//! Bidirectional byte channels backed by Unix socketpairs.

use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;

/// One endpoint of a bidirectional byte stream.
pub struct Channel {
    stream: UnixStream,
}

impl Channel {
    /// Raw descriptor of the endpoint, for handing to a child process.
    pub fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

impl Read for Channel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for Channel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

/// Create a connected pair of channel endpoints: one for this process, one
/// to inherit into the oracle server.
pub fn create_bidirectional_channel() -> io::Result<(Channel, Channel)> {
    let (a, b) = UnixStream::pair()?;
    Ok((Channel { stream: a }, Channel { stream: b }))
}

//! Adapter routing guest stdout/stderr into the structured log.

use std::io::{self, Write};
use tracing::info;

/// A [`Write`] sink that logs each chunk, as text when printable and as hex
/// otherwise. Handed to the step executor for the guest's stdout/stderr so
/// the emulator core stays decoupled from any global logger.
pub struct LoggingWriter {
    name: &'static str,
}

impl LoggingWriter {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

fn log_as_text(buf: &[u8]) -> bool {
    buf.iter()
        .all(|&c| (0x20..0x7f).contains(&c) || c == b'\n' || c == b'\t')
}

impl Write for LoggingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if log_as_text(buf) {
            info!(source = self.name, text = %String::from_utf8_lossy(buf), "guest output");
        } else {
            info!(source = self.name, data = %hex::encode(buf), "guest output");
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_detection() {
        assert!(log_as_text(b"hello world\n"));
        assert!(log_as_text(b"tab\tseparated"));
        assert!(!log_as_text(&[0x00, 0x01]));
        assert!(!log_as_text(&[0xff]));
    }
}

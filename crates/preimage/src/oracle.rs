//! Client ends of the oracle protocol.

use std::io::{self, Read, Write};

/// Request/reply client for the pre-image stream.
pub struct OracleClient<C> {
    rw: C,
}

impl<C: Read + Write> OracleClient<C> {
    pub fn new(rw: C) -> Self {
        Self { rw }
    }

    /// Fetch the pre-image for a 32-byte key: writes exactly the key, then
    /// blocks until the full `length(u64 BE) ∥ payload` reply arrives.
    pub fn get(&mut self, key: [u8; 32]) -> io::Result<Vec<u8>> {
        self.rw.write_all(&key)?;
        let mut length = [0u8; 8];
        self.rw.read_exact(&mut length)?;
        let mut payload = vec![0u8; u64::from_be_bytes(length) as usize];
        self.rw.read_exact(&mut payload)?;
        Ok(payload)
    }
}

/// Fire-and-forget writer for the hint stream.
pub struct HintWriter<C> {
    rw: C,
}

impl<C: Write> HintWriter<C> {
    pub fn new(rw: C) -> Self {
        Self { rw }
    }

    /// Send one hint as `length(u32 BE) ∥ bytes`. No reply is awaited.
    pub fn hint(&mut self, hint: &[u8]) -> io::Result<()> {
        let mut buf = Vec::with_capacity(4 + hint.len());
        buf.extend_from_slice(&(hint.len() as u32).to_be_bytes());
        buf.extend_from_slice(hint);
        self.rw.write_all(&buf)
    }
}

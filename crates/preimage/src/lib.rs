//! fpvm-preimage: wire protocol for the pre-image oracle.
//!
//! The oracle speaks two independent bidirectional byte streams:
//!
//! - **Hint stream** (fire-and-forget): `length(u32 BE) ∥ bytes`. No reply.
//! - **Pre-image stream** (request/reply): the client writes a 32-byte key,
//!   the server replies `length(u64 BE) ∥ bytes`.
//!
//! All lengths are big-endian. Streams are driven by a single thread, so at
//! most one request is ever outstanding.

pub mod channel;
pub mod oracle;

pub use channel::{create_bidirectional_channel, Channel};
pub use oracle::{HintWriter, OracleClient};

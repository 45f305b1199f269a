//! Wire layer: big-endian message framing and non-blocking connections.

mod connection;
mod message;

pub use connection::{Connection, Listener};
pub use message::{MessageIn, MessageOut};

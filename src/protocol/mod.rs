//! Wire protocol: value grammar, request/reply codec, connections

pub mod codec;
pub mod connection;
pub mod session;
pub mod value;

pub use codec::{MarkerPair, Reply};
pub use connection::Connection;
pub use session::Session;
pub use value::{ErrorCode, MooValue};

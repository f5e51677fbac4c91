//! Wire-level conventions shared by every Tether agent
//!
//! Topic naming and matching live in [`topics`]; the MessagePack payload codec
//! lives in [`payload`].

pub mod payload;
pub mod topics;

pub use payload::{decode, decode_as, encode, CodecError, Payload};
pub use topics::*;

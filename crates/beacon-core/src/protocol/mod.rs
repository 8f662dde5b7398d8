//! Protocol module containing message types, the text codec, and the
//! announcement sequence counter.

pub mod codec;
pub mod messages;
pub mod sequence;

pub use codec::{current_timestamp_ms, decode_message, encode_message, ProtocolError, WireFormat};
pub use messages::*;
pub use sequence::SequenceCounter;

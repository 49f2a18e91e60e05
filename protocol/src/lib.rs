//! ksync Protocol
//! 
//! Commands exchanged between endpoints and their wire framing:
//! - Structured commands and responses
//! - Length-prefixed bincode frames
//! - Row streams closed by an end-of-rows terminator

pub mod message;
pub mod codec;

pub use message::*;
pub use codec::*;

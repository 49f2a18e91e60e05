//! ksync Core Library
//! 
//! Key/row model, ordering, canonical row encoding, and the traits that the
//! database driver layer implements. Every other ksync crate builds on this one.

pub mod types;
pub mod codec;
pub mod traits;
pub mod error;
pub mod config;

pub use types::*;
pub use codec::*;
pub use traits::*;
pub use error::*;
pub use config::*;

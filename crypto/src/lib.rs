//! ksync Cryptography Module
//! 
//! Digests over canonically encoded rows:
//! - BLAKE3 by default
//! - SHA-256 for peers that ask for it

pub mod hashing;

pub use hashing::*;

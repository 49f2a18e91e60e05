//! ksync Diff Engine
//! 
//! Finds the rows that differ between two copies of a table by exchanging
//! digests of key ranges:
//! - Confirmed ranges double in size
//! - Mismatched ranges halve until single rows are sent
//! - Each reply is computed from the request alone

pub mod hasher;
pub mod diff;
pub mod reconcile;

pub use hasher::*;
pub use diff::*;
pub use reconcile::*;

//! ksync Endpoint
//! 
//! Puts the pieces together into something that can be served:
//! - Command dispatch for one session
//! - Async serve loop and the matching client
//! - Worker barrier for sharing an exported snapshot

mod barrier;
mod remote;
mod serve;
mod session;

pub use barrier::*;
pub use remote::*;
pub use serve::*;
pub use session::*;

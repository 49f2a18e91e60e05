//! ksync State Management
//! 
//! Binds sessions to database views and shares consistent snapshots between
//! workers. Also provides a versioned in-memory database that implements the
//! driver traits, used by tests and the demo endpoint.

pub mod store;
pub mod memory;
pub mod snapshot;
pub mod dataset;

pub use store::*;
pub use memory::*;
pub use snapshot::*;
pub use dataset::*;

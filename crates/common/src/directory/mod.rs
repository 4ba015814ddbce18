mod memory;
mod provider;

pub use memory::{DirectoryOp, MemoryDirectory};
pub use provider::{DirectoryClient, DirectoryError, MAX_SEARCH_IDENTITIES};

//! Trait-based storage abstractions with an in-memory backend.

pub mod inmemory;
pub mod traits;

pub use inmemory::{MemoryOAuthStorage, MemoryResourceOwners, MemoryUser};
pub use traits::*;

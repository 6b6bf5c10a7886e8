//! Thread store implementations for quarry.
//!
//! Only an in-memory store ships: conversation state lives for the
//! lifetime of the process and is not persisted.

pub mod in_memory;

pub use in_memory::InMemoryThreadStore;

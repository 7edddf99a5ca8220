//! Adapter implementations of the storage ports.

pub mod memory;

pub use memory::{InMemoryConsentStore, InMemoryKvStore, InMemorySessionStore};

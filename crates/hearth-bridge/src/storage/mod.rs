//! Storage backends for the core's key/value interface.
//!
//! Two implementations of [`hearth_core::KvStore`]: an in-memory map
//! for tests and simulation, and a `redb` database standing in for the
//! device flash. Both store small fixed-layout blobs (the fabric table
//! and the discriminator); neither needs a schema.

mod memory;
mod redb;

pub use memory::MemoryStorage;

pub use self::redb::RedbStorage;

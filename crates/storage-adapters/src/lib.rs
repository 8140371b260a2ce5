//! # storage-adapters
//!
//! Implementations of the `domains` storage ports.
//!
//! - [`memory::InMemoryStore`] is always compiled. It backs tests and
//!   single-node deployments that can afford to lose state on restart.
//! - `postgres::PostgresStore` is behind the `db-postgres` feature and
//!   relays row changes through `LISTEN/NOTIFY`.
//!
//! Both publish change notifications through [`changes::ChangeBroadcaster`].

pub mod changes;
mod errors;
pub mod memory;

#[cfg(feature = "db-postgres")]
pub mod postgres;

pub use changes::ChangeBroadcaster;
pub use errors::StorageError;
pub use memory::InMemoryStore;

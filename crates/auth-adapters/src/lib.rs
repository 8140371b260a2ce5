//! # auth-adapters
//!
//! Anonymous voter identity. Raw device fingerprints and IP addresses never
//! leave this crate: they are reduced to hex SHA-256 digests (HMAC-keyed
//! when a salt is configured) before becoming a [`domains::VoterIdentity`].

pub mod hashing;

pub use hashing::{HashedIdentityProvider, IdentityHasher, RawIdentity, RawIdentitySource, StaticRawIdentity};

//! SQLite-backed cache store for intercepted responses.
//!
//! This module provides the persistent named-bucket store shared by every
//! worker generation, using SQLite with async access via tokio-rusqlite:
//!
//! - Request-addressed entries keyed by SHA-256 of method and URL
//! - Buckets named per generation (`{app}-{version}`, `{app}-assets-{version}`, `{app}-api-{version}`)
//! - Automatic schema migrations
//! - WAL mode for concurrent access

pub mod buckets;
pub mod connection;
pub mod entries;
pub mod hash;
pub mod migrations;

pub use crate::Error;

pub use buckets::{BucketKind, BucketNames};
pub use connection::CacheDb;
pub use entries::{BucketStats, CachedResponse};

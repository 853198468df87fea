//! Core types and shared functionality for stowaway.
//!
//! This crate provides:
//! - Named-bucket cache store with SQLite backend
//! - Route classification and offline page resolution
//! - Unified error types
//! - Configuration structures
//! - Wire types shared with the foreground (notifications, fallback bodies)

pub mod cache;
pub mod config;
pub mod error;
pub mod routing;
pub mod types;

pub use cache::{BucketKind, BucketNames, BucketStats, CacheDb, CachedResponse};
pub use config::{AppConfig, ConfigError, OfflinePageRule, TokenRule};
pub use error::Error;
pub use routing::{Classifier, OfflinePageMap, RouteAllowlist, RouteDecision, RoutePattern, is_mutating_method};
pub use types::{
    Category, Classification, ClientMessage, FailureCode, FallbackBody, InboundMessage, Notification, RecoverySignal,
    Strategy, VersionReply,
};

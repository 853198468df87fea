//! Request routing: which requests the worker handles and how.
//!
//! ### Same-origin boundary
//! - Requests for another origin (or unparsable URLs) are never intercepted.
//!
//! ### Allowlist
//! - Ordered path patterns, exact (`/about`) or wildcard (`/admin*`).
//! - An empty allowlist allows every path.
//!
//! ### Categories
//! - Cacheable extension (minus the non-cacheable overrides) or asset pattern: `asset`
//! - API path pattern: `api`
//! - POST/PUT/DELETE: `mutating`
//! - Anything else: `page`
//!
//! ### Offline pages
//! - First matching prefix in configuration order wins, else the default page.

pub mod allowlist;
pub mod classify;
pub mod offline;

pub use allowlist::{RouteAllowlist, RoutePattern};
pub use classify::{Classifier, RouteDecision, is_mutating_method};
pub use offline::OfflinePageMap;

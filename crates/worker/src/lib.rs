//! Offline request routing for installable web apps.
//!
//! A [`Registration`] owns the cache store and the connected clients and
//! hosts successive [`Worker`] generations. Each worker classifies
//! intercepted requests, applies the configured cache strategy, recovers
//! from expired CSRF tokens, and synthesizes offline fallbacks.

pub mod background;
pub mod clients;
pub mod context;
pub mod fallback;
pub mod fetch;
pub mod lifecycle;
pub mod recovery;
pub mod strategy;
pub mod worker;

#[cfg(test)]
mod testing;

pub use clients::{ClientId, ClientRegistry};
pub use context::{SharedContext, WorkerContext};
pub use fetch::{FetchConfig, FetchError, HttpNetwork, Network, Request, Response, ResponseSource};
pub use lifecycle::{ActivateReport, PrewarmReport, Registration, RegistrationStatus, WorkerState, WorkerSummary};
pub use worker::{EventOutcome, FetchOutcome, MessageOutcome, Worker, WorkerEvent, WorkerId};

//! Offline cache-and-sync engine.
//!
//! The engine sits between a client application and the network. It:
//! - intercepts same-origin GET requests and answers them through one of
//!   three caching policies (cache-first, network-first,
//!   stale-while-revalidate) chosen by an ordered rule table;
//! - keeps cached responses in a versioned, generation-switched content
//!   store with a safe install-then-activate-then-delete cutover;
//! - records client mutations in a durable operation log and drains them
//!   to the server, at least once, when the host delivers a sync trigger;
//! - accepts control commands from the foreground application and fans
//!   out lifecycle notifications to connected clients.

pub mod config;
pub mod engine;
pub mod fetch;
pub mod lifecycle;
pub mod message;
pub mod request;
pub mod router;
pub mod store;
pub mod sync;

pub use config::Config;
pub use engine::{Engine, EngineHandle};
pub use fetch::{FetchedResponse, Fetcher, HttpFetcher};
pub use message::{Command, Notification};
pub use router::{RouteOutcome, Router, ServeSource, Served};
pub use store::{ContentEntry, ContentStore, Namespace, OperationLog, PendingOperation};
pub use sync::SyncCoordinator;

//! Ports Layer - Trait definitions for external collaborators
//!
//! Following hexagonal architecture, these traits abstract:
//! - Upstream data providers and the discovery feed
//! - Persistence of tokens and analyses
//! - Outbound notifications
//!
//! `mocks` holds in-memory implementations used by tests and dry runs.

pub mod source;
pub mod store;
pub mod notifier;
pub mod mocks;

pub use source::{DiscoveryPort, SourceClient, SourceError};
pub use store::{PersistenceError, Store};
pub use notifier::{Notifier, NotifyError};

//! # Service Registry
//!
//! An in-memory service registry: the authoritative view of which services
//! exist, which instances of each are registered, and which instance leads
//! each service, with live change events fanned out to subscribers.
//!
//! ## Core Concepts
//!
//! - **Instances**: immutable endpoint descriptors, identified by a content
//!   hash over protocol and address
//! - **Leadership**: the oldest surviving registration (smallest index) of a
//!   service is its leader
//! - **Subscriptions**: filtered per-service event streams with optional
//!   snapshot catch-up and slow-consumer eviction
//!
//! ## Example
//!
//! ```ignore
//! use service_registry::{EventMask, Instance, Registry};
//!
//! let registry = Registry::new();
//! registry.add_service("web");
//!
//! // Watch everything, starting from the current contents
//! let sub = registry.subscribe("web", true, EventMask::ALL, 16);
//!
//! let inst = Instance::new("http", "10.0.0.1:80").with_index(1);
//! inst.valid()?;
//! registry.add_instance("web", inst);
//!
//! let up = sub.recv()?;      // up for the new instance
//! let leader = sub.recv()?;  // it is also the first leader
//! ```

pub mod error;
pub mod state;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use error::{RegistryError, Result};
pub use state::Registry;
pub use subscriptions::{SubscriptionHandle, SubscriptionId};
pub use types::{compute_id, valid_service_name, Event, EventKind, EventMask, Instance};

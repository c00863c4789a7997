//! Subscription system for live registry updates.
//!
//! Subscribers attach to a single service, filtered by an event-kind mask,
//! and receive change events over a bounded channel. Attachment can request
//! the current contents first: the snapshot is delivered as synthetic
//! `up`/`leader` events before any live event, with no gap or duplicate in
//! between.
//!
//! Delivery never blocks. A subscriber that stops draining its channel is
//! evicted and its handle reports [`RegistryError::SendBlocked`]; producers
//! and other subscribers are unaffected.
//!
//! # Example
//!
//! ```ignore
//! let registry = Registry::new();
//! registry.add_instance("web", Instance::new("http", "10.0.0.1:80").with_index(1));
//!
//! let sub = registry.subscribe("web", true, EventMask::UP | EventMask::LEADER, 16);
//! loop {
//!     match sub.recv() {
//!         Ok(event) => println!("{event}"),
//!         Err(_) => break, // closed or evicted
//!     }
//! }
//! ```
//!
//! [`RegistryError::SendBlocked`]: crate::error::RegistryError::SendBlocked

mod manager;
mod types;

pub(crate) use manager::SubscriptionBus;
pub use types::{SubscriptionHandle, SubscriptionId};

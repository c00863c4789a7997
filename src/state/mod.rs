//! Registry state: the service map and per-service instance tables.
//!
//! [`Registry`] owns the authoritative view and serializes mutations with a
//! reader/writer lock; each service's instances and leader bookkeeping live
//! in an internal per-service table that is itself lock-free.

mod registry;
mod table;

pub use registry::Registry;

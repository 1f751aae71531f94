//! Dual-write coordination for the darkroom image store.
//!
//! An image upload touches two systems: the blob goes to object storage,
//! the record goes to the relational metadata store. Neither spans a
//! transaction over the other, so this crate provides the saga around the
//! pair: the [`UploadCoordinator`] orders the writes so readers only ever
//! see records whose blob is durable, and the [`Reconciler`] periodically
//! repairs whatever interrupted operations left behind.

pub mod coordinator;
pub mod error;
pub mod reconciler;
pub mod retry;

pub use coordinator::UploadCoordinator;
pub use error::{CoordinatorError, CoordinatorResult};
pub use reconciler::{ReconcileReport, Reconciler};

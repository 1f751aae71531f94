//! Core domain types for Darkroom.
//!
//! This crate provides the types shared across the workspace:
//! - Content hashes and content-addressed image keys
//! - Image records and the status state machine
//! - Image format sniffing and payload limits
//! - Configuration types and loading

pub mod config;
pub mod error;
pub mod format;
pub mod hash;
pub mod key;
pub mod record;

pub use error::{Error, Result};
pub use format::ImageFormat;
pub use hash::{ContentHash, ContentHasher};
pub use key::ImageKey;
pub use record::{ImageRecord, ImageStatus};

/// Default maximum accepted image payload size (20 MiB).
pub const DEFAULT_MAX_IMAGE_BYTES: u64 = 20 * 1024 * 1024;

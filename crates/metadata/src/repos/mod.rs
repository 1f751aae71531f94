//! Repository traits grouping metadata operations.

pub mod images;

pub use images::ImageRepo;

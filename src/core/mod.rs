//! Domain logic independent of the HTTP layer.

pub mod cache;
pub mod dates;
pub mod db;
pub mod models;
pub mod scheduler;
pub mod search;
pub mod services;
pub mod stats;
pub mod storage;
pub mod traits;
pub mod validation;

pub use traits::{DefaultStorageConfig, StorageConfig};

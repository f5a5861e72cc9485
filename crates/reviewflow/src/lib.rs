pub mod api;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod jobs;
pub mod platform;
pub mod reconcile;
pub mod reviews;
pub mod sessions;
pub mod stores;

pub use error::AppError;
pub use platform::{JobKind, Operation, Platform};

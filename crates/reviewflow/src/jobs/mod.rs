pub mod maintenance;
pub mod model;
pub mod payload;
pub mod repo;

pub use maintenance::{cutoff_days, MaintenanceRepo};
pub use model::{Job, JobStatus, NewJob};
pub use payload::{ReplyTarget, ValidationError};
pub use repo::{JobsRepo, CANCELLED_BY_USER, WORKER_TIMED_OUT};

//! Admission: validation, sanitization and local rate limiting of writes.

pub mod gate;
pub mod rate_limit;
pub mod sanitize;

pub use gate::{Admission, Rejection, SubmissionGate};
pub use rate_limit::RateLimiter;
pub use sanitize::sanitize_text;

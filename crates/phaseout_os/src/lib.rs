#![forbid(unsafe_code)]

pub mod capacity;
pub mod clock;
pub mod error;
pub mod lookup;
pub mod param_cache;
pub mod status;

pub use error::ServiceError;

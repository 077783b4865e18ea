#![forbid(unsafe_code)]

pub mod capacity;
pub mod common;
pub mod params;
pub mod results;

pub use common::{ContractViolation, SchemaVersion, UnixTimeSecs, Validate};

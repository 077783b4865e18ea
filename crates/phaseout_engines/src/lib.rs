#![forbid(unsafe_code)]

pub mod canon;
pub mod weights;

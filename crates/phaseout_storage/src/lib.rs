#![forbid(unsafe_code)]

pub mod journal;
pub mod param_store;
pub mod repo;

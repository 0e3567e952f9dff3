//! Disk-backed image cache, circuit breaker and fan-out feed ranking.

pub mod application;
pub mod breaker;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
pub(crate) mod util;

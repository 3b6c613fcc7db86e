//! Core services: storage, admission control and retention.

pub mod object_store;
pub mod rate_limiter;
pub mod reaper;
pub mod sanitize;

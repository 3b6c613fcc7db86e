//! Data models for the expiring file store.
//!
//! `object` describes uploaded files and their on-disk sidecar record;
//! `sweep` describes the outcome of a maintenance pass.

pub mod object;
pub mod sweep;

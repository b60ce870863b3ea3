// src/core/mod.rs
//! Core client plumbing shared by the session manager and the feed

pub mod service_client;
pub mod task;

pub use service_client::RestClient;
pub use task::TaskGuard;

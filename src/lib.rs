//! Client SDK for the JobPulse job-search API.
//!
//! Two components carry the real logic: [`session::SessionManager`]
//! owns the authentication lifecycle (token persistence, expiry,
//! inactivity), and [`feed::NotificationFeed`] owns the incrementally
//! loaded notification list with optimistic read-state. Both are
//! explicitly constructed and passed by reference; there is no ambient
//! global state.

pub mod config;
pub mod core;
pub mod feed;
pub mod session;
pub mod storage;
pub mod types;

pub use crate::config::ClientConfig;
pub use crate::core::{RestClient, TaskGuard};
pub use crate::feed::{NotificationFeed, NotificationsApi};
pub use crate::session::{AuthApi, InputEvent, LogoutReason, SessionEvent, SessionManager};
pub use crate::storage::{FileStore, MemoryStore, SessionStore};

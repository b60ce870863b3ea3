// src/types/mod.rs
//! Wire and persisted data shapes shared across the client

pub mod notification;
pub mod session;

pub use notification::{Notification, NotificationPage, NotificationType, UnreadCountResponse};
pub use session::{AuthData, LoginResponse, Tokens, UserProfile};

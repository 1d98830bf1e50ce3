//! Live per-user notifications and the client-side list they feed.

pub mod cache;
pub mod feed;
pub mod manager;

pub use cache::NotificationCache;
pub use feed::NotificationFeed;
pub use manager::{DEFAULT_NOTIFICATION_EVENTS, NotificationCallback, NotificationStreamManager};

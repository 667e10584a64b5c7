//! Ports Layer - Trait definitions for external collaborators
//!
//! Following hexagonal architecture, these traits abstract:
//! - Venue access (symbols, prices, orders)
//! - Listing announcements
//! - Notification delivery
//! - The wall clock

pub mod announcement;
pub mod clock;
pub mod mocks;
pub mod notifier;
pub mod venue;

pub use announcement::{Announcement, AnnouncementError, AnnouncementSource};
pub use clock::{Clock, SystemClock};
pub use notifier::{Notification, NotificationCategory, Notifier};
pub use venue::{OrderFill, OrderRequest, VenueClient, VenueError};

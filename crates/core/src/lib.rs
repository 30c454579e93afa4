//! Core primitives shared by every courier crate.

pub mod error;
pub mod id;
pub mod severity;

pub use error::{CourierError, CourierResult};
pub use id::NotificationId;
pub use severity::Severity;

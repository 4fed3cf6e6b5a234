//! Background tasks for the Session Coordinator.
//!
//! # Tasks
//!
//! - `session_expiry` - Ends clinical sessions past their scheduled end
//! - `ward_expiry` - Auto-completes ward sessions past end plus grace

pub mod session_expiry;
pub mod ward_expiry;

pub use session_expiry::{start_session_expiry, SessionExpiryConfig};
pub use ward_expiry::{start_ward_expiry, WardExpiryConfig};

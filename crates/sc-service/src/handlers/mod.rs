//! HTTP and WebSocket handlers.

pub mod sessions;
pub mod topics;
pub mod ward;
pub mod ws;

pub use sessions::handle_session_command;
pub use topics::{publish_topic, PublishResponse};
pub use ward::handle_ward_command;
pub use ws::{session_socket, ward_socket, Namespace};

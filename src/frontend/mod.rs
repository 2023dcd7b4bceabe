//! Accepting clients and tracking their connections.

mod listener;
mod registry;

pub use listener::{FrontendListener, ListenerContext};
pub use registry::ConnectionRegistry;

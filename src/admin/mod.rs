//! Runtime control over HTTP.

mod server;

pub use server::AdminServer;

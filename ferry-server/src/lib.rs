//! Ferry Room Server Library
//!
//! Session registry, relay buffer and signaling relay. Exposed as a library
//! so integration tests and the client's end-to-end tests can run a server
//! in-process.

pub mod config;
pub mod connection;
pub mod handlers;
pub mod members;
pub mod rooms;
mod server;

pub use config::ServerConfig;
pub use server::{Server, serve};

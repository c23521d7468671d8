//! Ferry client library
//!
//! Signaling connection, data channels and the transfer sessions behind the
//! `ferry` command. Exposed as a library so end-to-end tests can drive
//! sessions against an in-process server.

pub mod channel;
pub mod config;
pub mod constants;
pub mod network;
pub mod transfers;

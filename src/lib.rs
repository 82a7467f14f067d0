//! caret-echo library: protocol parser, connection handler and server
//! lifecycle, shared by the binary and its tests.

pub mod config;
pub mod connection;
pub mod lifecycle;
pub mod protocol;
pub mod server;

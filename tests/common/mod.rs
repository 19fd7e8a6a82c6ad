//! Integration test common infrastructure.
//!
//! Spawns the compiled server against in-memory backends.

pub mod server;

#[allow(unused_imports)]
pub use server::TestServer;

//! minipod apiserver library.
//!
//! The crate ships an `apiserver` binary; the library surface exists so the
//! router, event bus and pod service can be driven from integration tests.

pub mod api;
pub mod config;
pub mod pods;
pub mod state;
pub mod store;
pub mod watch;

//! Relay: an internal-network API testing tool.
//!
//! The core is a layered request-orchestration engine: variable resolution
//! across a four-level scope chain, an HTTP request executor with pre/post
//! scripting, a flow runner that chains saved requests with control flow,
//! a WebSocket relay, and persistence/file-storage ports behind trait
//! boundaries so the SQLite/local-disk implementations can be swapped.

pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod executor;
pub mod flow;
pub mod maintenance;
pub mod persistence;
pub mod script;
pub mod server;
pub mod storage;
pub mod variables;
pub mod ws;

pub use domain::PersistencePort;
pub use error::{AppError, AppResult};
pub use server::start_server;

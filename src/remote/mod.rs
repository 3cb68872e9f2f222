//! Server-side read and write interface.

pub mod api_types;
mod client;
mod tables;

pub use client::{Backend, RestBackend};
pub use tables::{pull_query, server_table, TableQuery};

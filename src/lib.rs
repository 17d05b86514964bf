//! Decode-on-demand cache server for radar sweep files.
//!
//! Clients ask for a sweep by file path over a persistent TCP connection. The
//! server answers from an in-memory LRU cache or hands the file to a pool of
//! reader threads, caches the serialized result and sends it back.

pub mod archive;
pub mod cache;
pub mod client;
pub mod config;
pub mod decoder;
pub mod error;
pub mod protocol;
pub mod server;

pub use client::Client;
pub use error::{Error, Result};
pub use server::{Server, StopStatus};

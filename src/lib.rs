//! # cvsproto - CVS Client/Server Protocol Engine
//!
//! Both ends of the CVS remote protocol: a server that reads requests and
//! runs commands against a repository, and a client that describes a
//! working copy, runs commands and applies the file transfers it gets
//! back.
//!
//! ## Layers
//!
//! - [`buffer`]: byte buffers and filters (compression, framing, tracing)
//! - [`protocol`]: the line/counted-data codec, request and response
//!   tables, capability negotiation, password authentication
//! - [`server`]: request dispatch, command execution and output relay
//! - [`client`]: connections, sessions and the response handlers
//! - [`sync`]: the working-copy synchronizer behind the client
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cvsproto::client::{Client, CvsRoot, UpdateOptions};
//! use cvsproto::config::Config;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let root = CvsRoot::parse(":fork:/var/cvs")?;
//!     let mut client = Client::connect(Arc::new(Config::default()), root, ".").await?;
//!     client.update(&[], UpdateOptions::default()).await?;
//!     client.close().await;
//!     Ok(())
//! }
//! ```

pub mod buffer;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod server;
pub mod sync;
pub mod util;

// Re-export commonly used types
pub use client::{Client, CvsRoot};
pub use config::Config;
pub use error::{ClientError, ConnectionError, RepositoryError, SyncError};
pub use server::Server;

// vim: ts=4

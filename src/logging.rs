//! Logging prelude module for convenient access to tracing macros.
//!
//! Diagnostics go through `tracing` and always to stderr: on the server
//! stdout is the protocol channel itself.
//!
//! # Usage
//!
//! ```ignore
//! use crate::logging::*;
//!
//! debug!("[server] dispatching {}", name);
//! warn!("[client] server sent unknown response");
//! ```

pub use tracing::{debug, error, info, warn};

/// Initialize the tracing subscriber with environment filter support.
///
/// By default, logs at INFO level and above are displayed. Control the log level
/// with the `RUST_LOG` environment variable:
///
/// ```bash
/// RUST_LOG=debug cvsproto update
/// RUST_LOG=cvsproto::server=debug,cvsproto::buffer=trace cvsproto server
/// ```
pub fn init_tracing() {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
		)
		.with_writer(std::io::stderr)
		.init();
}

// vim: ts=4

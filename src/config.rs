//! Configuration for the protocol engine
//!
//! One `Config` struct holds every tunable of both peers. Values come from,
//! in increasing priority:
//! 1. Built-in defaults (`Config::default()`)
//! 2. A config file (`.toml`, or JSON5 for anything else)
//! 3. Environment variables (`CVSPROTO_*`, `TMPDIR`, `CVS_CLIENT_LOG`,
//!    `CVS_SERVER_LOG`)
//! 4. CLI flags

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::{fmt, fs, io};

// ============================================================================
// MAIN CONFIGURATION STRUCT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
	/// Compression level negotiation
	pub compression: CompressionConfig,

	/// Raw wire tracing
	pub trace: TraceConfig,

	/// Server behaviour
	pub server: ServerConfig,

	/// Command output flow control
	pub flow_control: FlowControlConfig,

	/// Password authentication and integrity protection
	pub auth: AuthConfig,
}

impl Default for Config {
	fn default() -> Self {
		Config {
			compression: CompressionConfig::default(),
			trace: TraceConfig::default(),
			server: ServerConfig::default(),
			flow_control: FlowControlConfig::default(),
			auth: AuthConfig::default(),
		}
	}
}

// ============================================================================
// SECTIONS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CompressionConfig {
	/// Lowest level the server accepts; above 0 forces compression
	pub min_level: u32,

	/// Highest level the server accepts
	pub max_level: u32,

	/// Level a client proposes with `Gzip-stream` (0 = off)
	pub client_level: u32,

	/// Level for `gzip-file-contents` when the client asks for 0
	pub file_contents_level: u32,
}

impl Default for CompressionConfig {
	fn default() -> Self {
		CompressionConfig { min_level: 0, max_level: 9, client_level: 0, file_contents_level: 6 }
	}
}

impl CompressionConfig {
	/// Clamp `level` into `[min_level, max_level]`
	pub fn clamp(&self, level: u32) -> u32 {
		level.max(self.min_level).min(self.max_level)
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TraceConfig {
	/// Tee the wire to `<prefix>.in` and `<prefix>.out`
	pub log_prefix: Option<PathBuf>,

	/// Bytes a memory-backed log keeps before spilling to its file
	pub memory_threshold: usize,
}

impl Default for TraceConfig {
	fn default() -> Self {
		TraceConfig { log_prefix: None, memory_threshold: 1024 * 1024 }
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
	/// Base directory for per-connection workspaces
	pub tmp_dir: PathBuf,

	/// Program name used in messages (`cvs server: ...`)
	pub program_name: String,

	/// Refuse commands that modify the repository
	pub read_only: bool,

	/// Most `Argument` requests accepted for one command
	pub max_arguments: usize,

	/// Longest line accepted in the authentication preamble
	pub max_line_length: usize,

	/// Leave the workspace in place on exit
	pub keep_workspace: bool,

	/// Root of the writable primary; write commands on other roots are redirected there
	pub primary_root: Option<String>,
}

impl Default for ServerConfig {
	fn default() -> Self {
		ServerConfig {
			tmp_dir: std::env::var_os("TMPDIR").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("/tmp")),
			program_name: "cvs".to_string(),
			read_only: false,
			max_arguments: 10000,
			max_line_length: 4096,
			keep_workspace: false,
			primary_root: None,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FlowControlConfig {
	/// Stop reading command output above this many queued bytes
	pub high_water: usize,

	/// Resume reading command output below this many queued bytes
	pub low_water: usize,

	/// Capacity of each command output pipe
	pub pipe_capacity: usize,
}

impl Default for FlowControlConfig {
	fn default() -> Self {
		FlowControlConfig { high_water: 2 * 1024 * 1024, low_water: 1024 * 1024, pipe_capacity: 64 * 1024 }
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AuthConfig {
	/// `user:password` lines for password authentication
	pub passwd_file: Option<PathBuf>,

	/// Hex key enabling the integrity and encryption requests
	pub integrity_key: Option<String>,
}

impl AuthConfig {
	/// Decoded integrity key, if configured and valid
	pub fn integrity_secret(&self) -> Option<Vec<u8>> {
		self.integrity_key.as_deref().and_then(|k| hex::decode(k.trim()).ok())
	}
}

/// Which end of the connection reads the environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Side {
	Client,
	Server,
}

// ============================================================================
// LOADING
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
	Io(io::Error),
	Toml(toml::de::Error),
	Json5(json5::Error),
	Invalid(String),
}

impl fmt::Display for ConfigError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ConfigError::Io(e) => write!(f, "cannot read config: {}", e),
			ConfigError::Toml(e) => write!(f, "invalid TOML config: {}", e),
			ConfigError::Json5(e) => write!(f, "invalid JSON5 config: {}", e),
			ConfigError::Invalid(msg) => write!(f, "invalid config: {}", msg),
		}
	}
}

impl std::error::Error for ConfigError {}

impl From<io::Error> for ConfigError {
	fn from(e: io::Error) -> Self {
		ConfigError::Io(e)
	}
}

impl Config {
	/// Read a config file; `.toml` is parsed as TOML, anything else as JSON5
	pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
		let path = path.as_ref();
		let contents = fs::read_to_string(path)?;
		let config: Config = if path.extension().map_or(false, |e| e == "toml") {
			toml::from_str(&contents).map_err(ConfigError::Toml)?
		} else {
			json5::from_str(&contents).map_err(ConfigError::Json5)?
		};
		config.validate()?;
		Ok(config)
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		let c = &self.compression;
		if c.max_level > 9 || c.file_contents_level > 9 || c.client_level > 9 {
			return Err(ConfigError::Invalid("compression levels must be 0-9".to_string()));
		}
		if c.min_level > c.max_level {
			return Err(ConfigError::Invalid(format!(
				"minimum compression level {} exceeds maximum {}",
				c.min_level, c.max_level
			)));
		}
		if self.flow_control.low_water > self.flow_control.high_water {
			return Err(ConfigError::Invalid("flow control low water mark above high water mark".to_string()));
		}
		Ok(())
	}

	/// Overlay values from the process environment
	pub fn apply_env(&mut self, side: Side) {
		self.apply_vars(side, |name| std::env::var(name).ok());
	}

	/// Overlay values from `lookup`, which maps variable names to values
	pub fn apply_vars<F>(&mut self, side: Side, lookup: F)
	where
		F: Fn(&str) -> Option<String>,
	{
		let number = |name: &str| lookup(name).and_then(|v| v.trim().parse::<u64>().ok());
		let flag = |name: &str| lookup(name).map(|v| matches!(v.trim(), "1" | "yes" | "true"));

		if let Some(v) = number("CVSPROTO_MIN_COMPRESSION") {
			self.compression.min_level = v as u32;
		}
		if let Some(v) = number("CVSPROTO_MAX_COMPRESSION") {
			self.compression.max_level = v as u32;
		}
		if let Some(v) = number("CVSPROTO_COMPRESSION") {
			self.compression.client_level = v as u32;
		}
		if let Some(v) = flag("CVSPROTO_READ_ONLY") {
			self.server.read_only = v;
		}
		if let Some(v) = flag("CVSPROTO_KEEP_WORKSPACE") {
			self.server.keep_workspace = v;
		}
		if let Some(v) = lookup("CVSPROTO_PASSWD") {
			self.auth.passwd_file = Some(PathBuf::from(v));
		}
		if let Some(v) = lookup("CVSPROTO_INTEGRITY_KEY") {
			self.auth.integrity_key = Some(v);
		}
		if let Some(v) = lookup("TMPDIR").filter(|v| !v.is_empty()) {
			self.server.tmp_dir = PathBuf::from(v);
		}
		let log_var = match side {
			Side::Client => "CVS_CLIENT_LOG",
			Side::Server => "CVS_SERVER_LOG",
		};
		if let Some(v) = lookup(log_var).filter(|v| !v.is_empty()) {
			self.trace.log_prefix = Some(PathBuf::from(v));
		}
	}
}


// vim: ts=4
